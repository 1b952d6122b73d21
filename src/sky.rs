//! Sky geometry shared by all detectors.
//!
//! Converts GPS times to Greenwich mean sidereal time and builds the
//! polarization tensors and propagation direction of a plane wave arriving
//! from a given right ascension and declination.

use std::f64::consts::{FRAC_PI_2, TAU};
use std::fmt;

use crate::math::{cross3, dot3, sym_outer, Mat3, Vec3};

pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// GPS times (seconds) at which a leap second was inserted into UTC.
const LEAP_SECONDS: [f64; 18] = [
    46828800.,
    78364801.,
    109900802.,
    173059203.,
    252028804.,
    315187205.,
    346723206.,
    393984007.,
    425520008.,
    457056009.,
    504489610.,
    551750411.,
    599184012.,
    820108813.,
    914803214.,
    1025136015.,
    1119744016.,
    1167264017.,
];

/// Julian date of the GPS epoch, 1980-01-06 00:00:00 UTC.
const GPS_EPOCH_JD: f64 = 2444244.5;
const J2000_JD: f64 = 2451545.0;

/// The polarization content of a gravitational wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PolarizationMode {
    Plus,
    Cross,
    Breathing,
    Longitudinal,
    X,
    Y,
}

impl PolarizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolarizationMode::Plus => "plus",
            PolarizationMode::Cross => "cross",
            PolarizationMode::Breathing => "breathing",
            PolarizationMode::Longitudinal => "longitudinal",
            PolarizationMode::X => "x",
            PolarizationMode::Y => "y",
        }
    }
}

impl fmt::Display for PolarizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn leap_seconds(gps_time: f64) -> f64 {
    LEAP_SECONDS.iter().filter(|&&leap| gps_time >= leap).count() as f64
}

/// Greenwich mean sidereal time in radians, in `[0, 2π)`.
pub fn greenwich_mean_sidereal_time(gps_time: f64) -> f64 {
    let utc = gps_time - leap_seconds(gps_time);
    let days = GPS_EPOCH_JD + utc / 86400. - J2000_JD;
    let centuries = days / 36525.;
    let degrees = 280.46061837 + 360.98564736629 * days + 0.000387933 * centuries * centuries;
    degrees.to_radians().rem_euclid(TAU)
}

/// Unit vector pointing from the geocentre towards the source.
pub fn source_direction(ra: f64, dec: f64, gps_time: f64) -> Vec3 {
    let phi = ra - greenwich_mean_sidereal_time(gps_time);
    let theta = FRAC_PI_2 - dec;
    [
        theta.sin() * phi.cos(),
        theta.sin() * phi.sin(),
        theta.cos(),
    ]
}

/// Polarization tensor of `mode` for a wave from `(ra, dec)` at `gps_time`.
pub fn polarization_tensor(
    ra: f64,
    dec: f64,
    gps_time: f64,
    psi: f64,
    mode: PolarizationMode,
) -> Mat3 {
    let phi = ra - greenwich_mean_sidereal_time(gps_time);
    let theta = FRAC_PI_2 - dec;

    let u = [
        phi.cos() * theta.cos(),
        theta.cos() * phi.sin(),
        -theta.sin(),
    ];
    let v = [-phi.sin(), phi.cos(), 0.];
    let (sin_psi, cos_psi) = psi.sin_cos();
    let m: Vec3 = std::array::from_fn(|i| -u[i] * sin_psi - v[i] * cos_psi);
    let n: Vec3 = std::array::from_fn(|i| -u[i] * cos_psi + v[i] * sin_psi);

    match mode {
        PolarizationMode::Plus => {
            let mm = sym_outer(&m, &m, 0.5);
            let nn = sym_outer(&n, &n, 0.5);
            std::array::from_fn(|i| std::array::from_fn(|j| mm[i][j] - nn[i][j]))
        }
        PolarizationMode::Cross => sym_outer(&m, &n, 1.),
        PolarizationMode::Breathing => {
            let mm = sym_outer(&m, &m, 0.5);
            let nn = sym_outer(&n, &n, 0.5);
            std::array::from_fn(|i| std::array::from_fn(|j| mm[i][j] + nn[i][j]))
        }
        PolarizationMode::Longitudinal => {
            let omega = cross3(&m, &n);
            sym_outer(&omega, &omega, 0.5)
        }
        PolarizationMode::X => sym_outer(&m, &cross3(&m, &n), 1.),
        PolarizationMode::Y => sym_outer(&n, &cross3(&m, &n), 1.),
    }
}

/// Arrival time at a detector at `vertex` (metres, geocentric) minus the
/// arrival time at the geocentre.
pub fn time_delay_from_geocenter(vertex: &Vec3, ra: f64, dec: f64, gps_time: f64) -> f64 {
    let omega = source_direction(ra, dec, gps_time);
    -dot3(&omega, vertex) / SPEED_OF_LIGHT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::contract;
    use approx::assert_relative_eq;

    #[test]
    fn gmst_is_in_range() {
        for t in [0., 630720013., 1126259462.4, 1187008882.43] {
            let gmst = greenwich_mean_sidereal_time(t);
            assert!((0. ..TAU).contains(&gmst));
        }
    }

    #[test]
    fn gmst_advances_one_sidereal_day() {
        let t0 = 1126259462.;
        let sidereal_day = 86164.0905;
        let a = greenwich_mean_sidereal_time(t0);
        let b = greenwich_mean_sidereal_time(t0 + sidereal_day);
        assert_relative_eq!((a - b).sin(), 0., epsilon = 1e-4);
    }

    #[test]
    fn polarization_tensors_are_traceless_where_expected() {
        for mode in [PolarizationMode::Plus, PolarizationMode::Cross] {
            let t = polarization_tensor(1.2, -0.3, 1126259462., 0.7, mode);
            assert_relative_eq!(t[0][0] + t[1][1] + t[2][2], 0., epsilon = 1e-12);
        }
        let b = polarization_tensor(1.2, -0.3, 1126259462., 0.7, PolarizationMode::Breathing);
        assert_relative_eq!(b[0][0] + b[1][1] + b[2][2], 2., epsilon = 1e-12);
    }

    #[test]
    fn plus_and_cross_are_orthogonal() {
        let p = polarization_tensor(0.4, 0.9, 1e9, 0.2, PolarizationMode::Plus);
        let c = polarization_tensor(0.4, 0.9, 1e9, 0.2, PolarizationMode::Cross);
        assert_relative_eq!(contract(&p, &c), 0., epsilon = 1e-12);
        assert_relative_eq!(contract(&p, &p), 2., epsilon = 1e-12);
    }

    #[test]
    fn delay_is_bounded_by_earth_radius() {
        let vertex = [6.4e6, 0., 0.];
        for ra in [0., 1., 2., 3., 4., 5., 6.] {
            let dt = time_delay_from_geocenter(&vertex, ra, 0.1, 1e9);
            assert!(dt.abs() <= 6.4e6 / SPEED_OF_LIGHT + 1e-12);
        }
        assert_eq!(time_delay_from_geocenter(&[0.; 3], 1., 1., 1e9), 0.);
    }
}
