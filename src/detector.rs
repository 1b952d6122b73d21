//! Interferometer geometry and frequency-domain data.

use itertools::izip;
use num_complex::Complex64;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::{
    likelihood::LikelihoodError,
    math::{contract, sym_outer, Mat3, Vec3},
    sky::{self, PolarizationMode},
    source::{frequency_array, ExtrinsicParameters, Polarizations},
};

const WGS84_SEMI_MAJOR_AXIS: f64 = 6378137.0;
const WGS84_SEMI_MINOR_AXIS: f64 = 6356752.314;

/// Position and orientation of an L-shaped detector on the WGS-84 ellipsoid.
///
/// Angles are in degrees except the arm tilts, which are in radians. Arm
/// azimuths are measured counter-clockwise from East.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterferometerGeometry {
    /// Arm length in km.
    pub length: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Height above the ellipsoid in metres.
    pub elevation: f64,
    pub xarm_azimuth: f64,
    pub yarm_azimuth: f64,
    pub xarm_tilt: f64,
    pub yarm_tilt: f64,
}

impl InterferometerGeometry {
    /// Geometry of the LIGO Hanford, LIGO Livingston and Virgo detectors.
    pub fn known(name: &str) -> Option<Self> {
        match name {
            "H1" => Some(Self {
                length: 4.,
                latitude: 46. + 27. / 60. + 18.528 / 3600.,
                longitude: -(119. + 24. / 60. + 27.5657 / 3600.),
                elevation: 142.554,
                xarm_azimuth: 125.9994,
                yarm_azimuth: 215.9994,
                xarm_tilt: -6.195e-4,
                yarm_tilt: 1.25e-5,
            }),
            "L1" => Some(Self {
                length: 4.,
                latitude: 30. + 33. / 60. + 46.4196 / 3600.,
                longitude: -(90. + 46. / 60. + 27.2654 / 3600.),
                elevation: -6.574,
                xarm_azimuth: 197.7165,
                yarm_azimuth: 287.7165,
                xarm_tilt: -3.121e-4,
                yarm_tilt: -6.107e-4,
            }),
            "V1" => Some(Self {
                length: 3.,
                latitude: 43. + 37. / 60. + 53.0921 / 3600.,
                longitude: 10. + 30. / 60. + 16.1878 / 3600.,
                elevation: 51.884,
                xarm_azimuth: 70.5674,
                yarm_azimuth: 160.5674,
                xarm_tilt: 0.,
                yarm_tilt: 0.,
            }),
            _ => None,
        }
    }

    fn unit_vector_along_arm(&self, azimuth: f64, tilt: f64) -> Vec3 {
        let lat = self.latitude.to_radians();
        let lon = self.longitude.to_radians();
        let azimuth = azimuth.to_radians();

        let e_long = [-lon.sin(), lon.cos(), 0.];
        let e_lat = [-lat.sin() * lon.cos(), -lat.sin() * lon.sin(), lat.cos()];
        let e_h = [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()];

        std::array::from_fn(|i| {
            tilt.cos() * azimuth.cos() * e_long[i]
                + tilt.cos() * azimuth.sin() * e_lat[i]
                + tilt.sin() * e_h[i]
        })
    }

    pub fn x_arm(&self) -> Vec3 {
        self.unit_vector_along_arm(self.xarm_azimuth, self.xarm_tilt)
    }

    pub fn y_arm(&self) -> Vec3 {
        self.unit_vector_along_arm(self.yarm_azimuth, self.yarm_tilt)
    }

    /// `(x ⊗ x - y ⊗ y) / 2`
    pub fn detector_tensor(&self) -> Mat3 {
        let xx = sym_outer(&self.x_arm(), &self.x_arm(), 0.25);
        let yy = sym_outer(&self.y_arm(), &self.y_arm(), 0.25);
        std::array::from_fn(|i| std::array::from_fn(|j| xx[i][j] - yy[i][j]))
    }

    /// Geocentric position of the vertex in metres.
    pub fn vertex(&self) -> Vec3 {
        let lat = self.latitude.to_radians();
        let lon = self.longitude.to_radians();
        let a2 = WGS84_SEMI_MAJOR_AXIS * WGS84_SEMI_MAJOR_AXIS;
        let b2 = WGS84_SEMI_MINOR_AXIS * WGS84_SEMI_MINOR_AXIS;
        let radius = a2 / (a2 * lat.cos().powi(2) + b2 * lat.sin().powi(2)).sqrt();
        [
            (radius + self.elevation) * lat.cos() * lon.cos(),
            (radius + self.elevation) * lat.cos() * lon.sin(),
            (b2 / a2 * radius + self.elevation) * lat.sin(),
        ]
    }
}

/// One detector: geometry plus frequency-domain strain and noise.
#[derive(Debug, Clone)]
pub struct Interferometer {
    name: String,
    geometry: InterferometerGeometry,
    detector_tensor: Mat3,
    vertex: Vec3,
    sampling_frequency: f64,
    duration: f64,
    frequency_array: Vec<f64>,
    data: Vec<Complex64>,
    power_spectral_density: Vec<f64>,
    whitened_data: Option<Vec<Complex64>>,
}

impl Interferometer {
    /// A detector with zero strain data.
    ///
    /// `power_spectral_density` must have one entry per frequency bin of a
    /// segment of `duration` seconds sampled at `sampling_frequency`.
    pub fn new(
        name: impl Into<String>,
        geometry: InterferometerGeometry,
        sampling_frequency: f64,
        duration: f64,
        power_spectral_density: Vec<f64>,
    ) -> Result<Self, LikelihoodError> {
        let frequency_array = frequency_array(sampling_frequency, duration);
        if power_spectral_density.len() != frequency_array.len() {
            return Err(LikelihoodError::LengthMismatch {
                what: "power spectral density",
                expected: frequency_array.len(),
                found: power_spectral_density.len(),
            });
        }
        Ok(Self {
            name: name.into(),
            detector_tensor: geometry.detector_tensor(),
            vertex: geometry.vertex(),
            geometry,
            sampling_frequency,
            duration,
            data: vec![Complex64::new(0., 0.); frequency_array.len()],
            frequency_array,
            power_spectral_density,
            whitened_data: None,
        })
    }

    /// A detector from the table of known geometries.
    pub fn from_name(
        name: &str,
        sampling_frequency: f64,
        duration: f64,
        power_spectral_density: Vec<f64>,
    ) -> Result<Self, LikelihoodError> {
        let geometry = InterferometerGeometry::known(name)
            .ok_or_else(|| LikelihoodError::UnknownDetector(name.to_string()))?;
        Self::new(
            name,
            geometry,
            sampling_frequency,
            duration,
            power_spectral_density,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> &InterferometerGeometry {
        &self.geometry
    }

    pub fn detector_tensor(&self) -> &Mat3 {
        &self.detector_tensor
    }

    pub fn vertex(&self) -> &Vec3 {
        &self.vertex
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn frequency_array(&self) -> &[f64] {
        &self.frequency_array
    }

    pub fn data(&self) -> &[Complex64] {
        &self.data
    }

    pub fn power_spectral_density_array(&self) -> &[f64] {
        &self.power_spectral_density
    }

    pub fn amplitude_spectral_density_array(&self) -> Vec<f64> {
        self.power_spectral_density.iter().map(|psd| psd.sqrt()).collect()
    }

    /// Data divided by the amplitude spectral density, if `whiten_data` ran.
    pub fn whitened_data(&self) -> Option<&[Complex64]> {
        self.whitened_data.as_deref()
    }

    pub fn set_strain_data(&mut self, data: Vec<Complex64>) -> Result<(), LikelihoodError> {
        self.check_length("strain data", data.len())?;
        self.data = data;
        self.whitened_data = None;
        Ok(())
    }

    /// Replace the data with a Gaussian noise realisation of the PSD.
    pub fn set_strain_data_from_power_spectral_density<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let scale = self.duration / 4.;
        self.data = self
            .power_spectral_density
            .iter()
            .map(|psd| {
                let sigma = (psd * scale).sqrt();
                let re: f64 = rng.sample(StandardNormal);
                let im: f64 = rng.sample(StandardNormal);
                Complex64::new(re, im) * sigma
            })
            .collect();
        self.whitened_data = None;
    }

    /// Store `data / ASD` alongside the raw data.
    pub fn whiten_data(&mut self) {
        let whitened = izip!(&self.data, &self.power_spectral_density)
            .map(|(d, psd)| *d / psd.sqrt())
            .collect();
        self.whitened_data = Some(whitened);
    }

    pub fn antenna_response(
        &self,
        ra: f64,
        dec: f64,
        time: f64,
        psi: f64,
        mode: PolarizationMode,
    ) -> f64 {
        let polarization = sky::polarization_tensor(ra, dec, time, psi, mode);
        contract(&self.detector_tensor, &polarization)
    }

    pub fn time_delay_from_geocenter(&self, ra: f64, dec: f64, time: f64) -> f64 {
        sky::time_delay_from_geocenter(&self.vertex, ra, dec, time)
    }

    /// Project `polarizations` onto this detector and shift to its arrival time.
    ///
    /// Returns a fresh array; `polarizations` is never modified.
    pub fn get_detector_response(
        &self,
        polarizations: &Polarizations,
        extrinsic: &ExtrinsicParameters,
        frequency_array: &[f64],
    ) -> Result<Vec<Complex64>, LikelihoodError> {
        self.check_length("frequency array", frequency_array.len())?;

        let mut signal = vec![Complex64::new(0., 0.); frequency_array.len()];
        for (&mode, waveform) in polarizations {
            self.check_length("polarization", waveform.len())?;
            let response = self.antenna_response(
                extrinsic.ra,
                extrinsic.dec,
                extrinsic.geocent_time,
                extrinsic.psi,
                mode,
            );
            signal
                .iter_mut()
                .zip(waveform)
                .for_each(|(out, h)| *out += *h * response);
        }

        let time_shift =
            self.time_delay_from_geocenter(extrinsic.ra, extrinsic.dec, extrinsic.geocent_time);
        signal
            .iter_mut()
            .zip(frequency_array)
            .for_each(|(out, f)| {
                *out *= Complex64::from_polar(1., -std::f64::consts::TAU * time_shift * f)
            });

        Ok(signal)
    }

    /// Add the detector response of a signal to the data.
    pub fn inject_signal(
        &mut self,
        polarizations: &Polarizations,
        extrinsic: &ExtrinsicParameters,
        frequency_array: &[f64],
    ) -> Result<(), LikelihoodError> {
        let signal = self.get_detector_response(polarizations, extrinsic, frequency_array)?;
        self.data
            .iter_mut()
            .zip(signal)
            .for_each(|(d, h)| *d += h);
        if self.whitened_data.is_some() {
            self.whiten_data();
        }
        Ok(())
    }

    fn check_length(&self, what: &'static str, found: usize) -> Result<(), LikelihoodError> {
        if found != self.frequency_array.len() {
            return Err(LikelihoodError::LengthMismatch {
                what,
                expected: self.frequency_array.len(),
                found,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::dot3;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn flat_detector(name: &str) -> Interferometer {
        let n = frequency_array(64., 4.).len();
        Interferometer::from_name(name, 64., 4., vec![1.; n]).unwrap()
    }

    #[test]
    fn arms_are_orthogonal_unit_vectors() {
        for name in ["H1", "L1", "V1"] {
            let geometry = InterferometerGeometry::known(name).unwrap();
            let x = geometry.x_arm();
            let y = geometry.y_arm();
            assert_relative_eq!(dot3(&x, &x), 1., epsilon = 1e-9);
            assert_relative_eq!(dot3(&y, &y), 1., epsilon = 1e-9);
            assert!(dot3(&x, &y).abs() < 1e-3);
        }
    }

    #[test]
    fn vertex_lies_on_earth_surface() {
        let vertex = InterferometerGeometry::known("H1").unwrap().vertex();
        let r = dot3(&vertex, &vertex).sqrt();
        assert!(r > 6.35e6 && r < 6.38e6, "{r}");
    }

    #[test]
    fn unknown_detector() {
        let err = Interferometer::from_name("X9", 64., 4., vec![1.; 129]).unwrap_err();
        assert!(matches!(err, LikelihoodError::UnknownDetector(_)));
    }

    #[test]
    fn psd_length_is_checked() {
        let err = Interferometer::from_name("H1", 64., 4., vec![1.; 10]).unwrap_err();
        assert!(matches!(
            err,
            LikelihoodError::LengthMismatch {
                expected: 129,
                found: 10,
                ..
            }
        ));
    }

    #[test]
    fn antenna_pattern_is_bounded() {
        let ifo = flat_detector("L1");
        for ra in [0., 1.5, 3., 4.5] {
            for dec in [-1.2, 0., 0.7] {
                let fp = ifo.antenna_response(ra, dec, 1e9, 0.3, PolarizationMode::Plus);
                let fc = ifo.antenna_response(ra, dec, 1e9, 0.3, PolarizationMode::Cross);
                assert!(fp * fp + fc * fc <= 1. + 1e-2);
            }
        }
    }

    #[test]
    fn whitening_divides_by_asd() {
        let mut ifo = flat_detector("H1");
        let n = ifo.frequency_array().len();
        let psd: Vec<f64> = (0..n).map(|i| 4. + i as f64).collect();
        let mut ifo2 = Interferometer::new("H1", *ifo.geometry(), 64., 4., psd).unwrap();
        ifo2.set_strain_data(vec![Complex64::new(2., -2.); n]).unwrap();
        ifo2.whiten_data();
        let whitened = ifo2.whitened_data().unwrap();
        assert_relative_eq!(whitened[0].re, 1.);
        assert_relative_eq!(whitened[0].im, -1.);

        assert!(ifo.whitened_data().is_none());
        ifo.whiten_data();
        assert!(ifo.whitened_data().is_some());
    }

    #[test]
    fn noise_realisation_is_reproducible() {
        let mut a = flat_detector("V1");
        let mut b = flat_detector("V1");
        a.set_strain_data_from_power_spectral_density(&mut rand_chacha::ChaCha8Rng::seed_from_u64(3));
        b.set_strain_data_from_power_spectral_density(&mut rand_chacha::ChaCha8Rng::seed_from_u64(3));
        assert_eq!(a.data(), b.data());
        assert!(a.data().iter().any(|d| d.norm() > 0.));
    }
}
