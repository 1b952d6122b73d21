//! Frequency-domain source models.

use std::collections::BTreeMap;
use std::f64::consts::{PI, SQRT_2};

use num_complex::Complex64;

use crate::{likelihood::LikelihoodError, sky::PolarizationMode};

/// Polarization waveforms, one complex array per mode.
pub type Polarizations = BTreeMap<PolarizationMode, Vec<Complex64>>;

/// Frequencies `k / T` of the one-sided spectrum of a real series.
pub fn frequency_array(sampling_frequency: f64, duration: f64) -> Vec<f64> {
    let num_bins = (duration * sampling_frequency / 2.).round() as usize + 1;
    (0..num_bins).map(|k| k as f64 / duration).collect()
}

/// Sky position, polarization angle and geocentric arrival time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExtrinsicParameters {
    pub ra: f64,
    pub dec: f64,
    pub psi: f64,
    pub geocent_time: f64,
}

impl ExtrinsicParameters {
    /// Set one of `ra`, `dec`, `psi`, `geocent_time`.
    ///
    /// Returns `false` if `name` is not an extrinsic parameter.
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        match name {
            "ra" => self.ra = value,
            "dec" => self.dec = value,
            "psi" => self.psi = value,
            "geocent_time" => self.geocent_time = value,
            _ => return false,
        }
        true
    }
}

/// A waveform model whose parameters are updated between likelihood calls.
pub trait SourceModel {
    fn extrinsic(&self) -> &ExtrinsicParameters;

    fn frequency_array(&self) -> &[f64];

    /// Length of the analysed segment in seconds.
    fn time_duration(&self) -> f64;

    fn sampling_frequency(&self) -> f64;

    /// Waveform polarizations evaluated at `frequency_array`.
    fn frequency_domain_strain(&self) -> Polarizations;

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), LikelihoodError>;
}

/// A sine-Gaussian burst with root-sum-squared amplitude `hrss`, quality
/// factor `q` and central frequency `frequency`.
#[derive(Debug, Clone)]
pub struct SineGaussian {
    pub hrss: f64,
    pub q: f64,
    pub frequency: f64,
    pub extrinsic: ExtrinsicParameters,
    sampling_frequency: f64,
    duration: f64,
    frequency_array: Vec<f64>,
}

impl SineGaussian {
    pub fn new(sampling_frequency: f64, duration: f64) -> Self {
        Self {
            hrss: 1e-22,
            q: 10.,
            frequency: 100.,
            extrinsic: ExtrinsicParameters::default(),
            sampling_frequency,
            duration,
            frequency_array: frequency_array(sampling_frequency, duration),
        }
    }
}

impl SourceModel for SineGaussian {
    fn extrinsic(&self) -> &ExtrinsicParameters {
        &self.extrinsic
    }

    fn frequency_array(&self) -> &[f64] {
        &self.frequency_array
    }

    fn time_duration(&self) -> f64 {
        self.duration
    }

    fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    fn frequency_domain_strain(&self) -> Polarizations {
        let tau = self.q / (SQRT_2 * PI * self.frequency);
        let amplitude = self.hrss * self.q / (4. * PI.sqrt() * self.frequency);

        let (plus, cross): (Vec<_>, Vec<_>) = self
            .frequency_array
            .iter()
            .map(|f| {
                let negative = (-(PI * tau * (f - self.frequency)).powi(2)).exp();
                let positive = (-(PI * tau * (f + self.frequency)).powi(2)).exp();
                (
                    Complex64::new(amplitude * (negative + positive), 0.),
                    Complex64::new(0., -amplitude * (negative - positive)),
                )
            })
            .unzip();

        BTreeMap::from([
            (PolarizationMode::Plus, plus),
            (PolarizationMode::Cross, cross),
        ])
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), LikelihoodError> {
        match name {
            "hrss" => self.hrss = value,
            "q" | "Q" => self.q = value,
            "frequency" => self.frequency = value,
            _ => {
                if !self.extrinsic.set(name, value) {
                    return Err(LikelihoodError::UnknownParameter(name.to_string()));
                }
            }
        }
        Ok(())
    }
}
