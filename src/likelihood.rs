//! Gaussian-noise likelihoods of interferometer data given a source model.
//!
//! Two evaluation strategies are provided. [`GaussianLikelihood`] weights the
//! residual by the power spectral density and scales by the segment duration.
//! [`WhitenedLikelihood`] whitens the stored data once at construction and
//! compares it with the amplitude-spectral-density-weighted signal, scaled by
//! the sampling frequency. Both implement [`LogLikelihood`], which is what a
//! sampler drives.

use itertools::izip;
use num_complex::Complex64;
use thiserror::Error;

use crate::{
    detector::Interferometer,
    math::noise_weighted_inner_product,
    source::{Polarizations, SourceModel},
};

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LikelihoodError {
    #[error("Length of {what} is {found}, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Unknown parameter {0}")]
    UnknownParameter(String),
    #[error("No geometry known for detector {0}")]
    UnknownDetector(String),
    #[error("Data of detector {0} was never whitened")]
    NotWhitened(String),
}

/// A likelihood evaluated from the current state of its model.
///
/// Samplers update the model through `set_parameter` and then call
/// `log_likelihood`; nothing is cached between calls.
pub trait LogLikelihood {
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), LikelihoodError>;

    /// Natural log of the likelihood at the current parameters.
    fn log_likelihood(&self) -> Result<f64, LikelihoodError>;

    /// Log-likelihood of the data under the noise-only hypothesis.
    ///
    /// `NaN` when the likelihood has no noise model.
    fn noise_log_likelihood(&self) -> Result<f64, LikelihoodError> {
        Ok(f64::NAN)
    }
}

/// Matched-filter likelihood, `-4/T <d - h, d - h>` summed over detectors.
#[derive(Debug, Clone)]
pub struct GaussianLikelihood<S: SourceModel> {
    interferometers: Vec<Interferometer>,
    source: S,
}

impl<S: SourceModel> GaussianLikelihood<S> {
    pub fn new(interferometers: Vec<Interferometer>, source: S) -> Self {
        Self {
            interferometers,
            source,
        }
    }

    pub fn interferometers(&self) -> &[Interferometer] {
        &self.interferometers
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn get_interferometer_signal(
        &self,
        polarizations: &Polarizations,
        interferometer: &Interferometer,
    ) -> Result<Vec<Complex64>, LikelihoodError> {
        interferometer.get_detector_response(
            polarizations,
            self.source.extrinsic(),
            self.source.frequency_array(),
        )
    }

    pub fn log_likelihood_interferometer(
        &self,
        polarizations: &Polarizations,
        interferometer: &Interferometer,
    ) -> Result<f64, LikelihoodError> {
        let signal = self.get_interferometer_signal(polarizations, interferometer)?;
        let residual: Vec<_> = izip!(interferometer.data(), &signal)
            .map(|(d, h)| d - h)
            .collect();
        let log_l = -noise_weighted_inner_product(
            &residual,
            &residual,
            interferometer.power_spectral_density_array(),
            self.source.time_duration(),
        );
        Ok(log_l.re)
    }
}

impl<S: SourceModel> LogLikelihood for GaussianLikelihood<S> {
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), LikelihoodError> {
        self.source.set_parameter(name, value)
    }

    fn log_likelihood(&self) -> Result<f64, LikelihoodError> {
        let polarizations = self.source.frequency_domain_strain();
        self.interferometers
            .iter()
            .map(|ifo| self.log_likelihood_interferometer(&polarizations, ifo))
            .sum()
    }

    fn noise_log_likelihood(&self) -> Result<f64, LikelihoodError> {
        Ok(self
            .interferometers
            .iter()
            .map(|ifo| {
                -noise_weighted_inner_product(
                    ifo.data(),
                    ifo.data(),
                    ifo.power_spectral_density_array(),
                    self.source.time_duration(),
                )
                .re
            })
            .sum())
    }
}

/// Likelihood on whitened data, `-4 f_s sum |d_w - h / ASD|^2`.
///
/// The residual enters through its squared modulus. Construction whitens the
/// data of every detector.
#[derive(Debug, Clone)]
pub struct WhitenedLikelihood<S: SourceModel> {
    interferometers: Vec<Interferometer>,
    source: S,
}

impl<S: SourceModel> WhitenedLikelihood<S> {
    pub fn new(mut interferometers: Vec<Interferometer>, source: S) -> Self {
        interferometers.iter_mut().for_each(|ifo| ifo.whiten_data());
        Self {
            interferometers,
            source,
        }
    }

    pub fn interferometers(&self) -> &[Interferometer] {
        &self.interferometers
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn whitened(interferometer: &Interferometer) -> Result<&[Complex64], LikelihoodError> {
        interferometer
            .whitened_data()
            .ok_or_else(|| LikelihoodError::NotWhitened(interferometer.name().to_string()))
    }
}

impl<S: SourceModel> LogLikelihood for WhitenedLikelihood<S> {
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), LikelihoodError> {
        self.source.set_parameter(name, value)
    }

    fn log_likelihood(&self) -> Result<f64, LikelihoodError> {
        let polarizations = self.source.frequency_domain_strain();
        let scale = 4. * self.source.sampling_frequency();

        let mut log_l = 0.;
        for ifo in &self.interferometers {
            // Each detector projects its own copy of the polarizations.
            let signal = ifo.get_detector_response(
                &polarizations,
                self.source.extrinsic(),
                self.source.frequency_array(),
            )?;
            let whitened_data = Self::whitened(ifo)?;
            let residual: f64 = izip!(
                whitened_data,
                &signal,
                ifo.power_spectral_density_array()
            )
            .map(|(d, h, psd)| (*d - *h / psd.sqrt()).norm_sqr())
            .sum();
            log_l -= scale * residual;
        }
        Ok(log_l)
    }

    fn noise_log_likelihood(&self) -> Result<f64, LikelihoodError> {
        let scale = 4. * self.source.sampling_frequency();
        let mut log_l = 0.;
        for ifo in &self.interferometers {
            let power: f64 = Self::whitened(ifo)?.iter().map(|d| d.norm_sqr()).sum();
            log_l -= scale * power;
        }
        Ok(log_l)
    }
}
