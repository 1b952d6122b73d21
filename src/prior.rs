//! Prior distributions used to map the unit hypercube onto parameters.

use std::f64::consts::FRAC_PI_2;
use std::fmt::Debug;

/// How a sampler should treat the edges of a prior's support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// The parameter is an angle; leaving one edge re-enters at the other.
    Periodic,
    Reflective,
}

pub trait Prior: Debug {
    /// Map `unit ∈ [0, 1]` to a draw from this prior (inverse CDF).
    fn rescale(&self, unit: f64) -> f64;

    fn ln_prob(&self, value: f64) -> f64;

    fn minimum(&self) -> f64;

    fn maximum(&self) -> f64;

    fn boundary(&self) -> Option<Boundary> {
        None
    }

    /// Fixed priors are set on the likelihood but never sampled.
    fn is_fixed(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uniform {
    pub minimum: f64,
    pub maximum: f64,
    pub boundary: Option<Boundary>,
}

impl Uniform {
    pub fn new(minimum: f64, maximum: f64) -> Self {
        Self {
            minimum,
            maximum,
            boundary: None,
        }
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = Some(boundary);
        self
    }
}

impl Prior for Uniform {
    fn rescale(&self, unit: f64) -> f64 {
        self.minimum + unit * (self.maximum - self.minimum)
    }

    fn ln_prob(&self, value: f64) -> f64 {
        if (self.minimum..=self.maximum).contains(&value) {
            -(self.maximum - self.minimum).ln()
        } else {
            f64::NEG_INFINITY
        }
    }

    fn minimum(&self) -> f64 {
        self.minimum
    }

    fn maximum(&self) -> f64 {
        self.maximum
    }

    fn boundary(&self) -> Option<Boundary> {
        self.boundary
    }
}

/// Uniform in the logarithm; used for amplitudes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogUniform {
    pub minimum: f64,
    pub maximum: f64,
}

impl Prior for LogUniform {
    fn rescale(&self, unit: f64) -> f64 {
        self.minimum * (self.maximum / self.minimum).powf(unit)
    }

    fn ln_prob(&self, value: f64) -> f64 {
        if (self.minimum..=self.maximum).contains(&value) {
            -(value * (self.maximum / self.minimum).ln()).ln()
        } else {
            f64::NEG_INFINITY
        }
    }

    fn minimum(&self) -> f64 {
        self.minimum
    }

    fn maximum(&self) -> f64 {
        self.maximum
    }
}

/// `p(x) ∝ sin(x)` on `[minimum, maximum] ⊂ [0, π]`, e.g. an inclination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sine {
    pub minimum: f64,
    pub maximum: f64,
}

impl Default for Sine {
    fn default() -> Self {
        Self {
            minimum: 0.,
            maximum: std::f64::consts::PI,
        }
    }
}

impl Prior for Sine {
    fn rescale(&self, unit: f64) -> f64 {
        let (lo, hi) = (self.minimum.cos(), self.maximum.cos());
        (lo + unit * (hi - lo)).acos()
    }

    fn ln_prob(&self, value: f64) -> f64 {
        if (self.minimum..=self.maximum).contains(&value) {
            (value.sin() / (self.minimum.cos() - self.maximum.cos())).ln()
        } else {
            f64::NEG_INFINITY
        }
    }

    fn minimum(&self) -> f64 {
        self.minimum
    }

    fn maximum(&self) -> f64 {
        self.maximum
    }
}

/// `p(x) ∝ cos(x)` on `[minimum, maximum] ⊂ [-π/2, π/2]`, e.g. a declination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cosine {
    pub minimum: f64,
    pub maximum: f64,
}

impl Default for Cosine {
    fn default() -> Self {
        Self {
            minimum: -FRAC_PI_2,
            maximum: FRAC_PI_2,
        }
    }
}

impl Prior for Cosine {
    fn rescale(&self, unit: f64) -> f64 {
        let (lo, hi) = (self.minimum.sin(), self.maximum.sin());
        (lo + unit * (hi - lo)).asin()
    }

    fn ln_prob(&self, value: f64) -> f64 {
        if (self.minimum..=self.maximum).contains(&value) {
            (value.cos() / (self.maximum.sin() - self.minimum.sin())).ln()
        } else {
            f64::NEG_INFINITY
        }
    }

    fn minimum(&self) -> f64 {
        self.minimum
    }

    fn maximum(&self) -> f64 {
        self.maximum
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaFunction {
    pub peak: f64,
}

impl Prior for DeltaFunction {
    fn rescale(&self, _unit: f64) -> f64 {
        self.peak
    }

    fn ln_prob(&self, value: f64) -> f64 {
        if value == self.peak {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        }
    }

    fn minimum(&self) -> f64 {
        self.peak
    }

    fn maximum(&self) -> f64 {
        self.peak
    }

    fn is_fixed(&self) -> bool {
        true
    }
}

/// Named priors in insertion order.
#[derive(Debug, Default)]
pub struct PriorDict {
    priors: Vec<(String, Box<dyn Prior>)>,
}

impl PriorDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a prior, replacing any earlier prior of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, prior: impl Prior + 'static) {
        let name = name.into();
        let prior: Box<dyn Prior> = Box::new(prior);
        match self.priors.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = prior,
            None => self.priors.push((name, prior)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, prior: impl Prior + 'static) -> Self {
        self.insert(name, prior);
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn Prior> {
        self.priors
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, prior)| prior.as_ref())
    }

    pub fn len(&self) -> usize {
        self.priors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Prior)> {
        self.priors
            .iter()
            .map(|(key, prior)| (key.as_str(), prior.as_ref()))
    }

    /// Priors that are sampled, in order.
    pub fn search_priors(&self) -> impl Iterator<Item = (&str, &dyn Prior)> {
        self.iter().filter(|(_, prior)| !prior.is_fixed())
    }

    pub fn search_parameter_keys(&self) -> Vec<String> {
        self.search_priors().map(|(key, _)| key.to_string()).collect()
    }

    /// Names and values of the fixed priors.
    pub fn fixed_parameters(&self) -> Vec<(String, f64)> {
        self.iter()
            .filter(|(_, prior)| prior.is_fixed())
            .map(|(key, prior)| (key.to_string(), prior.rescale(0.)))
            .collect()
    }

    /// Map a point of the unit hypercube onto the search parameters.
    pub fn rescale(&self, unit: &[f64], out: &mut [f64]) {
        assert!(unit.len() == out.len());
        self.search_priors()
            .zip(unit.iter().zip(out.iter_mut()))
            .for_each(|((_, prior), (u, x))| *x = prior.rescale(*u));
    }
}
