//! Nested sampling parameter estimation for gravitational-wave signals.
//!
//! A [`LogLikelihood`] (usually [`GaussianLikelihood`] or
//! [`WhitenedLikelihood`] over a set of [`Interferometer`]s) is explored by a
//! [`Sampler`], which drives a [`NestedSamplingEngine`] over the search
//! priors of a [`PriorDict`] and collects the equally weighted posterior into
//! a [`SamplerResult`].

pub(crate) mod detector;
pub(crate) mod interrupt;
pub(crate) mod likelihood;
pub(crate) mod math;
pub(crate) mod nested;
pub mod output;
pub mod prior;
pub(crate) mod rundir;
pub(crate) mod sampler;
pub(crate) mod settings;
pub mod sky;
pub(crate) mod source;

pub use detector::{Interferometer, InterferometerGeometry};
pub use interrupt::{pending_signal, SignalGuard, CHECKPOINT_SIGNALS};
pub use likelihood::{GaussianLikelihood, LikelihoodError, LogLikelihood, WhitenedLikelihood};
pub use math::{logaddexp, logsumexp, Mat3, Vec3};
pub use nested::{DumpInfo, NestedProblem, NestedSamplingEngine, RandomWalkEngine, SolveOutput};
pub use rundir::{contains_mpi_variable, mpi_environment_detected, RunDirectory};
pub use sampler::{apply_boundaries, DumpCallback, Sampler, SamplerError, SamplerResult};
pub use settings::{
    translate_options, ConfigError, EfficiencyMode, MultinestSettings, SamplerArgs,
    SamplingEfficiency, LIVE_POINTS_ALIASES,
};
pub use source::{frequency_array, ExtrinsicParameters, Polarizations, SineGaussian, SourceModel};
