//! Drives a nested sampling engine for a likelihood and a set of priors.
//!
//! [`Sampler::new`] validates the options, derives the periodic wrap flags
//! and settles where the engine writes. [`Sampler::run_sampler`] prepares the
//! run directory, installs the checkpoint signal handlers, runs the engine
//! and reads the equally weighted posterior back into a [`SamplerResult`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use faer::Mat;
use log::{error, info, warn};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    interrupt::{pending_signal, SignalGuard},
    likelihood::{LikelihoodError, LogLikelihood},
    nested::{DumpInfo, NestedProblem, NestedSamplingEngine, SolveOutput},
    output::load_post_equal_weights,
    prior::{Boundary, PriorDict},
    rundir::{mpi_environment_detected, RunDirectory},
    settings::{ConfigError, MultinestSettings, SamplerArgs},
};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Likelihood(#[from] LikelihoodError),
    #[error("Could not install signal handlers: {0}")]
    Signal(#[from] nix::Error),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Called with the engine's progress after every checkpoint write.
pub type DumpCallback = Box<dyn FnMut(&DumpInfo<'_>)>;

/// One flag per search prior, 1 where the prior is periodic.
pub fn apply_boundaries(priors: &PriorDict) -> Vec<u8> {
    priors
        .search_priors()
        .map(|(_, prior)| u8::from(prior.boundary() == Some(Boundary::Periodic)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct SamplerResult {
    pub label: String,
    pub outdir: PathBuf,
    /// Names of the sample columns, the first `n_params` search parameters.
    pub search_parameter_keys: Vec<String>,
    pub fixed_parameters: Vec<(String, f64)>,
    /// Equally weighted posterior draws × search parameters.
    pub samples: Mat<f64>,
    /// `ln L` of every draw.
    pub log_likelihood_evaluations: Vec<f64>,
    pub log_evidence: f64,
    pub log_evidence_err: f64,
    /// NaN if the likelihood has no noise model.
    pub log_noise_evidence: f64,
    pub log_bayes_factor: f64,
    pub num_likelihood_evaluations: u64,
    pub sampling_time: Duration,
    pub sampler_output: SolveOutput,
    pub outputfiles_basename: PathBuf,
}

impl SamplerResult {
    pub fn num_samples(&self) -> usize {
        self.samples.nrows()
    }

    /// Draws of one search parameter, `None` if it was not written out.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let j = self.search_parameter_keys.iter().position(|key| key == name)?;
        if j >= self.samples.ncols() {
            return None;
        }
        Some((0..self.samples.nrows()).map(|i| self.samples[(i, j)]).collect())
    }
}

pub struct Sampler<L: LogLikelihood, E: NestedSamplingEngine> {
    likelihood: L,
    priors: PriorDict,
    engine: E,
    args: SamplerArgs,
    settings: MultinestSettings,
    search_parameter_keys: Vec<String>,
    fixed_parameters: Vec<(String, f64)>,
    outputfiles_basename: PathBuf,
    use_temporary_directory: bool,
    log_noise_evidence: f64,
    dump_callback: Option<DumpCallback>,
}

impl<L: LogLikelihood, E: NestedSamplingEngine> Sampler<L, E> {
    /// Validate everything about the run before touching the filesystem,
    /// then create the output directory.
    pub fn new(
        mut likelihood: L,
        priors: PriorDict,
        engine: E,
        args: SamplerArgs,
        options: &Map<String, Value>,
    ) -> Result<Self, SamplerError> {
        let mut settings = MultinestSettings::from_options(options)?;
        let search_parameter_keys = priors.search_parameter_keys();
        let fixed_parameters = priors.fixed_parameters();
        let ndim = search_parameter_keys.len();
        if ndim == 0 {
            return Err(ConfigError::InvalidValue("there are no search parameters".into()).into());
        }

        match &settings.wrapped_params {
            Some(flags) if flags.len() != ndim => {
                return Err(ConfigError::WrappedParamsLength {
                    expected: ndim,
                    found: flags.len(),
                }
                .into());
            }
            Some(_) => {}
            None => settings.wrapped_params = Some(apply_boundaries(&priors)),
        }
        match settings.n_params {
            Some(0) => {
                return Err(ConfigError::InvalidValue("n_params must be at least 1".into()).into());
            }
            Some(n_params) if n_params > ndim => {
                return Err(ConfigError::InvalidValue(format!(
                    "n_params is {n_params} but there are only {ndim} search parameters"
                ))
                .into());
            }
            Some(_) => {}
            None => settings.n_params = Some(ndim),
        }
        if settings.init_mpi {
            warn!("init_MPI is set, but MPI is never initialised here");
        }

        for (key, value) in &fixed_parameters {
            likelihood.set_parameter(key, *value)?;
        }
        for (key, prior) in priors.search_priors() {
            likelihood.set_parameter(key, prior.rescale(0.5))?;
        }

        let log_noise_evidence = likelihood.noise_log_likelihood()?;
        if args.use_ratio && !log_noise_evidence.is_finite() {
            return Err(ConfigError::InvalidValue(
                "use_ratio needs a likelihood with a finite noise log-likelihood".into(),
            )
            .into());
        }

        let mut use_temporary_directory = args.temporary_directory;
        if use_temporary_directory && mpi_environment_detected() {
            info!("MPI environment detected, not using a temporary directory");
            use_temporary_directory = false;
        }

        let outputfiles_basename = settings
            .outputfiles_basename
            .clone()
            .unwrap_or_else(|| args.outdir.join(format!("pm_{}", args.label)));
        settings.outputfiles_basename = Some(outputfiles_basename.clone());
        fs::create_dir_all(&args.outdir)
            .with_context(|| format!("Failed to create output directory {:?}", args.outdir))?;

        Ok(Self {
            likelihood,
            priors,
            engine,
            args,
            settings,
            search_parameter_keys,
            fixed_parameters,
            outputfiles_basename,
            use_temporary_directory,
            log_noise_evidence,
            dump_callback: None,
        })
    }

    pub fn with_dump_callback(mut self, callback: impl FnMut(&DumpInfo<'_>) + 'static) -> Self {
        self.dump_callback = Some(Box::new(callback));
        self
    }

    /// The options after defaults, alias resolution and derived values.
    pub fn settings(&self) -> &MultinestSettings {
        &self.settings
    }

    pub fn search_parameter_keys(&self) -> &[String] {
        &self.search_parameter_keys
    }

    pub fn outputfiles_basename(&self) -> &Path {
        &self.outputfiles_basename
    }

    pub fn uses_temporary_directory(&self) -> bool {
        self.use_temporary_directory
    }

    pub fn likelihood(&self) -> &L {
        &self.likelihood
    }

    pub fn run_sampler(&mut self) -> Result<SamplerResult, SamplerError> {
        let _guard = SignalGuard::install()?;
        let mut rundir = RunDirectory::new(&self.outputfiles_basename, self.use_temporary_directory);
        rundir.setup()?;

        let start = Instant::now();
        let mut problem = SamplerProblem {
            likelihood: &mut self.likelihood,
            priors: &self.priors,
            search_parameter_keys: &self.search_parameter_keys,
            fixed_parameters: &self.fixed_parameters,
            log_noise_evidence: self.log_noise_evidence,
            use_ratio: self.args.use_ratio,
            exit_code: self.args.exit_code,
            rundir: &mut rundir,
            dump_callback: self.dump_callback.take(),
            num_calls: 0,
        };
        let solved = self
            .engine
            .solve(&mut problem, &self.settings, &self.outputfiles_basename);
        let num_likelihood_evaluations = problem.num_calls;
        self.dump_callback = problem.dump_callback.take();
        let sampling_time = start.elapsed();

        let cleaned = rundir.clean_up();
        if pending_signal().is_some() {
            // arrived after the engine's last check
            exit_after_checkpoint(&mut rundir, self.args.exit_code);
        }
        let output = solved.map_err(|err| match err.downcast::<LikelihoodError>() {
            Ok(err) => SamplerError::Likelihood(err),
            Err(err) => SamplerError::Io(err),
        })?;
        cleaned?;

        let (samples, mut log_likelihood_evaluations) =
            load_post_equal_weights(&self.outputfiles_basename)?;
        let written = samples.ncols().min(self.search_parameter_keys.len());
        if written != self.search_parameter_keys.len() {
            info!(
                "{} holds {} of {} search parameters",
                self.outputfiles_basename.display(),
                written,
                self.search_parameter_keys.len()
            );
        }

        let (log_evidence, log_bayes_factor) = if self.args.use_ratio {
            log_likelihood_evaluations
                .iter_mut()
                .for_each(|log_l| *log_l += self.log_noise_evidence);
            (output.log_z + self.log_noise_evidence, output.log_z)
        } else {
            (output.log_z, output.log_z - self.log_noise_evidence)
        };

        info!(
            "Sampling took {:.1?}: ln Z = {:.3} +/- {:.3}, ln BF = {:.3}",
            sampling_time, log_evidence, output.log_z_err, log_bayes_factor
        );

        Ok(SamplerResult {
            label: self.args.label.clone(),
            outdir: self.args.outdir.clone(),
            search_parameter_keys: self.search_parameter_keys[..written].to_vec(),
            fixed_parameters: self.fixed_parameters.clone(),
            samples,
            log_likelihood_evaluations,
            log_evidence,
            log_evidence_err: output.log_z_err,
            log_noise_evidence: self.log_noise_evidence,
            log_bayes_factor,
            num_likelihood_evaluations,
            sampling_time,
            sampler_output: output,
            outputfiles_basename: self.outputfiles_basename.clone(),
        })
    }
}

/// Move the output back into place and end the process.
fn exit_after_checkpoint(rundir: &mut RunDirectory, exit_code: i32) -> ! {
    match pending_signal() {
        Some(signal) => info!("Caught {}, writing checkpoint and exiting", signal),
        None => info!("Writing checkpoint and exiting"),
    }
    if let Err(err) = rundir.move_temporary_directory_to_proper_path() {
        error!("Failed to move the temporary directory back: {:#}", err);
    }
    info!("Exiting with code {}", exit_code);
    std::process::exit(exit_code)
}

/// What the engine sees of a run.
struct SamplerProblem<'a, L: LogLikelihood> {
    likelihood: &'a mut L,
    priors: &'a PriorDict,
    search_parameter_keys: &'a [String],
    fixed_parameters: &'a [(String, f64)],
    log_noise_evidence: f64,
    use_ratio: bool,
    exit_code: i32,
    rundir: &'a mut RunDirectory,
    dump_callback: Option<DumpCallback>,
    num_calls: u64,
}

impl<L: LogLikelihood> NestedProblem for SamplerProblem<'_, L> {
    fn n_dims(&self) -> usize {
        self.search_parameter_keys.len()
    }

    fn prior_transform(&self, unit: &[f64], physical: &mut [f64]) {
        self.priors.rescale(unit, physical);
    }

    fn log_likelihood(&mut self, physical: &[f64]) -> Result<f64, LikelihoodError> {
        for (key, value) in self.fixed_parameters {
            self.likelihood.set_parameter(key, *value)?;
        }
        for (key, value) in self.search_parameter_keys.iter().zip(physical) {
            self.likelihood.set_parameter(key, *value)?;
        }
        self.num_calls += 1;
        let log_l = self.likelihood.log_likelihood()?;
        if self.use_ratio {
            Ok(log_l - self.log_noise_evidence)
        } else {
            Ok(log_l)
        }
    }

    fn interrupt_requested(&self) -> bool {
        pending_signal().is_some()
    }

    fn write_current_state_and_exit(&mut self) -> ! {
        exit_after_checkpoint(self.rundir, self.exit_code)
    }

    fn dump(&mut self, info: &DumpInfo<'_>) {
        if let Some(callback) = self.dump_callback.as_mut() {
            callback(info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        nested::RandomWalkEngine,
        prior::{DeltaFunction, Uniform},
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Parabola {
        x: f64,
        offset: f64,
        noise: Option<f64>,
    }

    impl LogLikelihood for Parabola {
        fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), LikelihoodError> {
            match name {
                "x" | "phase" => self.x = value,
                "offset" => self.offset = value,
                _ => return Err(LikelihoodError::UnknownParameter(name.to_string())),
            }
            Ok(())
        }

        fn log_likelihood(&self) -> Result<f64, LikelihoodError> {
            Ok(-0.5 * (self.x - self.offset).powi(2))
        }

        fn noise_log_likelihood(&self) -> Result<f64, LikelihoodError> {
            Ok(self.noise.unwrap_or(f64::NAN))
        }
    }

    fn options(value: Value) -> Map<String, Value> {
        let Value::Object(map) = value else { panic!() };
        map
    }

    fn args(outdir: &Path) -> SamplerArgs {
        SamplerArgs {
            outdir: outdir.to_path_buf(),
            label: "test".into(),
            temporary_directory: false,
            ..SamplerArgs::default()
        }
    }

    #[test]
    fn wrap_flags_follow_search_priors() {
        let priors = PriorDict::new()
            .with("x", Uniform::new(0., 1.))
            .with("fixed", DeltaFunction { peak: 1. })
            .with(
                "phase",
                Uniform::new(0., std::f64::consts::TAU).with_boundary(Boundary::Periodic),
            )
            .with("y", Uniform::new(0., 1.).with_boundary(Boundary::Reflective));
        assert_eq!(apply_boundaries(&priors), vec![0, 1, 0]);
    }

    #[test]
    fn derived_settings() {
        let scratch = tempfile::tempdir().unwrap();
        let priors = PriorDict::new()
            .with("x", Uniform::new(-1., 1.))
            .with(
                "phase",
                Uniform::new(0., 1.).with_boundary(Boundary::Periodic),
            );
        let sampler = Sampler::new(
            Parabola::default(),
            priors,
            RandomWalkEngine::default(),
            args(scratch.path()),
            &options(json!({"nlive": 10})),
        )
        .unwrap();

        assert_eq!(sampler.settings().wrapped_params, Some(vec![0, 1]));
        assert_eq!(sampler.settings().n_params, Some(2));
        assert_eq!(sampler.settings().n_live_points, 10);
        assert_eq!(
            sampler.outputfiles_basename(),
            scratch.path().join("pm_test")
        );
        assert!(!sampler.uses_temporary_directory());
    }

    #[test]
    fn invalid_runs_are_rejected_before_writing() {
        let scratch = tempfile::tempdir().unwrap();
        let outdir = scratch.path().join("never");
        let priors = || PriorDict::new().with("x", Uniform::new(-1., 1.));
        let build = |likelihood: Parabola, priors: PriorDict, args: SamplerArgs, value: Value| {
            Sampler::new(
                likelihood,
                priors,
                RandomWalkEngine::default(),
                args,
                &options(value),
            )
            .err()
            .unwrap()
        };

        let err = build(
            Parabola::default(),
            priors(),
            args(&outdir),
            json!({"wrapped_params": [0, 1]}),
        );
        assert!(matches!(
            err,
            SamplerError::Config(ConfigError::WrappedParamsLength {
                expected: 1,
                found: 2
            })
        ));

        let err = build(Parabola::default(), priors(), args(&outdir), json!({"n_params": 2}));
        assert!(matches!(err, SamplerError::Config(ConfigError::InvalidValue(_))));

        let err = build(Parabola::default(), priors(), args(&outdir), json!({"n_params": 0}));
        assert!(matches!(err, SamplerError::Config(ConfigError::InvalidValue(_))));

        let err = build(
            Parabola::default(),
            PriorDict::new().with("mass", Uniform::new(1., 2.)),
            args(&outdir),
            json!({}),
        );
        assert!(matches!(
            err,
            SamplerError::Likelihood(LikelihoodError::UnknownParameter(_))
        ));

        let ratio = SamplerArgs {
            use_ratio: true,
            ..args(&outdir)
        };
        let err = build(Parabola::default(), priors(), ratio, json!({}));
        assert!(matches!(err, SamplerError::Config(ConfigError::InvalidValue(_))));

        let err = build(
            Parabola::default(),
            priors(),
            args(&outdir),
            json!({"npoints": 10, "nlive": 20}),
        );
        assert!(matches!(
            err,
            SamplerError::Config(ConfigError::Conflicting { .. })
        ));

        assert!(!outdir.exists());
    }

    #[test]
    fn fewer_output_parameters_than_search_parameters() {
        let scratch = tempfile::tempdir().unwrap();
        let priors = PriorDict::new()
            .with("x", Uniform::new(-5., 5.))
            .with("phase", Uniform::new(0., 1.));
        let mut sampler = Sampler::new(
            Parabola::default(),
            priors,
            RandomWalkEngine::default(),
            args(scratch.path()),
            &options(json!({"nlive": 50, "seed": 2, "n_params": 1, "verbose": false})),
        )
        .unwrap();
        let result = sampler.run_sampler().unwrap();

        assert_eq!(result.samples.ncols(), 1);
        assert_eq!(result.search_parameter_keys, vec!["x".to_string()]);
        assert_eq!(result.column("x").unwrap().len(), result.num_samples());
        assert!(result.column("phase").is_none());
    }

    #[test]
    fn ratio_and_plain_runs_agree() {
        let run = |use_ratio: bool| {
            let scratch = tempfile::tempdir().unwrap();
            let priors = PriorDict::new()
                .with("x", Uniform::new(-5., 5.))
                .with("offset", DeltaFunction { peak: 1. });
            let likelihood = Parabola {
                noise: Some(-2.),
                ..Parabola::default()
            };
            let mut sampler = Sampler::new(
                likelihood,
                priors,
                RandomWalkEngine::default(),
                SamplerArgs {
                    use_ratio,
                    ..args(scratch.path())
                },
                &options(json!({"nlive": 100, "seed": 4, "verbose": false})),
            )
            .unwrap();
            sampler.run_sampler().unwrap()
        };

        let plain = run(false);
        let ratio = run(true);
        // ∫ exp(-(x - 1)²/2) dx / 10
        let expected = (2. * std::f64::consts::PI).sqrt().ln() - 10f64.ln();
        for result in [&plain, &ratio] {
            assert!((result.log_evidence - expected).abs() < 0.5);
            assert_eq!(result.log_noise_evidence, -2.);
            approx::assert_relative_eq!(
                result.log_bayes_factor,
                result.log_evidence + 2.,
                epsilon = 1e-9
            );
            assert!(result.log_likelihood_evaluations.iter().all(|&l| l <= 1e-9));
            assert_eq!(result.fixed_parameters, vec![("offset".to_string(), 1.)]);
            let x = result.column("x").unwrap();
            let mean = x.iter().sum::<f64>() / x.len() as f64;
            assert!((mean - 1.).abs() < 0.3, "{mean}");
        }
        assert!(plain.column("offset").is_none());
    }
}
