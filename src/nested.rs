//! Nested sampling engines.
//!
//! [`NestedSamplingEngine`] is the seam between the sampler adapter and the
//! algorithm that explores parameter space. The engine owns its loop and
//! calls back into a [`NestedProblem`] for prior transforms, likelihood
//! values and interruption checks.
//!
//! [`RandomWalkEngine`] is a reference implementation. Each iteration
//! removes the live point with the lowest likelihood and replaces it with a
//! point found by a random walk, started from another live point, that is
//! constrained to likelihoods at least as high as the removed one. Output
//! files follow the MultiNest layout, and are rewritten every
//! `n_iter_before_update` iterations so that a run can resume from them.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use faer::Mat;
use itertools::Itertools;
use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::{
    likelihood::LikelihoodError,
    math::{logaddexp, logsumexp},
    output::{
        read_table, rows_to_matrix, write_table, DEAD_POINTS, LIVE_POINTS, PHYSICAL_LIVE_POINTS,
        POST_EQUAL_WEIGHTS, RESUME, STATS,
    },
    settings::MultinestSettings,
};

/// Callbacks an engine uses while it explores parameter space.
pub trait NestedProblem {
    /// Number of sampled dimensions.
    fn n_dims(&self) -> usize;

    /// Map a point of the unit hypercube to physical parameters.
    fn prior_transform(&self, unit: &[f64], physical: &mut [f64]);

    fn log_likelihood(&mut self, physical: &[f64]) -> Result<f64, LikelihoodError>;

    /// True once the run has been asked to stop. Engines check this at safe
    /// points, write their checkpoint and call `write_current_state_and_exit`.
    fn interrupt_requested(&self) -> bool;

    fn write_current_state_and_exit(&mut self) -> !;

    /// Called after every checkpoint write.
    fn dump(&mut self, _info: &DumpInfo<'_>) {}
}

/// Progress information passed to `NestedProblem::dump`.
#[derive(Debug)]
pub struct DumpInfo<'a> {
    pub iteration: usize,
    pub n_live: usize,
    pub n_params: usize,
    /// Physical coordinates of the live points, one row each.
    pub live_points: &'a [Vec<f64>],
    pub log_z: f64,
    pub log_z_err: f64,
    pub max_log_likelihood: f64,
    pub context: i64,
}

/// What an engine returns besides its output files.
#[derive(Debug, Clone)]
pub struct SolveOutput {
    pub log_z: f64,
    pub log_z_err: f64,
    /// Kullback-Leibler divergence of posterior from prior, in nats.
    pub information: f64,
    /// Equally weighted posterior draws × parameters.
    pub samples: Mat<f64>,
    pub iterations: usize,
    pub num_likelihood_evaluations: u64,
}

pub trait NestedSamplingEngine {
    /// Run to completion, writing output files into `outputfiles_basename`.
    fn solve(
        &mut self,
        problem: &mut dyn NestedProblem,
        settings: &MultinestSettings,
        outputfiles_basename: &Path,
    ) -> Result<SolveOutput>;
}

/// Settings of the reference engine.
#[derive(Debug, Clone, Copy)]
pub struct RandomWalkEngine {
    /// Walk length at a sampling efficiency of 1; the actual walk length is
    /// `ceil(base_walks / efficiency)`.
    pub base_walks: usize,
    /// Acceptance rate the proposal scale adapts towards.
    pub target_acceptance: f64,
}

impl Default for RandomWalkEngine {
    fn default() -> Self {
        Self {
            base_walks: 20,
            target_acceptance: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
struct LivePoint {
    unit: Vec<f64>,
    physical: Vec<f64>,
    log_l: f64,
}

#[derive(Debug, Clone)]
struct DeadPoint {
    /// Only the first `n_params` coordinates are kept.
    physical: Vec<f64>,
    log_l: f64,
    log_weight: f64,
}

#[derive(Debug)]
struct NestState {
    live: Vec<LivePoint>,
    dead: Vec<DeadPoint>,
    iteration: usize,
    log_x: f64,
    log_z: f64,
    information: f64,
    scale: f64,
    num_calls: u64,
}

impl NestState {
    /// Add a point of prior mass `exp(log_width)` to the evidence.
    fn accumulate(&mut self, log_width: f64, log_l: f64, log_zero: f64) -> f64 {
        if log_l <= log_zero || !log_l.is_finite() {
            return f64::NEG_INFINITY;
        }
        let log_weight = log_width + log_l;
        let log_z_new = logaddexp(self.log_z, log_weight);
        self.information = if self.log_z == f64::NEG_INFINITY {
            log_l - log_z_new
        } else {
            (log_weight - log_z_new).exp() * log_l
                + (self.log_z - log_z_new).exp() * (self.information + self.log_z)
                - log_z_new
        };
        self.log_z = log_z_new;
        log_weight
    }

    fn log_z_err(&self) -> f64 {
        (self.information.max(0.) / self.live.len() as f64).sqrt()
    }

    fn max_log_likelihood(&self) -> f64 {
        self.live
            .iter()
            .map(|point| point.log_l)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    fn worst(&self) -> usize {
        self.live
            .iter()
            .position_min_by(|a, b| a.log_l.total_cmp(&b.log_l))
            .unwrap_or(0)
    }

    /// Dead points followed by the live points, each live point carrying an
    /// equal share of the remaining prior mass.
    fn weighted_points(&self, n_params: usize, log_zero: f64) -> (Vec<&[f64]>, Vec<f64>, Vec<f64>) {
        let log_share = self.log_x - (self.live.len() as f64).ln();
        let live = self.live.iter().map(|point| {
            let log_weight = if point.log_l <= log_zero || !point.log_l.is_finite() {
                f64::NEG_INFINITY
            } else {
                log_share + point.log_l
            };
            (&point.physical[..n_params], point.log_l, log_weight)
        });
        let dead = self
            .dead
            .iter()
            .map(|point| (point.physical.as_slice(), point.log_l, point.log_weight));
        let mut rows = Vec::new();
        let mut log_ls = Vec::new();
        let mut log_weights = Vec::new();
        for (row, log_l, log_weight) in dead.chain(live) {
            rows.push(row);
            log_ls.push(log_l);
            log_weights.push(log_weight);
        }
        (rows, log_ls, log_weights)
    }
}

/// Equal-weight resampling of the weighted points.
///
/// Draws the Kish effective sample size with systematic resampling.
fn equal_weight_indices<R: Rng + ?Sized>(log_weights: &[f64], rng: &mut R) -> Vec<usize> {
    let log_total = logsumexp(log_weights);
    if !log_total.is_finite() {
        return Vec::new();
    }
    let weights: Vec<f64> = log_weights
        .iter()
        .map(|w| (w - log_total).exp())
        .collect();
    let n_samples = (1. / weights.iter().map(|w| w * w).sum::<f64>()).floor().max(1.) as usize;

    let offset: f64 = rng.random();
    let mut indices = Vec::with_capacity(n_samples);
    let mut cumulative = 0.;
    let mut index = 0;
    for k in 0..n_samples {
        let target = (k as f64 + offset) / n_samples as f64;
        while index + 1 < weights.len() && cumulative + weights[index] <= target {
            cumulative += weights[index];
            index += 1;
        }
        indices.push(index);
    }
    indices
}

impl RandomWalkEngine {
    fn walks(&self, settings: &MultinestSettings) -> usize {
        (self.base_walks as f64 / settings.sampling_efficiency.value()).ceil() as usize
    }

    fn initial_state<R: Rng + ?Sized>(
        &self,
        problem: &mut dyn NestedProblem,
        settings: &MultinestSettings,
        rng: &mut R,
    ) -> Result<NestState> {
        let n_dims = problem.n_dims();
        let mut live = Vec::with_capacity(settings.n_live_points);
        for _ in 0..settings.n_live_points {
            let unit: Vec<f64> = (0..n_dims).map(|_| rng.random()).collect();
            let mut physical = vec![0.; n_dims];
            problem.prior_transform(&unit, &mut physical);
            let log_l = problem.log_likelihood(&physical)?;
            live.push(LivePoint {
                unit,
                physical,
                log_l,
            });
        }
        Ok(NestState {
            live,
            dead: Vec::new(),
            iteration: 0,
            log_x: 0.,
            log_z: f64::NEG_INFINITY,
            information: 0.,
            scale: 1.,
            num_calls: settings.n_live_points as u64,
        })
    }

    fn resume_state(
        &self,
        problem: &dyn NestedProblem,
        settings: &MultinestSettings,
        n_params: usize,
        dir: &Path,
    ) -> Result<NestState> {
        let n_dims = problem.n_dims();
        let header = read_table(&dir.join(RESUME))?;
        let Some(
            &[iteration, log_x, log_z, information, scale, num_calls, n_live, dims],
        ) = header.first().map(Vec::as_slice)
        else {
            bail!("Malformed resume file in {:?}", dir);
        };
        if n_live as usize != settings.n_live_points || dims as usize != n_dims {
            bail!(
                "Resume file in {:?} has {} live points in {} dimensions, expected {} in {}",
                dir,
                n_live,
                dims,
                settings.n_live_points,
                n_dims
            );
        }

        let live = read_table(&dir.join(LIVE_POINTS))?
            .into_iter()
            .map(|row| {
                if row.len() != n_dims + 1 {
                    bail!("Malformed live point file in {:?}", dir);
                }
                let mut physical = vec![0.; n_dims];
                problem.prior_transform(&row[..n_dims], &mut physical);
                Ok(LivePoint {
                    unit: row[..n_dims].to_vec(),
                    physical,
                    log_l: row[n_dims],
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if live.len() != settings.n_live_points {
            bail!("Resume file in {:?} does not match its live points", dir);
        }

        let dead = read_table(&dir.join(DEAD_POINTS))?
            .into_iter()
            .map(|row| {
                if row.len() != n_params + 2 {
                    bail!("Malformed dead point file in {:?}", dir);
                }
                Ok(DeadPoint {
                    physical: row[..n_params].to_vec(),
                    log_l: row[n_params],
                    log_weight: row[n_params + 1],
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(NestState {
            live,
            dead,
            iteration: iteration as usize,
            log_x,
            log_z,
            information,
            scale,
            num_calls: num_calls as u64,
        })
    }

    /// Draw a replacement for a live point with likelihood `log_l_min`.
    #[allow(clippy::too_many_arguments)]
    fn replacement<R: Rng + ?Sized>(
        &self,
        state: &mut NestState,
        worst: usize,
        problem: &mut dyn NestedProblem,
        settings: &MultinestSettings,
        wrapped: &[bool],
        walks: usize,
        rng: &mut R,
    ) -> Result<LivePoint> {
        let n_live = state.live.len();
        let n_dims = problem.n_dims();
        let log_l_min = state.live[worst].log_l;

        let start = if n_live > 1 {
            let other = rng.random_range(0..n_live - 1);
            if other >= worst {
                other + 1
            } else {
                other
            }
        } else {
            worst
        };
        let mut current = state.live[start].clone();

        let sigma: Vec<f64> = (0..n_dims)
            .map(|dim| {
                let mean = state.live.iter().map(|p| p.unit[dim]).sum::<f64>() / n_live as f64;
                let var = state
                    .live
                    .iter()
                    .map(|p| (p.unit[dim] - mean).powi(2))
                    .sum::<f64>()
                    / n_live as f64;
                var.sqrt().max(1e-8)
            })
            .collect();

        let mut accepted = 0usize;
        let mut proposal = vec![0.; n_dims];
        let mut physical = vec![0.; n_dims];
        'walk: for _ in 0..walks {
            for dim in 0..n_dims {
                let step: f64 = rng.sample(StandardNormal);
                let mut value = current.unit[dim] + state.scale * sigma[dim] * step;
                if wrapped[dim] {
                    value = value.rem_euclid(1.);
                } else if !(0. ..=1.).contains(&value) {
                    continue 'walk;
                }
                proposal[dim] = value;
            }
            problem.prior_transform(&proposal, &mut physical);
            let log_l = problem.log_likelihood(&physical)?;
            state.num_calls += 1;
            if log_l >= log_l_min {
                current.unit.copy_from_slice(&proposal);
                current.physical.copy_from_slice(&physical);
                current.log_l = log_l;
                accepted += 1;
            }
        }

        if !settings.const_efficiency_mode && walks > 0 {
            let acceptance = accepted as f64 / walks as f64;
            let update = (acceptance - self.target_acceptance)
                / (n_dims.max(1) as f64 * self.target_acceptance);
            state.scale = (state.scale * update.exp()).clamp(1e-6, 1e3);
        }
        Ok(current)
    }

    fn write_output_files<R: Rng + ?Sized>(
        &self,
        state: &NestState,
        settings: &MultinestSettings,
        n_params: usize,
        dir: &Path,
        rng: &mut R,
    ) -> Result<Mat<f64>> {
        let n_dims = state.live.first().map_or(0, |p| p.unit.len());

        let dead_rows: Vec<Vec<f64>> = state
            .dead
            .iter()
            .map(|point| {
                let mut row = point.physical.clone();
                row.push(point.log_l);
                row.push(point.log_weight);
                row
            })
            .collect();
        write_table(&dir.join(DEAD_POINTS), dead_rows.iter().map(Vec::as_slice))?;

        let live_rows: Vec<Vec<f64>> = state
            .live
            .iter()
            .map(|point| {
                let mut row = point.unit.clone();
                row.push(point.log_l);
                row
            })
            .collect();
        write_table(&dir.join(LIVE_POINTS), live_rows.iter().map(Vec::as_slice))?;

        let phys_live_rows: Vec<Vec<f64>> = state
            .live
            .iter()
            .map(|point| {
                let mut row = point.physical[..n_params].to_vec();
                row.push(point.log_l);
                row
            })
            .collect();
        write_table(
            &dir.join(PHYSICAL_LIVE_POINTS),
            phys_live_rows.iter().map(Vec::as_slice),
        )?;

        let (rows, log_ls, log_weights) = state.weighted_points(n_params, settings.log_zero);
        let indices = equal_weight_indices(&log_weights, rng);
        let posterior: Vec<Vec<f64>> = indices
            .iter()
            .map(|&i| {
                let mut row = rows[i].to_vec();
                row.push(log_ls[i]);
                row
            })
            .collect();
        write_table(
            &dir.join(POST_EQUAL_WEIGHTS),
            posterior.iter().map(Vec::as_slice),
        )?;

        let log_z = logaddexp(state.log_z, logsumexp(&log_weights[state.dead.len()..]));
        let stats = format!(
            "Nested Sampling Global Log-Evidence : {:e} +/- {:e}\n\
             Information : {:e}\n\
             Iterations : {}\n\
             Likelihood evaluations : {}\n",
            log_z,
            state.log_z_err(),
            state.information,
            state.iteration,
            state.num_calls,
        );
        fs::write(dir.join(STATS), stats)
            .with_context(|| format!("Failed to write file: {:?}", dir.join(STATS)))?;

        let header = [
            state.iteration as f64,
            state.log_x,
            state.log_z,
            state.information,
            state.scale,
            state.num_calls as f64,
            state.live.len() as f64,
            n_dims as f64,
        ];
        write_table(&dir.join(RESUME), [header.as_slice()])?;

        Ok(rows_to_matrix(&posterior, n_params))
    }

    fn update<R: Rng + ?Sized>(
        &self,
        state: &NestState,
        problem: &mut dyn NestedProblem,
        settings: &MultinestSettings,
        n_params: usize,
        dir: &Path,
        rng: &mut R,
    ) -> Result<()> {
        self.write_output_files(state, settings, n_params, dir, rng)?;
        let live_points: Vec<Vec<f64>> = state
            .live
            .iter()
            .map(|p| p.physical[..n_params].to_vec())
            .collect();
        let info = DumpInfo {
            iteration: state.iteration,
            n_live: state.live.len(),
            n_params,
            live_points: &live_points,
            log_z: state.log_z,
            log_z_err: state.log_z_err(),
            max_log_likelihood: state.max_log_likelihood(),
            context: settings.context,
        };
        problem.dump(&info);
        if settings.verbose {
            info!(
                "it={} logZ={:.3} +/- {:.3} max logL={:.3} ncall={} scale={:.3}",
                state.iteration,
                state.log_z,
                state.log_z_err(),
                state.max_log_likelihood(),
                state.num_calls,
                state.scale,
            );
        }
        Ok(())
    }
}

impl NestedSamplingEngine for RandomWalkEngine {
    fn solve(
        &mut self,
        problem: &mut dyn NestedProblem,
        settings: &MultinestSettings,
        outputfiles_basename: &Path,
    ) -> Result<SolveOutput> {
        let n_dims = problem.n_dims();
        let n_params = settings.n_params.unwrap_or(n_dims).min(n_dims);
        let wrapped: Vec<bool> = match &settings.wrapped_params {
            Some(flags) => {
                if flags.len() != n_dims {
                    bail!(
                        "wrapped_params has {} entries for {} dimensions",
                        flags.len(),
                        n_dims
                    );
                }
                flags.iter().map(|&flag| flag != 0).collect()
            }
            None => vec![false; n_dims],
        };
        if settings.importance_nested_sampling {
            warn!("Importance nested sampling is not supported by this engine, ignoring");
        }
        debug!(
            "Mode separation options ignored: multimodal={} max_modes={} mode_tolerance={} null_log_evidence={}",
            settings.multimodal, settings.max_modes, settings.mode_tolerance, settings.null_log_evidence
        );

        fs::create_dir_all(outputfiles_basename).with_context(|| {
            format!("Failed to create output directory {:?}", outputfiles_basename)
        })?;

        let resume_file = outputfiles_basename.join(RESUME);
        let mut state = if settings.resume && resume_file.exists() {
            info!("Resuming from {}", resume_file.display());
            self.resume_state(problem, settings, n_params, outputfiles_basename)?
        } else {
            let mut rng = seeded_rng(settings.seed, 0);
            self.initial_state(problem, settings, &mut rng)?
        };
        let mut rng = seeded_rng(settings.seed, state.iteration as u64 + 1);

        let n_live = settings.n_live_points as f64;
        let log_shrink = -1. / n_live;
        let log_width_factor = (-(log_shrink.exp())).ln_1p();
        let walks = self.walks(settings);

        loop {
            if problem.interrupt_requested() {
                self.write_output_files(&state, settings, n_params, outputfiles_basename, &mut rng)?;
                problem.write_current_state_and_exit();
            }

            let max_log_l = state.max_log_likelihood();
            let converged = max_log_l <= settings.log_zero
                || (state.log_z.is_finite()
                    && logaddexp(state.log_z, max_log_l + state.log_x) - state.log_z
                        < settings.evidence_tolerance);
            let exhausted = settings.max_iter > 0 && state.iteration >= settings.max_iter;
            if converged || exhausted {
                break;
            }

            let worst = state.worst();
            let log_width = state.log_x + log_width_factor;
            let worst_point = &state.live[worst];
            let log_l = worst_point.log_l;
            let physical = worst_point.physical[..n_params].to_vec();
            let log_weight = state.accumulate(log_width, log_l, settings.log_zero);
            state.dead.push(DeadPoint {
                physical,
                log_l,
                log_weight,
            });
            state.log_x += log_shrink;

            let replacement =
                self.replacement(&mut state, worst, problem, settings, &wrapped, walks, &mut rng)?;
            state.live[worst] = replacement;
            state.iteration += 1;

            if state.iteration % settings.n_iter_before_update == 0 {
                self.update(&state, problem, settings, n_params, outputfiles_basename, &mut rng)?;
            }
        }

        let samples =
            self.write_output_files(&state, settings, n_params, outputfiles_basename, &mut rng)?;

        let log_share = state.log_x - n_live.ln();
        let live: Vec<f64> = state.live.iter().map(|point| point.log_l).collect();
        for log_l in live {
            state.accumulate(log_share, log_l, settings.log_zero);
        }
        if !state.log_z.is_finite() {
            bail!("All likelihood values are at or below log_zero");
        }

        info!(
            "Finished after {} iterations: logZ={:.3} +/- {:.3}, {} likelihood evaluations",
            state.iteration,
            state.log_z,
            state.log_z_err(),
            state.num_calls
        );

        Ok(SolveOutput {
            log_z: state.log_z,
            log_z_err: state.log_z_err(),
            information: state.information,
            samples,
            iterations: state.iteration,
            num_likelihood_evaluations: state.num_calls,
        })
    }
}

/// Negative seeds use system entropy; otherwise the stream is offset by
/// `stream` so resumed runs do not repeat earlier draws.
fn seeded_rng(seed: i64, stream: u64) -> ChaCha8Rng {
    if seed < 0 {
        ChaCha8Rng::from_os_rng()
    } else {
        let mut rng = ChaCha8Rng::seed_from_u64(seed as u64);
        rng.set_stream(stream);
        rng
    }
}
