use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Names accepted for the number of live points, canonical name first.
pub const LIVE_POINTS_ALIASES: [&str; 4] = ["n_live_points", "npoints", "nlive", "nlives"];

const OPTION_NAMES: [&str; 22] = [
    "importance_nested_sampling",
    "resume",
    "verbose",
    "sampling_efficiency",
    "n_live_points",
    "n_params",
    "n_clustering_params",
    "wrapped_params",
    "multimodal",
    "const_efficiency_mode",
    "evidence_tolerance",
    "n_iter_before_update",
    "null_log_evidence",
    "max_modes",
    "mode_tolerance",
    "outputfiles_basename",
    "seed",
    "context",
    "write_output",
    "log_zero",
    "max_iter",
    "init_MPI",
];

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown sampler option {0}")]
    UnknownOption(String),
    #[error("Options {keys:?} all set {canonical} with different values")]
    Conflicting {
        canonical: &'static str,
        keys: Vec<String>,
    },
    #[error("Invalid sampler option: {0}")]
    InvalidValue(String),
    #[error("wrapped_params has {found} entries but there are {expected} search parameters")]
    WrappedParamsLength { expected: usize, found: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EfficiencyMode {
    /// Tuned for parameter estimation.
    Parameter,
    /// Tuned for evidence estimation.
    Model,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SamplingEfficiency {
    Mode(EfficiencyMode),
    Value(f64),
}

impl SamplingEfficiency {
    pub fn value(&self) -> f64 {
        match self {
            SamplingEfficiency::Mode(EfficiencyMode::Parameter) => 0.8,
            SamplingEfficiency::Mode(EfficiencyMode::Model) => 0.3,
            SamplingEfficiency::Value(value) => *value,
        }
    }
}

impl Default for SamplingEfficiency {
    fn default() -> Self {
        SamplingEfficiency::Mode(EfficiencyMode::Parameter)
    }
}

/// Options passed to a nested sampling engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MultinestSettings {
    /// Use importance nested sampling for the evidence
    pub importance_nested_sampling: bool,
    /// Continue from the checkpoint files in the output directory if present
    pub resume: bool,
    /// Log progress at every update
    pub verbose: bool,
    pub sampling_efficiency: SamplingEfficiency,
    pub n_live_points: usize,
    /// Number of parameters written to the output files. Defaults to the
    /// number of search parameters.
    pub n_params: Option<usize>,
    pub n_clustering_params: Option<usize>,
    /// One flag per search parameter, 1 for periodic dimensions. Derived from
    /// the prior boundaries when not given.
    pub wrapped_params: Option<Vec<u8>>,
    pub multimodal: bool,
    /// Keep the proposal scale fixed instead of adapting it
    pub const_efficiency_mode: bool,
    /// Stop when the estimated remaining evidence changes `ln Z` by less
    pub evidence_tolerance: f64,
    /// Iterations between checkpoint writes
    pub n_iter_before_update: usize,
    pub null_log_evidence: f64,
    pub max_modes: usize,
    pub mode_tolerance: f64,
    /// Directory for the engine's files. Defaults to `{outdir}/pm_{label}/`.
    pub outputfiles_basename: Option<PathBuf>,
    /// Negative seeds draw from system entropy
    pub seed: i64,
    pub context: i64,
    pub write_output: bool,
    /// Log-likelihoods at or below this carry no evidence
    pub log_zero: f64,
    /// 0 means no limit
    pub max_iter: usize,
    #[serde(rename = "init_MPI")]
    pub init_mpi: bool,
}

impl Default for MultinestSettings {
    fn default() -> Self {
        Self {
            importance_nested_sampling: false,
            resume: true,
            verbose: true,
            sampling_efficiency: SamplingEfficiency::default(),
            n_live_points: 500,
            n_params: None,
            n_clustering_params: None,
            wrapped_params: None,
            multimodal: true,
            const_efficiency_mode: false,
            evidence_tolerance: 0.5,
            n_iter_before_update: 100,
            null_log_evidence: -1e90,
            max_modes: 100,
            mode_tolerance: -1e90,
            outputfiles_basename: None,
            seed: -1,
            context: 0,
            write_output: true,
            log_zero: -1e100,
            max_iter: 0,
            init_mpi: false,
        }
    }
}

/// Rename every alias of the live point count to `n_live_points`.
///
/// Several aliases may be given only if they agree.
pub fn translate_options(options: &Map<String, Value>) -> Result<Map<String, Value>, ConfigError> {
    let canonical = LIVE_POINTS_ALIASES[0];
    let mut translated = Map::new();
    let mut live_points: Vec<(String, Value)> = Vec::new();

    for (key, value) in options {
        if LIVE_POINTS_ALIASES.contains(&key.as_str()) {
            live_points.push((key.clone(), value.clone()));
        } else {
            translated.insert(key.clone(), value.clone());
        }
    }

    if let Some((_, first)) = live_points.first() {
        if live_points.iter().any(|(_, value)| value != first) {
            return Err(ConfigError::Conflicting {
                canonical,
                keys: live_points.into_iter().map(|(key, _)| key).collect(),
            });
        }
        translated.insert(canonical.to_string(), first.clone());
    }
    Ok(translated)
}

impl MultinestSettings {
    /// Merge user options over the defaults.
    pub fn from_options(options: &Map<String, Value>) -> Result<Self, ConfigError> {
        let options = translate_options(options)?;
        if let Some(key) = options
            .keys()
            .find(|key| !OPTION_NAMES.contains(&key.as_str()))
        {
            return Err(ConfigError::UnknownOption(key.clone()));
        }
        let settings: Self = serde_json::from_value(Value::Object(options))
            .map_err(|err| ConfigError::InvalidValue(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_live_points < 2 {
            return Err(ConfigError::InvalidValue(
                "n_live_points must be at least 2".into(),
            ));
        }
        let efficiency = self.sampling_efficiency.value();
        if !(efficiency > 0. && efficiency <= 1.) {
            return Err(ConfigError::InvalidValue(format!(
                "sampling_efficiency must be in (0, 1], got {efficiency}"
            )));
        }
        if !(self.evidence_tolerance > 0.) {
            return Err(ConfigError::InvalidValue(
                "evidence_tolerance must be positive".into(),
            ));
        }
        if self.n_iter_before_update == 0 {
            return Err(ConfigError::InvalidValue(
                "n_iter_before_update must be positive".into(),
            ));
        }
        if !self.write_output {
            return Err(ConfigError::InvalidValue(
                "write_output must be enabled, results are read from the output files".into(),
            ));
        }
        Ok(())
    }
}

/// Arguments of a sampling run that are not engine options.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerArgs {
    pub outdir: PathBuf,
    pub label: String,
    /// Sample `ln L - ln L_noise` instead of `ln L`
    pub use_ratio: bool,
    /// Process exit code after a signal-triggered checkpoint
    pub exit_code: i32,
    /// Let the engine write into a temporary directory linked from the
    /// output directory
    pub temporary_directory: bool,
}

impl Default for SamplerArgs {
    fn default() -> Self {
        Self {
            outdir: PathBuf::from("outdir"),
            label: "label".to_string(),
            use_ratio: false,
            exit_code: 77,
            temporary_directory: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn options(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn defaults() {
        let settings = MultinestSettings::from_options(&Map::new()).unwrap();
        assert_eq!(settings, MultinestSettings::default());
        assert_eq!(settings.sampling_efficiency.value(), 0.8);
    }

    #[test]
    fn merge_over_defaults() {
        let settings = MultinestSettings::from_options(&options(json!({
            "npoints": 5000,
            "resume": false,
            "sampling_efficiency": "model",
            "seed": 12,
            "init_MPI": false,
        })))
        .unwrap();
        assert_eq!(settings.n_live_points, 5000);
        assert!(!settings.resume);
        assert_eq!(settings.sampling_efficiency.value(), 0.3);
        assert_eq!(settings.seed, 12);
        assert_eq!(settings.evidence_tolerance, 0.5);

        let settings =
            MultinestSettings::from_options(&options(json!({"sampling_efficiency": 0.5})))
                .unwrap();
        assert_eq!(settings.sampling_efficiency, SamplingEfficiency::Value(0.5));
    }

    #[test]
    fn unknown_option() {
        let err = MultinestSettings::from_options(&options(json!({"walks": 100}))).unwrap_err();
        assert_eq!(err, ConfigError::UnknownOption("walks".into()));
    }

    #[test]
    fn invalid_values() {
        let err =
            MultinestSettings::from_options(&options(json!({"resume": "yes"}))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
        let err = MultinestSettings::from_options(&options(json!({"write_output": false})))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
        let err = MultinestSettings::from_options(&options(json!({"sampling_efficiency": 2.0})))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn conflicting_aliases() {
        let err = translate_options(&options(json!({"nlive": 100, "npoints": 200}))).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Conflicting {
                canonical: "n_live_points",
                ..
            }
        ));
    }

    proptest! {
        #[test]
        fn aliases_resolve_to_one_canonical_key(
            chosen in proptest::sample::subsequence(LIVE_POINTS_ALIASES.to_vec(), 1..=4),
            n in 2usize..10000,
        ) {
            let mut map = Map::new();
            for key in &chosen {
                map.insert(key.to_string(), json!(n));
            }
            map.insert("resume".into(), json!(false));

            let translated = translate_options(&map).unwrap();
            let present: Vec<_> = translated
                .keys()
                .filter(|key| LIVE_POINTS_ALIASES.contains(&key.as_str()))
                .collect();
            prop_assert_eq!(present, vec!["n_live_points"]);
            prop_assert_eq!(&translated["n_live_points"], &json!(n));

            let settings = MultinestSettings::from_options(&map).unwrap();
            prop_assert_eq!(settings.n_live_points, n);
        }
    }
}
