//! Harness configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) describes the
//! stock setup: tune the four strategy constants in
//! `src/strategy/StrategyEngine.cpp`, build with `make replay_engine` in
//! `build/`, and score each run by the net PnL the analysis script reports.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tt_types::{
    config_error, ConfigurationError, ParameterSpace, ParameterSpec, TuneError, TuneResult,
};

use crate::driver::SearchDriver;
use crate::metric::MetricExtractor;
use crate::mutator::{build_backend, ConfigFormat, ConfigMutator, DEFAULT_TYPE_TAG};
use crate::runner::{CommandSpec, TrialRunner};
use crate::search::{build_generator, StrategyKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory the build, run and analysis commands execute in.
    pub working_dir: PathBuf,
    pub target: TargetConfig,
    pub build: CommandSpec,
    pub run: CommandSpec,
    pub metric: MetricConfig,
    pub search: SearchConfig,
    pub parameters: Vec<ParameterSpec>,
}

/// The file candidates are written into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub path: PathBuf,
    pub format: ConfigFormat,
    /// Regex matching the type in front of a declaration. Declaration
    /// format only.
    pub type_tag: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("src/strategy/StrategyEngine.cpp"),
            format: ConfigFormat::Declaration,
            type_tag: DEFAULT_TYPE_TAG.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Artifact produced by the run step, passed to the analysis command.
    pub artifact: PathBuf,
    pub label: String,
    pub unit: String,
}

impl MetricConfig {
    pub fn command(&self) -> CommandSpec {
        CommandSpec {
            program: self.program.clone(),
            args: self.args.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["../tools/analyze.py".to_string()],
            timeout_secs: None,
            artifact: PathBuf::from("strategy_latencies.csv"),
            label: "PnL".to_string(),
            unit: "USDT".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub strategy: StrategyKind,
    pub iterations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Probability of a uniform draw in perturbation search.
    pub exploration_weight: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Random,
            iterations: 20,
            seed: None,
            exploration_weight: 0.3,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("build"),
            target: TargetConfig::default(),
            build: CommandSpec::new("make", ["replay_engine"]),
            run: CommandSpec::new("./replay_engine", Vec::<String>::new()),
            metric: MetricConfig::default(),
            search: SearchConfig::default(),
            parameters: vec![
                // EWMA alpha, in 1/1024ths
                ParameterSpec::new("ALPHA_NUM", 100, 200),
                ParameterSpec::new("OFI_THRESHOLD", 50_000, 250_000),
                ParameterSpec::new("SKEW_DIVISOR", 5_000, 15_000),
                ParameterSpec::new("INVENTORY_SKEW", 0, 500),
            ],
        }
    }
}

impl HarnessConfig {
    pub fn load(path: impl AsRef<Path>) -> TuneResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Ok(Self::from_toml(&text)?)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigurationError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check everything that can be checked without touching the target, and
    /// build the parameter space.
    pub fn validate(&self) -> Result<ParameterSpace, ConfigurationError> {
        if self.parameters.is_empty() {
            return Err(ConfigurationError::EmptySpace);
        }
        let space = ParameterSpace::new(self.parameters.clone())?;
        if !(0.0..=1.0).contains(&self.search.exploration_weight) {
            return Err(config_error!(
                "search.exploration_weight must be within [0, 1], got {}",
                self.search.exploration_weight
            ));
        }
        let programs = [&self.build.program, &self.run.program, &self.metric.program];
        if programs.iter().any(|program| program.is_empty()) {
            return Err(config_error!("build, run and metric programs must not be empty"));
        }
        Ok(space)
    }

    fn mutator(&self, space: &ParameterSpace) -> Result<ConfigMutator, ConfigurationError> {
        let backend = build_backend(self.target.format, &self.target.type_tag, space)?;
        Ok(ConfigMutator::new(&self.target.path, backend))
    }

    /// Assemble a ready-to-run search from this configuration.
    pub fn build_driver(&self) -> Result<SearchDriver, ConfigurationError> {
        let space = self.validate()?;
        let mutator = self.mutator(&space)?;
        let generator = build_generator(
            self.search.strategy,
            space,
            self.search.seed,
            self.search.exploration_weight,
        )?;
        let runner = TrialRunner::new(&self.working_dir, self.build.clone(), self.run.clone());
        let extractor = MetricExtractor::new(
            &self.working_dir,
            self.metric.command(),
            &self.metric.label,
            &self.metric.unit,
        )?;
        Ok(SearchDriver::new(
            generator,
            mutator,
            runner,
            extractor,
            &self.metric.artifact,
            self.search.iterations,
        ))
    }

    /// Current value of every parameter in the target file, `None` where
    /// the file has no matching declaration.
    pub fn inspect_target(&self) -> TuneResult<Vec<(ParameterSpec, Option<i64>)>> {
        let space = self.validate()?;
        let mutator = self.mutator(&space)?;
        let current = mutator
            .current_values()
            .map_err(|e| TuneError::target_io(&self.target.path, e))?;
        Ok(space
            .parameters()
            .iter()
            .map(|spec| (spec.clone(), current.get(&spec.name)))
            .collect())
    }
}
