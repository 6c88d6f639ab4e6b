use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for TickTune.
///
/// Only errors that end a search run surface here. Per-trial problems are
/// carried as [`TrialFailure`] inside the trial record instead.
#[derive(Error, Debug)]
pub enum TuneError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Target file {path}: {source}")]
    TargetIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TuneError {
    pub fn target_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::TargetIo {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while building the parameter space or loading the harness
/// configuration. Always fatal, always before the first trial.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Parameter {name}: lower bound {low} is above upper bound {high}")]
    InvalidBounds { name: String, low: i64, high: i64 },

    #[error("Parameter {name} is declared more than once")]
    DuplicateName { name: String },

    #[error("Parameter name {name:?} is not an identifier")]
    InvalidName { name: String },

    #[error("No parameters to tune")]
    EmptySpace,

    #[error("Unknown search strategy: {name}")]
    UnknownStrategy { name: String },

    #[error("Invalid pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Malformed harness config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Why a single trial did not produce a metric.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialFailure {
    #[error("build failed ({})", exit_label(.exit_code))]
    Build {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("run failed ({})", exit_label(.exit_code))]
    Run {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("metric unavailable: {0}")]
    Metric(#[from] MetricFailure),

    #[error("could not write candidate to {path}: {message}")]
    ConfigWrite { path: String, message: String },
}

/// Metric extraction errors.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricFailure {
    #[error("analysis command failed ({})", exit_label(.exit_code))]
    Process {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("no \"Net {label} : <value> {unit}\" line in analysis output")]
    NoMatch { label: String, unit: String },

    #[error("unparseable metric value {value:?}")]
    Unparseable { value: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code".to_string(),
    }
}

/// Result type alias for TickTune operations
pub type TuneResult<T> = Result<T, TuneError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::ConfigurationError::Invalid(format!($($arg)*))
    };
}
