//! Scalar metric extraction from the analysis collaborator's report.

use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;
use tt_types::{ConfigurationError, MetricFailure};

use crate::runner::{execute, CommandSpec};

/// Anything that can turn a run artifact into the metric to maximize.
pub trait MetricSource {
    fn extract(&mut self, artifact: &Path) -> Result<f64, MetricFailure>;
}

/// Runs the analysis command on the artifact and reads the
/// `Net <label> : <value> <unit>` line from its output.
#[derive(Debug, Clone)]
pub struct MetricExtractor {
    working_dir: PathBuf,
    command: CommandSpec,
    label: String,
    unit: String,
    pattern: Regex,
}

impl MetricExtractor {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        command: CommandSpec,
        label: &str,
        unit: &str,
    ) -> Result<Self, ConfigurationError> {
        let source = format!(
            r"Net\s+{}\s*:\s*(?P<value>[+-]?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)\s*{}",
            regex::escape(label),
            regex::escape(unit)
        );
        let pattern = Regex::new(&source).map_err(|e| ConfigurationError::InvalidPattern {
            pattern: source.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            working_dir: working_dir.into(),
            command,
            label: label.to_string(),
            unit: unit.to_string(),
            pattern,
        })
    }

    /// Find the metric in an analysis report.
    pub fn parse(&self, report: &str) -> Result<f64, MetricFailure> {
        let caps = self
            .pattern
            .captures(report)
            .ok_or_else(|| MetricFailure::NoMatch {
                label: self.label.clone(),
                unit: self.unit.clone(),
            })?;
        let value = &caps["value"];
        value
            .parse::<f64>()
            .ok()
            .filter(|metric| metric.is_finite())
            .ok_or_else(|| MetricFailure::Unparseable {
                value: value.to_string(),
            })
    }
}

impl MetricSource for MetricExtractor {
    fn extract(&mut self, artifact: &Path) -> Result<f64, MetricFailure> {
        let result = execute(&self.command, &self.working_dir, &[artifact.as_os_str()]);
        if !result.succeeded() {
            return Err(MetricFailure::Process {
                exit_code: result.exit_code,
                output: result.output,
            });
        }
        debug!("Analysis output:\n{}", result.output);
        self.parse(&result.output)
    }
}
