//! The search loop: baseline, generated trials, restoration of the winner.

use chrono::Utc;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use tt_types::{Candidate, TrialFailure, TuneError, TuneResult};
use uuid::Uuid;

use crate::metric::{MetricExtractor, MetricSource};
use crate::mutator::ConfigMutator;
use crate::runner::{TrialExecutor, TrialRunner};
use crate::search::CandidateGenerator;
use crate::trial::{
    BestState, SearchReport, SearchState, SearchStatus, TrialKind, TrialOutcome, TrialResult,
};

/// Runs one search to completion, strictly one trial at a time.
///
/// The driver is the only owner of the best-so-far state and the only caller
/// of the mutator, so the configuration file never sees two writers.
pub struct SearchDriver<E = TrialRunner, M = MetricExtractor> {
    generator: Box<dyn CandidateGenerator>,
    mutator: ConfigMutator,
    executor: E,
    metric: M,
    artifact: PathBuf,
    iterations: usize,
}

impl<E: TrialExecutor, M: MetricSource> SearchDriver<E, M> {
    pub fn new(
        generator: Box<dyn CandidateGenerator>,
        mutator: ConfigMutator,
        executor: E,
        metric: M,
        artifact: impl Into<PathBuf>,
        iterations: usize,
    ) -> Self {
        Self {
            generator,
            mutator,
            executor,
            metric,
            artifact: artifact.into(),
            iterations,
        }
    }

    /// Run the baseline, `iterations` generated trials and the restoration.
    ///
    /// Per-trial failures are absorbed into the report. An error is returned
    /// only when the configuration file cannot be read before the baseline.
    /// A failed restoration write is reported in `restore_error`.
    pub fn run(&mut self) -> TuneResult<SearchReport> {
        let mut status = SearchStatus::new(self.generator.name(), self.iterations);
        let mut best = BestState::default();
        let mut trials = Vec::with_capacity(self.iterations + 1);

        info!(
            "Starting {} search: {} iterations on {}",
            self.generator.name(),
            self.iterations,
            self.mutator.path().display()
        );

        status.enter(SearchState::Baseline);
        let snapshot = self
            .mutator
            .current_values()
            .map_err(|e| TuneError::target_io(self.mutator.path(), e))?;
        info!("Benchmarking current configuration {}", snapshot);
        let baseline = self.trial(0, TrialKind::Baseline, snapshot, Vec::new());
        match &baseline.outcome {
            TrialOutcome::Succeeded { metric } => info!("Baseline metric: {:.4}", metric),
            TrialOutcome::Failed(failure) => {
                warn!("Baseline trial failed ({}); starting with no best", failure)
            }
        }
        self.generator.observe(&baseline.candidate, &baseline.outcome);
        best.consider(&baseline);
        status.record(&baseline);
        trials.push(baseline);

        status.enter(SearchState::Iterating);
        for number in 1..=self.iterations {
            let candidate = self.generator.next();
            info!("Iteration {}/{}: testing {}", number, self.iterations, candidate);

            let result = match self.mutator.apply(&candidate) {
                Ok(report) => self.trial(number, TrialKind::Generated, candidate, report.missing),
                Err(err) => {
                    let failure = TrialFailure::ConfigWrite {
                        path: self.mutator.path().display().to_string(),
                        message: err.to_string(),
                    };
                    failed_without_running(number, candidate, failure)
                }
            };
            self.generator.observe(&result.candidate, &result.outcome);

            let previous = best.best_metric();
            if best.consider(&result) {
                match previous {
                    Some(previous) => info!(
                        "  -> {:.4} NEW BEST (previous: {:.4})",
                        best.metric, previous
                    ),
                    None => info!("  -> {:.4} NEW BEST", best.metric),
                }
            } else {
                match &result.outcome {
                    TrialOutcome::Succeeded { metric } => info!("  -> {:.4}", metric),
                    TrialOutcome::Failed(failure) => warn!("  -> failed: {}", failure),
                }
            }

            status.record(&result);
            trials.push(result);
        }

        status.enter(SearchState::Restoring);
        let mut restore_error = None;
        let mut restored = false;
        let mut final_build_succeeded = None;
        match best.candidate.clone() {
            Some(candidate) => {
                info!("Restoring best parameters {}", candidate);
                match self.mutator.apply(&candidate) {
                    Ok(_) => {
                        restored = true;
                        let build = self.executor.build();
                        if !build.succeeded() {
                            error!(
                                "Final rebuild with the best parameters failed (exit code {:?})",
                                build.exit_code
                            );
                            log_output_tail("Build", &build.output);
                        }
                        final_build_succeeded = Some(build.succeeded());
                    }
                    Err(err) => {
                        let err = TuneError::target_io(self.mutator.path(), err);
                        error!("Could not write best parameters back: {}", err);
                        restore_error = Some(err.to_string());
                    }
                }
            }
            None => {
                warn!("No trial succeeded; no improving configuration found, nothing restored")
            }
        }

        status.enter(SearchState::Done);
        info!(
            "Search finished: {} succeeded, {} failed",
            status.trials_completed, status.trials_failed
        );

        Ok(SearchReport {
            status,
            best,
            trials,
            restored,
            final_build_succeeded,
            restore_error,
        })
    }

    /// Build, run and measure whatever is currently in the configuration.
    fn trial(
        &mut self,
        number: usize,
        kind: TrialKind,
        candidate: Candidate,
        missing_parameters: Vec<String>,
    ) -> TrialResult {
        let started_at = Utc::now();
        let mut raw_output = String::new();
        let outcome = self.evaluate(&mut raw_output);
        TrialResult {
            id: Uuid::new_v4(),
            trial_number: number,
            kind,
            candidate,
            outcome,
            missing_parameters,
            raw_output,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn evaluate(&mut self, raw_output: &mut String) -> TrialOutcome {
        let build = self.executor.build();
        raw_output.push_str(&build.output);
        if !build.succeeded() {
            log_output_tail("Build", &build.output);
            return TrialOutcome::Failed(TrialFailure::Build {
                exit_code: build.exit_code,
                output: build.output,
            });
        }

        let run = self.executor.run();
        raw_output.push_str(&run.output);
        if !run.succeeded() {
            log_output_tail("Run", &run.output);
            return TrialOutcome::Failed(TrialFailure::Run {
                exit_code: run.exit_code,
                output: run.output,
            });
        }

        match self.metric.extract(&self.artifact) {
            Ok(metric) => TrialOutcome::Succeeded { metric },
            Err(failure) => TrialOutcome::Failed(failure.into()),
        }
    }
}

/// Lines of failed process output shown at the default log level.
const OUTPUT_TAIL_LINES: usize = 20;

fn output_tail(output: &str, lines: usize) -> &str {
    let trimmed = output.trim_end();
    match trimmed.rmatch_indices('\n').nth(lines.saturating_sub(1)) {
        Some((index, _)) => &trimmed[index + 1..],
        None => trimmed,
    }
}

fn log_output_tail(step: &str, output: &str) {
    let tail = output_tail(output, OUTPUT_TAIL_LINES);
    if !tail.is_empty() {
        warn!("{} output (last {} lines):\n{}", step, OUTPUT_TAIL_LINES, tail);
    }
    debug!("{} output:\n{}", step, output);
}

fn failed_without_running(number: usize, candidate: Candidate, failure: TrialFailure) -> TrialResult {
    let now = Utc::now();
    TrialResult {
        id: Uuid::new_v4(),
        trial_number: number,
        kind: TrialKind::Generated,
        candidate,
        outcome: TrialOutcome::Failed(failure),
        missing_parameters: Vec::new(),
        raw_output: String::new(),
        started_at: now,
        finished_at: now,
    }
}
