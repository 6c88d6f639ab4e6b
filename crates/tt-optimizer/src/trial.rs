//! Trial records, best-so-far tracking and search run status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tt_types::{Candidate, TrialFailure};
use uuid::Uuid;

/// What a trial produced: a metric, or the reason it did not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    Succeeded { metric: f64 },
    Failed(TrialFailure),
}

impl TrialOutcome {
    pub fn metric(&self) -> Option<f64> {
        match self {
            Self::Succeeded { metric } => Some(*metric),
            Self::Failed(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// True when this outcome should replace `best`.
    ///
    /// A failure never beats anything and every success beats an empty best,
    /// so a failed trial always ranks below any real metric. Equal metrics do
    /// not replace the incumbent.
    pub fn beats(&self, best: Option<f64>) -> bool {
        match (self.metric(), best) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(metric), Some(best)) => metric > best,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialKind {
    /// The configuration exactly as found, before any mutation.
    Baseline,
    /// A candidate drawn from the search strategy.
    Generated,
}

/// Result of a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub id: Uuid,
    /// 0 for the baseline, 1..=N for generated trials.
    pub trial_number: usize,
    pub kind: TrialKind,
    pub candidate: Candidate,
    pub outcome: TrialOutcome,
    /// Parameters the configuration backend could not locate.
    pub missing_parameters: Vec<String>,
    /// Combined output of the build and run steps.
    #[serde(skip)]
    pub raw_output: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TrialResult {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Best candidate seen so far in one search run.
///
/// Owned by the search driver; starts empty at negative infinity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestState {
    pub candidate: Option<Candidate>,
    pub metric: f64,
    /// Trial number that produced the current best.
    pub trial_number: Option<usize>,
}

impl Default for BestState {
    fn default() -> Self {
        Self {
            candidate: None,
            metric: f64::NEG_INFINITY,
            trial_number: None,
        }
    }
}

impl BestState {
    pub fn is_empty(&self) -> bool {
        self.candidate.is_none()
    }

    pub fn best_metric(&self) -> Option<f64> {
        self.candidate.as_ref().map(|_| self.metric)
    }

    /// Replace the best with `result` if it is strictly better. Returns
    /// whether it did.
    pub fn consider(&mut self, result: &TrialResult) -> bool {
        if !result.outcome.beats(self.best_metric()) {
            return false;
        }
        if let Some(metric) = result.outcome.metric() {
            self.candidate = Some(result.candidate.clone());
            self.metric = metric;
            self.trial_number = Some(result.trial_number);
        }
        true
    }
}

/// Search driver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchState {
    Pending,
    Baseline,
    Iterating,
    Restoring,
    Done,
}

/// Aggregate status of a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStatus {
    pub id: Uuid,
    pub state: SearchState,
    pub strategy: String,
    pub iterations: usize,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SearchStatus {
    pub fn new(strategy: &str, iterations: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SearchState::Pending,
            strategy: strategy.to_string(),
            iterations,
            trials_completed: 0,
            trials_failed: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn enter(&mut self, state: SearchState) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if state == SearchState::Done {
            self.finished_at = Some(Utc::now());
        }
        self.state = state;
    }

    pub fn record(&mut self, result: &TrialResult) {
        if result.succeeded() {
            self.trials_completed += 1;
        } else {
            self.trials_failed += 1;
        }
    }
}

/// Everything a finished search hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub status: SearchStatus,
    pub best: BestState,
    pub trials: Vec<TrialResult>,
    /// Whether the best candidate was written back to the configuration.
    pub restored: bool,
    /// Outcome of the final rebuild, `None` when restoration was skipped.
    pub final_build_succeeded: Option<bool>,
    /// Why the best candidate could not be written back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_error: Option<String>,
}
