//! # tt-optimizer
//!
//! Parameter search and trial orchestration for TickTune.
//!
//! Provides candidate generation strategies (random, grid, perturbation),
//! in-place rewriting of the tuned program's configuration, blocking
//! build/run/analysis process execution, best-so-far tracking, and the
//! search driver that ties them together.

mod config;
mod driver;
mod metric;
mod mutator;
mod runner;
mod search;
mod trial;

pub use config::{HarnessConfig, MetricConfig, SearchConfig, TargetConfig};
pub use driver::SearchDriver;
pub use metric::{MetricExtractor, MetricSource};
pub use mutator::{
    build_backend, ConfigBackend, ConfigFormat, ConfigMutator, DeclarationBackend,
    KeyValueBackend, MutationReport, Patched, DEFAULT_TYPE_TAG,
};
pub use runner::{execute, CommandSpec, ProcessResult, TrialExecutor, TrialRunner};
pub use search::{
    build_generator, CandidateGenerator, GridSearch, PerturbationSearch, RandomSearch,
    StrategyKind,
};
pub use trial::{
    BestState, SearchReport, SearchState, SearchStatus, TrialKind, TrialOutcome, TrialResult,
};
