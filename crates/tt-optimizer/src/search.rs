//! Candidate generation strategies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;
use tt_types::{Candidate, ConfigurationError, ParameterSpace};

use crate::trial::TrialOutcome;

/// Common trait for all search strategies.
pub trait CandidateGenerator: Send {
    /// Produce the candidate for the next trial.
    fn next(&mut self) -> Candidate;

    /// Report a finished trial so adaptive strategies can learn.
    fn observe(&mut self, _candidate: &Candidate, _outcome: &TrialOutcome) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Selectable strategy, as named in the harness config and on the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Random,
    Grid,
    Perturbation,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Grid => "grid",
            Self::Perturbation => "perturbation",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "grid" => Ok(Self::Grid),
            "perturbation" => Ok(Self::Perturbation),
            _ => Err(ConfigurationError::UnknownStrategy {
                name: s.to_string(),
            }),
        }
    }
}

/// Build the generator for `kind`. A `seed` makes the random draws
/// reproducible; without one the RNG is seeded from the OS.
pub fn build_generator(
    kind: StrategyKind,
    space: ParameterSpace,
    seed: Option<u64>,
    exploration_weight: f64,
) -> Result<Box<dyn CandidateGenerator>, ConfigurationError> {
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    Ok(match kind {
        StrategyKind::Random => Box::new(RandomSearch::new(space, rng)),
        StrategyKind::Grid => Box::new(GridSearch::new(space)?),
        StrategyKind::Perturbation => {
            Box::new(PerturbationSearch::new(space, rng, exploration_weight))
        }
    })
}

fn sample_uniform(space: &ParameterSpace, rng: &mut StdRng) -> Candidate {
    space
        .parameters()
        .iter()
        .map(|spec| (spec.name.as_str(), rng.random_range(spec.low..=spec.high)))
        .collect()
}

// ---- Random search ----

/// Independent uniform sampling of every parameter, no memory of history.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: ParameterSpace,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: ParameterSpace, rng: StdRng) -> Self {
        Self { space, rng }
    }

    pub fn with_seed(space: ParameterSpace, seed: u64) -> Self {
        Self::new(space, StdRng::seed_from_u64(seed))
    }
}

impl CandidateGenerator for RandomSearch {
    fn next(&mut self) -> Candidate {
        sample_uniform(&self.space, &mut self.rng)
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Grid search ----

/// Exhaustive walk over every integer point of the space.
///
/// Points are decoded from a cursor in mixed radix (last parameter varies
/// fastest), so the grid is never materialized. The walk wraps around once
/// every point has been produced.
#[derive(Debug, Clone)]
pub struct GridSearch {
    space: ParameterSpace,
    total: u64,
    cursor: u64,
}

impl GridSearch {
    pub fn new(space: ParameterSpace) -> Result<Self, ConfigurationError> {
        let total = space.cardinality().ok_or_else(|| {
            ConfigurationError::Invalid("grid search space is too large to enumerate".into())
        })?;
        Ok(Self {
            space,
            total,
            cursor: 0,
        })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    fn point(&self, index: u64) -> Candidate {
        let mut rest = index;
        let mut values = Vec::with_capacity(self.space.len());
        for spec in self.space.parameters().iter().rev() {
            // Widths are nonzero and fit in u64; cardinality() checked both.
            let width = spec.width().unwrap_or(1).max(1);
            let digit = rest % width;
            rest /= width;
            let value = (i128::from(spec.low) + i128::from(digit)) as i64;
            values.push((spec.name.as_str(), value));
        }
        values.into_iter().collect()
    }
}

impl CandidateGenerator for GridSearch {
    fn next(&mut self) -> Candidate {
        if self.cursor == self.total && self.total > 0 {
            info!("Grid of {} points exhausted, starting over", self.total);
            self.cursor = 0;
        }
        let candidate = self.point(self.cursor);
        self.cursor += 1;
        candidate
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Perturbation search ----

/// Explore/exploit search around the best successful candidate seen so far.
///
/// Until a trial succeeds, and otherwise with probability
/// `exploration_weight`, it samples uniformly. The rest of the time it moves
/// each parameter of the best candidate by up to a tenth of its range.
#[derive(Debug, Clone)]
pub struct PerturbationSearch {
    space: ParameterSpace,
    rng: StdRng,
    exploration_weight: f64,
    best: Option<(Candidate, f64)>,
}

impl PerturbationSearch {
    pub fn new(space: ParameterSpace, rng: StdRng, exploration_weight: f64) -> Self {
        Self {
            space,
            rng,
            exploration_weight: exploration_weight.clamp(0.0, 1.0),
            best: None,
        }
    }

    fn exploit(&mut self, base: &Candidate) -> Candidate {
        let mut values = Vec::with_capacity(self.space.len());
        for spec in self.space.parameters() {
            let value = match base.get(&spec.name) {
                Some(current) => {
                    let radius = (spec.width().unwrap_or(u64::MAX) / 10).clamp(1, i64::MAX as u64)
                        as i64;
                    let delta = self.rng.random_range(-radius..=radius);
                    spec.clamp(current.saturating_add(delta))
                }
                None => self.rng.random_range(spec.low..=spec.high),
            };
            values.push((spec.name.as_str(), value));
        }
        values.into_iter().collect()
    }
}

impl CandidateGenerator for PerturbationSearch {
    fn next(&mut self) -> Candidate {
        let explore = self.rng.random_bool(self.exploration_weight);
        match self.best.clone() {
            Some((base, _)) if !explore => self.exploit(&base),
            _ => sample_uniform(&self.space, &mut self.rng),
        }
    }

    fn observe(&mut self, candidate: &Candidate, outcome: &TrialOutcome) {
        if let Some(metric) = outcome.metric() {
            let improves = self.best.as_ref().map_or(true, |(_, best)| metric > *best);
            if improves {
                self.best = Some((candidate.clone(), metric));
            }
        }
    }

    fn name(&self) -> &str {
        "perturbation"
    }
}
