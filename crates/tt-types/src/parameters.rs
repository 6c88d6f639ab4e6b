//! Tunable parameter declarations and concrete candidate assignments.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::errors::ConfigurationError;

/// A single tunable integer parameter with inclusive bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Name of the declaration in the target configuration (e.g. "ALPHA_NUM").
    pub name: String,
    /// Inclusive lower bound.
    pub low: i64,
    /// Inclusive upper bound.
    pub high: i64,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, low: i64, high: i64) -> Self {
        Self {
            name: name.into(),
            low,
            high,
        }
    }

    /// Number of integer values in `[low, high]`, `None` if it does not fit.
    pub fn width(&self) -> Option<u64> {
        if self.low > self.high {
            return Some(0);
        }
        self.high.abs_diff(self.low).checked_add(1)
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.low..=self.high).contains(&value)
    }

    pub fn clamp(&self, value: i64) -> i64 {
        value.clamp(self.low, self.high)
    }
}

/// Validated, ordered, name-unique set of parameters.
///
/// Construction is the only place bounds and names are checked, so every
/// holder of a `ParameterSpace` may rely on `low <= high` and unique names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterSpace {
    parameters: Vec<ParameterSpec>,
}

impl ParameterSpace {
    pub fn new(parameters: Vec<ParameterSpec>) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::new();
        for spec in &parameters {
            if !is_identifier(&spec.name) {
                return Err(ConfigurationError::InvalidName {
                    name: spec.name.clone(),
                });
            }
            if spec.low > spec.high {
                return Err(ConfigurationError::InvalidBounds {
                    name: spec.name.clone(),
                    low: spec.low,
                    high: spec.high,
                });
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigurationError::DuplicateName {
                    name: spec.name.clone(),
                });
            }
        }
        Ok(Self { parameters })
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|spec| spec.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|spec| spec.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Total number of grid points, `None` on overflow.
    pub fn cardinality(&self) -> Option<u64> {
        let mut total: u64 = 1;
        for spec in &self.parameters {
            total = total.checked_mul(spec.width()?)?;
        }
        Some(total)
    }

    /// True when `candidate` assigns exactly this space's parameters, each
    /// within bounds.
    pub fn contains(&self, candidate: &Candidate) -> bool {
        candidate.len() == self.parameters.len()
            && self.parameters.iter().all(|spec| {
                candidate
                    .get(&spec.name)
                    .is_some_and(|value| spec.contains(value))
            })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// One concrete assignment of values, keyed by parameter name.
///
/// Built in one go from an iterator and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate {
    values: BTreeMap<String, i64>,
}

impl Candidate {
    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, i64)> for Candidate {
    fn from_iter<I: IntoIterator<Item = (S, i64)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}
