//! Writing candidates into the tuned program's configuration.
//!
//! A [`ConfigBackend`] is a pure text transformation: it locates the
//! declaration of each parameter and swaps its integer literal, leaving every
//! other byte alone. [`ConfigMutator`] binds a backend to the file on disk.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tt_types::{Candidate, ConfigurationError, ParameterSpace};

/// Default type tag for C++ tuning constants (`constexpr int64_t NAME = 42;`).
pub const DEFAULT_TYPE_TAG: &str = r"constexpr\s+int64_t";

/// Result of patching a configuration text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patched {
    pub text: String,
    pub applied: Vec<String>,
    pub missing: Vec<String>,
}

/// A configuration format whose integer parameters can be read and rewritten.
pub trait ConfigBackend: Send + Sync {
    /// Rewrite the literal of every parameter in `candidate` found in `text`.
    /// Names without a declaration are reported in `missing`, never an error.
    fn apply(&self, candidate: &Candidate, text: &str) -> Patched;

    /// Values currently declared in `text`, for the parameters it declares.
    fn read(&self, text: &str) -> Candidate;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigFormat {
    /// `<type-tag> NAME = <int>;` statements in source code.
    #[default]
    Declaration,
    /// `NAME = <int>` lines, optionally followed by a `#` or `;` comment.
    KeyValue,
}

pub fn build_backend(
    format: ConfigFormat,
    type_tag: &str,
    space: &ParameterSpace,
) -> Result<Box<dyn ConfigBackend>, ConfigurationError> {
    Ok(match format {
        ConfigFormat::Declaration => Box::new(DeclarationBackend::new(type_tag, space)?),
        ConfigFormat::KeyValue => Box::new(KeyValueBackend::new(space)?),
    })
}

/// One compiled pattern per parameter. Each pattern exposes `head`, `value`
/// and `tail` groups; only `value` is ever replaced.
#[derive(Debug, Clone)]
struct LiteralPatterns {
    patterns: Vec<(String, Regex)>,
}

impl LiteralPatterns {
    fn compile(
        space: &ParameterSpace,
        template: impl Fn(&str) -> String,
    ) -> Result<Self, ConfigurationError> {
        let mut patterns = Vec::with_capacity(space.len());
        for name in space.names() {
            let pattern = template(&regex::escape(name));
            let regex = Regex::new(&pattern).map_err(|e| ConfigurationError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            patterns.push((name.to_string(), regex));
        }
        Ok(Self { patterns })
    }

    fn find(&self, name: &str) -> Option<&Regex> {
        self.patterns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, regex)| regex)
    }

    fn apply(&self, candidate: &Candidate, text: &str) -> Patched {
        let mut text = text.to_string();
        let mut applied = Vec::new();
        let mut missing = Vec::new();

        for (name, value) in candidate.iter() {
            let Some(regex) = self.find(name).filter(|regex| regex.is_match(&text)) else {
                missing.push(name.to_string());
                continue;
            };
            text = regex
                .replace_all(&text, |caps: &Captures| {
                    format!("{}{}{}", &caps["head"], value, &caps["tail"])
                })
                .into_owned();
            applied.push(name.to_string());
        }

        Patched {
            text,
            applied,
            missing,
        }
    }

    fn read(&self, text: &str) -> Candidate {
        self.patterns
            .iter()
            .filter_map(|(name, regex)| {
                let caps = regex.captures(text)?;
                let value = caps["value"].parse::<i64>().ok()?;
                Some((name.as_str(), value))
            })
            .collect()
    }
}

/// Typed constant declarations terminated by `;`, e.g.
/// `constexpr int64_t OFI_THRESHOLD = 150000;`.
#[derive(Debug, Clone)]
pub struct DeclarationBackend {
    patterns: LiteralPatterns,
}

impl DeclarationBackend {
    pub fn new(type_tag: &str, space: &ParameterSpace) -> Result<Self, ConfigurationError> {
        Regex::new(type_tag).map_err(|e| ConfigurationError::InvalidPattern {
            pattern: type_tag.to_string(),
            message: e.to_string(),
        })?;
        let patterns = LiteralPatterns::compile(space, |name| {
            format!(r"(?P<head>(?:{type_tag})\s+{name}\s*=\s*)(?P<value>-?\d+)(?P<tail>\s*;)")
        })?;
        Ok(Self { patterns })
    }
}

impl ConfigBackend for DeclarationBackend {
    fn apply(&self, candidate: &Candidate, text: &str) -> Patched {
        self.patterns.apply(candidate, text)
    }

    fn read(&self, text: &str) -> Candidate {
        self.patterns.read(text)
    }

    fn name(&self) -> &str {
        "declaration"
    }
}

/// Line-oriented `NAME = 42` settings (`.env`, INI-style files).
#[derive(Debug, Clone)]
pub struct KeyValueBackend {
    patterns: LiteralPatterns,
}

impl KeyValueBackend {
    pub fn new(space: &ParameterSpace) -> Result<Self, ConfigurationError> {
        let patterns = LiteralPatterns::compile(space, |name| {
            format!(
                r"(?m)^(?P<head>[ \t]*{name}[ \t]*=[ \t]*)(?P<value>-?\d+)(?P<tail>[ \t]*(?:[#;][^\r\n]*)?\r?)$"
            )
        })?;
        Ok(Self { patterns })
    }
}

impl ConfigBackend for KeyValueBackend {
    fn apply(&self, candidate: &Candidate, text: &str) -> Patched {
        self.patterns.apply(candidate, text)
    }

    fn read(&self, text: &str) -> Candidate {
        self.patterns.read(text)
    }

    fn name(&self) -> &str {
        "key-value"
    }
}

/// What a file mutation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationReport {
    pub applied: Vec<String>,
    pub missing: Vec<String>,
    /// False when the file already held these values and was not rewritten.
    pub changed: bool,
}

/// Applies candidates to the configuration file on disk.
///
/// The only writer of that file during a search.
pub struct ConfigMutator {
    path: PathBuf,
    backend: Box<dyn ConfigBackend>,
}

impl ConfigMutator {
    pub fn new(path: impl Into<PathBuf>, backend: Box<dyn ConfigBackend>) -> Self {
        Self {
            path: path.into(),
            backend,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Values currently declared in the file.
    pub fn current_values(&self) -> io::Result<Candidate> {
        let text = fs::read_to_string(&self.path)?;
        Ok(self.backend.read(&text))
    }

    /// Write `candidate` into the file. Parameters without a declaration are
    /// logged and skipped, so the trial that follows tests fewer parameters
    /// than requested.
    pub fn apply(&self, candidate: &Candidate) -> io::Result<MutationReport> {
        let original = fs::read_to_string(&self.path)?;
        let patched = self.backend.apply(candidate, &original);

        for name in &patched.missing {
            warn!(
                "Parameter {} not found in {}; value not applied",
                name,
                self.path.display()
            );
        }

        let changed = patched.text != original;
        if changed {
            fs::write(&self.path, &patched.text)?;
        }
        debug!(
            "Applied {} of {} parameters to {} ({})",
            patched.applied.len(),
            candidate.len(),
            self.path.display(),
            self.backend.name()
        );

        Ok(MutationReport {
            applied: patched.applied,
            missing: patched.missing,
            changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tt_types::ParameterSpec;

    const STRATEGY_SOURCE: &str = r#"#include "strategy/StrategyEngine.hpp"

namespace hft {
namespace {
    constexpr int64_t ALPHA_NUM = 150;          // EWMA alpha (x/1024)
    constexpr int64_t OFI_THRESHOLD   =  100000 ;
    constexpr int64_t SKEW_DIVISOR=10000;
    constexpr double  INVENTORY_SKEW = 250;     // wrong type tag
    int64_t ALPHA_NUM_SHADOW = 7;
}
}
"#;

    fn space(names: &[&str]) -> ParameterSpace {
        ParameterSpace::new(
            names
                .iter()
                .map(|name| ParameterSpec::new(*name, -1_000_000, 1_000_000))
                .collect(),
        )
        .unwrap()
    }

    fn candidate(values: &[(&str, i64)]) -> Candidate {
        values.iter().copied().collect()
    }

    #[test]
    fn declaration_backend_replaces_only_literals() {
        let backend =
            DeclarationBackend::new(DEFAULT_TYPE_TAG, &space(&["ALPHA_NUM", "OFI_THRESHOLD", "SKEW_DIVISOR"]))
                .unwrap();
        let patched = backend.apply(
            &candidate(&[("ALPHA_NUM", 101), ("OFI_THRESHOLD", 250000), ("SKEW_DIVISOR", -5)]),
            STRATEGY_SOURCE,
        );

        assert!(patched.missing.is_empty());
        assert!(patched
            .text
            .contains("constexpr int64_t ALPHA_NUM = 101;          // EWMA alpha (x/1024)"));
        assert!(patched.text.contains("constexpr int64_t OFI_THRESHOLD   =  250000 ;"));
        assert!(patched.text.contains("constexpr int64_t SKEW_DIVISOR=-5;"));
        assert!(patched.text.contains("int64_t ALPHA_NUM_SHADOW = 7;"));
        assert_eq!(patched.text.len(), STRATEGY_SOURCE.len() - 3);
    }

    #[test]
    fn missing_declaration_is_skipped_not_fatal() {
        let backend =
            DeclarationBackend::new(DEFAULT_TYPE_TAG, &space(&["ALPHA_NUM", "INVENTORY_SKEW", "X"]))
                .unwrap();
        let patched = backend.apply(
            &candidate(&[("ALPHA_NUM", 120), ("INVENTORY_SKEW", 9), ("X", 3)]),
            STRATEGY_SOURCE,
        );

        assert_eq!(patched.applied, vec!["ALPHA_NUM".to_string()]);
        assert_eq!(
            patched.missing,
            vec!["INVENTORY_SKEW".to_string(), "X".to_string()]
        );
        assert!(patched.text.contains("ALPHA_NUM = 120;"));
        assert!(patched.text.contains("constexpr double  INVENTORY_SKEW = 250;"));
    }

    #[test]
    fn declaration_backend_reads_current_values() {
        let backend = DeclarationBackend::new(
            DEFAULT_TYPE_TAG,
            &space(&["ALPHA_NUM", "OFI_THRESHOLD", "SKEW_DIVISOR", "INVENTORY_SKEW"]),
        )
        .unwrap();
        let current = backend.read(STRATEGY_SOURCE);
        assert_eq!(
            current,
            candidate(&[("ALPHA_NUM", 150), ("OFI_THRESHOLD", 100000), ("SKEW_DIVISOR", 10000)])
        );
    }

    #[test]
    fn reapplying_read_values_is_a_no_op() {
        let backend =
            DeclarationBackend::new(DEFAULT_TYPE_TAG, &space(&["ALPHA_NUM", "SKEW_DIVISOR"])).unwrap();
        let current = backend.read(STRATEGY_SOURCE);
        let patched = backend.apply(&current, STRATEGY_SOURCE);
        assert_eq!(patched.text, STRATEGY_SOURCE);
    }

    #[test]
    fn custom_type_tag() {
        let backend = DeclarationBackend::new(r"(?:static\s+)?const\s+int", &space(&["DEPTH"])).unwrap();
        let text = "static const int DEPTH = 4;\nconst int DEPTH = 4;\n";
        let patched = backend.apply(&candidate(&[("DEPTH", 8)]), text);
        assert_eq!(patched.text, "static const int DEPTH = 8;\nconst int DEPTH = 8;\n");
    }

    #[test]
    fn bad_type_tag_is_a_configuration_error() {
        let err = DeclarationBackend::new("int64_t(", &space(&["A"])).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidPattern { .. }));
    }

    #[test]
    fn key_value_backend_keeps_comments_and_line_endings() {
        let text = "# tuning\r\nALPHA_NUM = 150 # ewma\r\nOFI_THRESHOLD=100000\r\nNOT_ALPHA_NUM = 3\r\n";
        let backend = KeyValueBackend::new(&space(&["ALPHA_NUM", "OFI_THRESHOLD"])).unwrap();

        assert_eq!(
            backend.read(text),
            candidate(&[("ALPHA_NUM", 150), ("OFI_THRESHOLD", 100000)])
        );

        let patched = backend.apply(
            &candidate(&[("ALPHA_NUM", 180), ("OFI_THRESHOLD", 60000)]),
            text,
        );
        assert_eq!(
            patched.text,
            "# tuning\r\nALPHA_NUM = 180 # ewma\r\nOFI_THRESHOLD=60000\r\nNOT_ALPHA_NUM = 3\r\n"
        );
    }

    #[test]
    fn mutator_writes_file_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("StrategyEngine.cpp");
        fs::write(&path, STRATEGY_SOURCE).unwrap();

        let space = space(&["ALPHA_NUM", "X"]);
        let backend = build_backend(ConfigFormat::Declaration, DEFAULT_TYPE_TAG, &space).unwrap();
        let mutator = ConfigMutator::new(&path, backend);

        let report = mutator
            .apply(&candidate(&[("ALPHA_NUM", 111), ("X", 1)]))
            .unwrap();
        assert!(report.changed);
        assert_eq!(report.missing, vec!["X".to_string()]);
        assert_eq!(mutator.current_values().unwrap().get("ALPHA_NUM"), Some(111));

        let again = mutator
            .apply(&candidate(&[("ALPHA_NUM", 111), ("X", 1)]))
            .unwrap();
        assert!(!again.changed);
    }
}
