//! End-to-end searches against a fake engine made of shell commands.
//!
//! The "build" copies the tuned source next to the binary (and refuses
//! `ALPHA_NUM = 13`), the "run" writes the compiled-in ALPHA_NUM to the
//! artifact, and the "analysis" reports it as the net PnL.

#![cfg(unix)]

use std::fs;
use tempfile::TempDir;
use tt_optimizer::{
    CommandSpec, ConfigFormat, HarnessConfig, MetricConfig, SearchConfig, StrategyKind,
    TargetConfig, TrialKind, TrialOutcome,
};
use tt_types::{ParameterSpec, TrialFailure};

const BUILD: &str = r#"
if grep -q "ALPHA_NUM = 13;" "$0"; then echo "error: ALPHA_NUM 13 overflows" >&2; exit 1; fi
cp "$0" engine.built
"#;

const RUN: &str = r#"grep -o "ALPHA_NUM = -*[0-9]*" engine.built | tr -dc "0-9-" > strategy_latencies.csv"#;

const ANALYZE: &str = r#"printf "  Trades : 10\n  Net PnL : %s.0 USDT\n" "$(cat "$0")""#;

const ENGINE: &str = "\
#include <cstdint>
namespace hft {
    constexpr int64_t ALPHA_NUM = 12;
    constexpr int64_t OFI_THRESHOLD = 100000;
}
";

fn sh(script: &str, args: &[&str]) -> CommandSpec {
    let mut all = vec!["-c".to_string(), script.to_string()];
    all.extend(args.iter().map(|arg| arg.to_string()));
    CommandSpec::new("sh", all)
}

/// Harness over a scratch checkout laid out like the real one: the source
/// file at the top and the commands running in `build/`.
fn harness(build_script: &str) -> (TempDir, HarnessConfig) {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("StrategyEngine.cpp");
    let build_dir = dir.path().join("build");
    fs::write(&source, ENGINE).unwrap();
    fs::create_dir(&build_dir).unwrap();

    let source_arg = source.display().to_string();
    let config = HarnessConfig {
        working_dir: build_dir,
        target: TargetConfig {
            path: source,
            ..TargetConfig::default()
        },
        // sh -c SCRIPT ARG0 makes ARG0 available as $0.
        build: sh(build_script, &[&source_arg]),
        run: sh(RUN, &[]),
        metric: MetricConfig {
            program: "sh".to_string(),
            // The artifact path is appended last and lands in $0.
            args: vec!["-c".to_string(), ANALYZE.to_string()],
            ..MetricConfig::default()
        },
        search: SearchConfig {
            strategy: StrategyKind::Grid,
            iterations: 5,
            seed: Some(1),
            exploration_weight: 0.3,
        },
        parameters: vec![ParameterSpec::new("ALPHA_NUM", 10, 14)],
    };
    (dir, config)
}

fn engine_text(dir: &TempDir) -> String {
    fs::read_to_string(dir.path().join("StrategyEngine.cpp")).unwrap()
}

fn built_text(dir: &TempDir) -> String {
    fs::read_to_string(dir.path().join("build").join("engine.built")).unwrap()
}

#[test]
fn grid_search_finds_and_restores_the_best_value() {
    let (dir, config) = harness(BUILD);
    let report = config.build_driver().unwrap().run().unwrap();

    // Baseline 12, then 10, 11, 12 (tie), 13 (build fails), 14.
    assert_eq!(report.trials.len(), 6);
    assert_eq!(report.trials[0].kind, TrialKind::Baseline);
    assert_eq!(report.trials[0].outcome.metric(), Some(12.0));
    assert!(matches!(
        &report.trials[4].outcome,
        TrialOutcome::Failed(TrialFailure::Build { exit_code: Some(1), output })
            if output.contains("overflows")
    ));

    assert_eq!(report.best.metric, 14.0);
    assert_eq!(report.best.trial_number, Some(5));
    assert_eq!(report.status.trials_failed, 1);
    assert!(report.restored);
    assert_eq!(report.final_build_succeeded, Some(true));

    assert!(engine_text(&dir).contains("constexpr int64_t ALPHA_NUM = 14;"));
    assert!(engine_text(&dir).contains("constexpr int64_t OFI_THRESHOLD = 100000;"));
    assert!(built_text(&dir).contains("ALPHA_NUM = 14;"));
}

#[test]
fn baseline_winner_is_rebuilt_at_the_end() {
    let (dir, mut config) = harness(BUILD);
    config.metric.args = vec![
        "-c".to_string(),
        r#"printf "Net PnL : -%s.0 USDT\n" "$(cat "$0")""#.to_string(),
    ];
    config.parameters = vec![ParameterSpec::new("ALPHA_NUM", 20, 30)];
    config.search.iterations = 3;

    let report = config.build_driver().unwrap().run().unwrap();

    assert_eq!(report.best.trial_number, Some(0));
    assert_eq!(report.best.metric, -12.0);
    assert_eq!(engine_text(&dir), ENGINE);
    assert!(built_text(&dir).contains("ALPHA_NUM = 12;"));
}

#[test]
fn broken_build_never_restores() {
    let (dir, mut config) = harness("echo 'make: *** No rule' >&2; exit 2");
    config.search.iterations = 2;

    let report = config.build_driver().unwrap().run().unwrap();

    assert!(report.best.is_empty());
    assert!(!report.restored);
    assert_eq!(report.status.trials_failed, 3);
    // Grid wrote 10 then 11; nothing was written back afterwards.
    assert!(engine_text(&dir).contains("ALPHA_NUM = 11;"));
    assert!(!dir.path().join("build").join("engine.built").exists());
}

#[test]
fn missing_analysis_line_fails_the_trial_only() {
    let (_dir, mut config) = harness(BUILD);
    config.metric.args = vec!["-c".to_string(), "echo 'No data found.'".to_string()];
    config.search.iterations = 2;

    let report = config.build_driver().unwrap().run().unwrap();

    assert_eq!(report.status.trials_failed, 3);
    assert!(report
        .trials
        .iter()
        .all(|t| matches!(t.outcome, TrialOutcome::Failed(TrialFailure::Metric(_)))));
    assert!(report.best.is_empty());
}

#[test]
fn key_value_target_is_tuned_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let env = dir.path().join("engine.env");
    fs::write(&env, "# strategy\nALPHA_NUM=12 # ewma\nOFI_THRESHOLD=100000\n").unwrap();

    let config = HarnessConfig {
        working_dir: dir.path().to_path_buf(),
        target: TargetConfig {
            path: env.clone(),
            format: ConfigFormat::KeyValue,
            ..TargetConfig::default()
        },
        build: sh("true", &[]),
        run: sh(
            r#"grep -o "^ALPHA_NUM=[0-9]*" engine.env | tr -dc "0-9" > out.csv"#,
            &[],
        ),
        metric: MetricConfig {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                r#"printf "Net PnL : +%s.5 USDT\n" "$(cat "$0")""#.to_string(),
            ],
            artifact: "out.csv".into(),
            ..MetricConfig::default()
        },
        search: SearchConfig {
            strategy: StrategyKind::Random,
            iterations: 8,
            seed: Some(99),
            exploration_weight: 0.3,
        },
        parameters: vec![ParameterSpec::new("ALPHA_NUM", 1, 40)],
    };

    let report = config.build_driver().unwrap().run().unwrap();

    let best = report.best.candidate.clone().unwrap();
    let alpha = best.get("ALPHA_NUM").unwrap();
    assert_eq!(report.best.metric, alpha as f64 + 0.5);
    assert!(report
        .trials
        .iter()
        .filter_map(|t| t.outcome.metric())
        .all(|m| m <= report.best.metric));
    assert_eq!(
        fs::read_to_string(&env).unwrap(),
        format!("# strategy\nALPHA_NUM={alpha} # ewma\nOFI_THRESHOLD=100000\n")
    );
}

#[test]
fn check_lists_current_values() {
    let (_dir, mut config) = harness(BUILD);
    config.parameters = vec![
        ParameterSpec::new("ALPHA_NUM", 10, 14),
        ParameterSpec::new("SKEW_DIVISOR", 5000, 15000),
    ];
    let values = config.inspect_target().unwrap();
    assert_eq!(values[0].1, Some(12));
    assert_eq!(values[1].1, None);
}
