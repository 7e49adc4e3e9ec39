use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use drift_config::{DriftConfig, DriftConfigSource};
use tempfile::tempdir;

fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_when_nothing_is_configured() {
    let dir = tempdir().expect("tempdir");
    let load = DriftConfig::load_with(env(&[]), dir.path()).expect("load");

    assert_eq!(load.source, DriftConfigSource::Default);
    assert_eq!(load.config, DriftConfig::default());
    assert!(load.overrides.is_empty());
    assert!(load.warnings.is_empty());
}

#[test]
fn env_path_wins_over_default_files() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("drift.toml"), "[consolidation]\nsweep_interval_ms = 100\n").unwrap();
    let explicit = dir.path().join("explicit.json");
    fs::write(&explicit, r#"{"consolidation": {"sweep_interval_ms": 700}}"#).unwrap();

    let load = DriftConfig::load_with(
        env(&[("DRIFT_CONFIG_PATH", explicit.to_str().unwrap())]),
        dir.path(),
    )
    .expect("load");

    assert_eq!(load.source, DriftConfigSource::EnvPath(explicit));
    assert_eq!(load.config.consolidation.sweep_interval_ms, 700);
}

#[test]
fn inline_json_is_used_before_files() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("drift.toml"), "[consolidation]\nsweep_interval_ms = 100\n").unwrap();

    let load = DriftConfig::load_with(
        env(&[("DRIFT_CONFIG_JSON", r#"{"log_filter": "drift=trace"}"#)]),
        dir.path(),
    )
    .expect("load");

    assert_eq!(load.source, DriftConfigSource::EnvInline);
    assert_eq!(load.config.log_filter.as_deref(), Some("drift=trace"));
    assert_eq!(load.config.consolidation.sweep_interval_ms, 2_500);
}

#[test]
fn default_file_candidates_are_searched_in_order() {
    let dir = tempdir().expect("tempdir");
    fs::create_dir(dir.path().join("config")).unwrap();
    fs::write(
        dir.path().join("config/drift.toml"),
        "[consolidation]\nconsolidation_time_ms = 400\n",
    )
    .unwrap();

    let load = DriftConfig::load_with(env(&[]), dir.path()).expect("load");
    assert_eq!(
        load.source,
        DriftConfigSource::File(dir.path().join("config/drift.toml"))
    );
    assert_eq!(load.config.consolidation.consolidation_time_ms, 400);

    fs::write(dir.path().join("drift.json"), r#"{"consolidation": {"consolidation_time_ms": 300}}"#).unwrap();
    let load = DriftConfig::load_with(env(&[]), dir.path()).expect("load");
    assert_eq!(load.source, DriftConfigSource::File(dir.path().join("drift.json")));
    assert_eq!(load.config.consolidation.consolidation_time_ms, 300);
}

#[test]
fn overrides_apply_on_top_and_feed_guard_rails() {
    let dir = tempdir().expect("tempdir");
    let load = DriftConfig::load_with(
        env(&[
            ("DRIFT_MAX_DELAY_TIME", "2s"),
            ("DRIFT_SWEEP_INTERVAL", "5s"),
        ]),
        dir.path(),
    )
    .expect("load");

    assert_eq!(load.config.consolidation.max_delay_time_ms, 2_000);
    assert_eq!(load.config.consolidation.sweep_interval_ms, 5_000);
    assert_eq!(load.overrides.len(), 2);
    // default delay (2.5s) now exceeds the max delay, and sweeps are slower
    // than the max delay.
    assert_eq!(load.warnings.len(), 2);
}

#[test]
fn broken_files_report_their_path() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("drift.toml");
    fs::write(&path, "[consolidation\n").unwrap();

    let err = DriftConfig::load_with(env(&[]), dir.path()).unwrap_err();
    assert!(err.to_string().contains(&path.display().to_string()));
}

#[test]
fn rejected_values_fail_the_load() {
    let err = DriftConfig::load_with(
        env(&[("DRIFT_CONFIG_JSON", r#"{"consolidation": {"max_in_flight_tasks": 0}}"#)]),
        Path::new("/nonexistent"),
    )
    .unwrap_err();
    assert!(err.to_string().contains("max_in_flight_tasks"));
}

#[test]
fn late_sweep_interval_is_checked_against_max_delay() {
    let dir = tempdir().expect("tempdir");
    let load = DriftConfig::load_with(env(&[]), dir.path()).expect("load");
    assert!(load.warnings.is_empty());

    let load = load
        .with_sweep_interval(Duration::from_secs(30))
        .expect("still valid");
    assert_eq!(load.config.consolidation.sweep_interval_ms, 30_000);
    assert_eq!(load.warnings.len(), 1);
    assert!(load.warnings.items[0].message.contains("exceeds max_delay_time_ms"));

    let load = load
        .with_sweep_interval(Duration::from_millis(500))
        .expect("still valid");
    assert!(load.warnings.is_empty());
}
