//! Loading grabber configuration from files and the environment.

use daq_grabber::config::GrabberConfig;
use daq_grabber::error::{GrabberError, StartError};
use daq_grabber::manager::AcquisitionManager;
use daq_grabber::source::SourceRegistry;
use serial_test::serial;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

const CONFIG: &str = r#"
[global]
time_between_launches_ms = 5
max_observations = 40
grace_period_ms = 10
drain_divisor = 4
log_level = "debug"

[[sources]]
label = "counter"
driver = "mock_counter"
process_rate_hz = 20.0
[sources.params]
records_per_tick = 2

[[sources]]
label = "adc"
driver = "mock_signal"
process_rate_hz = 10.0
[sources.params]
samples_per_tick = 8
seed = 1

[[sources]]
label = "spare"
driver = "mock_counter"
process_rate_hz = 1.0
ignore = true
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
#[serial]
fn loads_file_into_manager_settings() {
    let file = write_config(CONFIG);
    let config = GrabberConfig::load_from(file.path()).expect("load");
    config.validate().expect("valid");

    assert_eq!(config.global.stagger(), Duration::from_millis(5));
    assert_eq!(config.global.grace_period(), Duration::from_millis(10));

    let settings = config.manager_settings();
    assert_eq!(settings.max_observations, 40);
    assert_eq!(settings.drain_policy.divisor(), 4);

    let labels: Vec<_> = config.source_configs().into_iter().map(|s| s.label).collect();
    assert_eq!(labels, vec!["counter", "adc", "spare"]);
}

#[test]
#[serial]
fn environment_overrides_file_values() {
    let file = write_config(CONFIG);
    std::env::set_var("DAQ_GRABBER_GLOBAL__MAX_OBSERVATIONS", "7");
    let loaded = GrabberConfig::load_from(file.path());
    std::env::remove_var("DAQ_GRABBER_GLOBAL__MAX_OBSERVATIONS");

    assert_eq!(loaded.expect("load").global.max_observations, 7);
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = GrabberConfig::load_from(dir.path().join("absent.toml")).expect("load");
    assert!(config.sources.is_empty());
    assert_eq!(config.global.max_observations, 50);
}

#[test]
#[serial]
fn malformed_file_is_a_config_error() {
    let file = write_config("[global]\nmax_observations = \"many\"\n");
    assert!(matches!(
        GrabberConfig::load_from(file.path()),
        Err(GrabberError::Config(_))
    ));
}

#[test]
#[serial]
fn loaded_config_drives_a_generation() {
    let file = write_config(CONFIG);
    let config = GrabberConfig::load_from(file.path()).expect("load");
    let manager = AcquisitionManager::new(
        config.manager_settings(),
        Arc::new(SourceRegistry::with_mock_drivers()),
    );

    let summary = manager
        .start(config.source_configs(), config.global.stagger())
        .expect("start");
    assert_eq!(summary.spawned, vec!["counter", "adc"]);
    assert_eq!(summary.skipped, vec!["spare"]);

    std::thread::sleep(Duration::from_millis(120));
    let report = manager.stop(config.global.grace_period());
    assert!(report.is_clean());
    assert!(manager.store().len() > 0);
}

#[test]
#[serial]
fn zero_rate_in_file_rejects_only_that_source() {
    let file = write_config(
        r#"
        [[sources]]
        label = "ok"
        driver = "mock_counter"
        process_rate_hz = 20.0

        [[sources]]
        label = "broken"
        driver = "mock_counter"
        process_rate_hz = 0.0
        "#,
    );
    let config = GrabberConfig::load_from(file.path()).expect("load");
    let manager = AcquisitionManager::new(
        config.manager_settings(),
        Arc::new(SourceRegistry::with_mock_drivers()),
    );

    match manager.start(config.source_configs(), Duration::ZERO) {
        Err(StartError::InvalidSources { spawned, rejected }) => {
            assert_eq!(spawned, vec!["ok"]);
            assert_eq!(rejected.len(), 1);
            assert_eq!(rejected[0].label, "broken");
        }
        other => panic!("unexpected start result {other:?}"),
    }
    assert!(manager.is_running());
    manager.stop(Duration::ZERO);
}
