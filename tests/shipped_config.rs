//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "test"
//! ems_description: "Validation of configuration files shipped with the repository."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::time::Duration;

use r_bms_common::{AppConfig, LogLevel};
use r_bms_core::MonitorSettings;

fn read(path: &str) -> String {
    let full = Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn reference_config_parses_and_validates() {
    let config: AppConfig = read("configs/r-bms.toml").parse().unwrap();
    assert_eq!(config.bus.interface, "vcan0");
    assert_eq!(config.recorder.retention_days, 7);
    assert_eq!(config.recorder.extension, "csv");
    assert_eq!(config.api.listen.port(), 9090);
    assert_eq!(config.logging.level, LogLevel::Info);
}

#[test]
fn reference_config_matches_built_in_timing() {
    let config: AppConfig = read("configs/r-bms.toml").parse().unwrap();
    let settings = MonitorSettings::from_config(&config);
    assert_eq!(settings, MonitorSettings::default());
    assert_eq!(settings.keep_alive_interval, Duration::from_secs(20));
    assert_eq!(settings.record_interval, Duration::from_secs(60));
}
