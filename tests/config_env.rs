//! Environment overrides of the layered configuration
//!
//! These tests mutate process environment variables, so they run serially.

use laser_sweep::config::{AppConfig, InstrumentKind};
use serial_test::serial;
use std::time::Duration;

fn clear(keys: &[&str]) {
    for key in keys {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("laser_sweep.toml");
    std::fs::write(&path, "[sweep]\ncycles = 2\nspeed_nm_per_s = 5.0\n").unwrap();

    std::env::set_var("LASER_SWEEP_SWEEP__CYCLES", "7");
    let config = AppConfig::load_from(&path);
    clear(&["LASER_SWEEP_SWEEP__CYCLES"]);

    let config = config.unwrap();
    assert_eq!(config.sweep.cycles, 7);
    assert_eq!(config.sweep.speed_nm_per_s, 5.0);
}

#[test]
#[serial]
fn test_env_selects_tcp_instruments() {
    let keys = [
        "LASER_SWEEP_INSTRUMENTS__LASER__KIND",
        "LASER_SWEEP_INSTRUMENTS__LASER__PORT",
        "LASER_SWEEP_SWEEP__START_TIMEOUT",
    ];
    std::env::set_var(keys[0], "tcp");
    std::env::set_var(keys[1], "5025");
    std::env::set_var(keys[2], "3s");
    let config = AppConfig::load_from("does/not/exist.toml");
    clear(&keys);

    let config = config.unwrap();
    assert_eq!(config.instruments.laser.kind, InstrumentKind::Tcp);
    assert_eq!(config.instruments.laser.port, 5025);
    assert_eq!(config.instruments.power_meter.kind, InstrumentKind::Simulated);
    assert_eq!(config.sweep.start_timeout, Duration::from_secs(3));
}

#[test]
#[serial]
fn test_invalid_env_value_fails_validation() {
    std::env::set_var("LASER_SWEEP_SWEEP__CYCLES", "0");
    let result = AppConfig::load_from("does/not/exist.toml");
    clear(&["LASER_SWEEP_SWEEP__CYCLES"]);

    assert!(result.is_err());
}
