// tests/config_load.rs
//
// Config resolution: env var path, explicit file, defaults. Env-touching tests run
// serially.

use std::io::Write;

use serial_test::serial;
use tempfile::NamedTempFile;

use slot_watcher::config::watcher::ENV_WATCHER_CONFIG_PATH;
use slot_watcher::{PollingMode, WatcherConfig};

fn write_toml(contents: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().expect("tempfile");
    f.write_all(contents.as_bytes()).expect("write toml");
    f
}

#[test]
#[serial]
fn env_path_wins() {
    let f = write_toml(
        r#"
        seen_ttl_secs = 120
        initial_mode = "aggressive"
        webhook_url = "http://hooks.local/slots"

        [aggressive]
        poll_interval_secs = 5
        min_delay_ms = 50
        max_delay_ms = 1000
        "#,
    );
    std::env::set_var(ENV_WATCHER_CONFIG_PATH, f.path());
    let cfg = WatcherConfig::load_default();
    std::env::remove_var(ENV_WATCHER_CONFIG_PATH);

    let cfg = cfg.expect("load via env");
    assert_eq!(cfg.seen_ttl().as_secs(), 120);
    assert_eq!(cfg.initial_mode, PollingMode::Aggressive);
    assert_eq!(cfg.profile(PollingMode::Aggressive).poll_interval().as_secs(), 5);
    assert_eq!(cfg.webhook_url.as_deref(), Some("http://hooks.local/slots"));
    // Untouched sections keep their defaults.
    assert_eq!(cfg.normal.poll_interval_secs, 60);
}

#[test]
#[serial]
fn missing_env_path_is_an_error() {
    std::env::set_var(ENV_WATCHER_CONFIG_PATH, "/definitely/not/here/watcher.toml");
    let res = WatcherConfig::load_default();
    std::env::remove_var(ENV_WATCHER_CONFIG_PATH);
    assert!(res.is_err());
}

#[test]
#[serial]
fn bundled_sample_matches_defaults() {
    std::env::remove_var(ENV_WATCHER_CONFIG_PATH);
    // Integration tests run from the package root, where config/watcher.toml lives.
    let cfg = WatcherConfig::load_default().expect("load bundled config");
    let defaults = WatcherConfig::default();
    assert_eq!(cfg.normal, defaults.normal);
    assert_eq!(cfg.aggressive, defaults.aggressive);
    assert_eq!(cfg.seen_ttl_secs, defaults.seen_ttl_secs);
    assert_eq!(cfg.initial_mode, PollingMode::Normal);
}

#[test]
fn invalid_toml_is_reported() {
    let f = write_toml("seen_ttl_secs = \"five minutes\"");
    let err = WatcherConfig::load_from_file(f.path()).unwrap_err();
    assert!(format!("{err:#}").contains("parsing watcher config"));
}
