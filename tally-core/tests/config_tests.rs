//! Loading `TallyConfig` from files on disk.

use std::io::Write;
use std::time::Duration;

use tally_core::{ConfigError, TallyConfig};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_full_config_from_path() {
    let file = write_config(
        r#"
        [engine]
        serialize_per_key = false
        refresh_on_settle = true
        event_capacity = 64

        [cache]
        default_max_staleness_ms = 5000

        [completion]
        undo_window_secs = 120
        utc_offset_minutes = -300
        "#,
    );

    let config = TallyConfig::from_path(file.path()).expect("config loads");
    config.validate().expect("config is valid");

    assert!(!config.engine.serialize_per_key);
    assert_eq!(config.engine.event_capacity, 64);
    assert_eq!(config.cache.default_max_staleness(), Duration::from_millis(5000));
    assert_eq!(config.completion.undo_window().duration, Duration::from_secs(120));
    assert_eq!(config.completion.offset().unwrap().local_minus_utc(), -300 * 60);
}

#[test]
fn empty_file_yields_defaults() {
    let file = write_config("");
    let config = TallyConfig::from_path(file.path()).unwrap();
    assert_eq!(config, TallyConfig::default());
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = TallyConfig::from_path(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn invalid_value_is_reported_by_validate() {
    let file = write_config("[completion]\nutc_offset_minutes = 1500\n");
    let config = TallyConfig::from_path(file.path()).unwrap();
    match config.validate() {
        Err(ConfigError::InvalidValue { field, .. }) => {
            assert_eq!(field, "completion.utc_offset_minutes")
        }
        other => panic!("expected invalid value, got {:?}", other),
    }
}
