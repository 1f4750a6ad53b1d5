//! Unit tests for configuration and graceful degradation
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate MIZDB_DATABASE are marked with #[serial]
//! to ensure they run sequentially, not in parallel.

use mizdb_common::config::{
    default_database_path, resolve_database_path, MaintConfig, TomlConfig, DATABASE_ENV_VAR,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[test]
fn test_default_database_path_is_named_mizdb() {
    let path = default_database_path();
    assert_eq!(path.file_name().unwrap(), "mizdb.db");
    assert!(path.to_string_lossy().contains("mizdb"));
}

#[test]
#[serial]
fn test_cli_argument_has_highest_priority() {
    env::set_var(DATABASE_ENV_VAR, "/tmp/from-env.db");
    let toml_config = TomlConfig {
        database: Some(PathBuf::from("/tmp/from-toml.db")),
        ..Default::default()
    };

    let path = resolve_database_path(Some(Path::new("/tmp/from-cli.db")), &toml_config);
    assert_eq!(path, PathBuf::from("/tmp/from-cli.db"));

    env::remove_var(DATABASE_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_beats_toml() {
    env::set_var(DATABASE_ENV_VAR, "/tmp/from-env.db");
    let toml_config = TomlConfig {
        database: Some(PathBuf::from("/tmp/from-toml.db")),
        ..Default::default()
    };

    let path = resolve_database_path(None, &toml_config);
    assert_eq!(path, PathBuf::from("/tmp/from-env.db"));

    env::remove_var(DATABASE_ENV_VAR);
}

#[test]
#[serial]
fn test_toml_then_default() {
    env::remove_var(DATABASE_ENV_VAR);

    let toml_config = TomlConfig {
        database: Some(PathBuf::from("/tmp/from-toml.db")),
        ..Default::default()
    };
    assert_eq!(
        resolve_database_path(None, &toml_config),
        PathBuf::from("/tmp/from-toml.db")
    );

    assert_eq!(
        resolve_database_path(None, &TomlConfig::default()),
        default_database_path()
    );
}

#[test]
#[serial]
fn test_resolve_reads_config_file() {
    env::remove_var(DATABASE_ENV_VAR);

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        "database = \"/tmp/archive.db\"\nactor_id = 7\nlog_level = \"debug\"\n",
    )
    .unwrap();

    let config = MaintConfig::resolve(None, Some(&config_path));
    assert_eq!(
        config,
        MaintConfig {
            database: PathBuf::from("/tmp/archive.db"),
            actor_id: 7,
            log_level: "debug".to_string(),
        }
    );
}

#[test]
#[serial]
fn test_invalid_config_file_falls_back_to_defaults() {
    env::remove_var(DATABASE_ENV_VAR);

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, "database = [not toml").unwrap();

    let config = MaintConfig::resolve(None, Some(&config_path));
    assert_eq!(config.database, default_database_path());
    assert_eq!(config.actor_id, 0);
    assert_eq!(config.log_level, "info");
}

#[test]
#[serial]
fn test_missing_config_file_falls_back_to_defaults() {
    env::remove_var(DATABASE_ENV_VAR);

    let config = MaintConfig::resolve(
        Some(Path::new("/tmp/explicit.db")),
        Some(Path::new("/nonexistent/mizdb/config.toml")),
    );
    assert_eq!(config.database, PathBuf::from("/tmp/explicit.db"));
    assert_eq!(config.actor_id, 0);
}
