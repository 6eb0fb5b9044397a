//! Layered configuration loading tests.

use caldav_sync::config::ConfigLoader;
use std::fs;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) {
    fs::write(dir.path().join(name), content).expect("write env file");
}

#[test]
fn base_env_file_populates_config() {
    let dir = TempDir::new().expect("tempdir");
    write(
        &dir,
        ".env",
        "CALSYNC_PROFILE=test\n\
         CALSYNC_DATABASE_URL=sqlite::memory:\n\
         CALSYNC_LOG_LEVEL=debug\n\
         CALSYNC_CALDAV_CONNECT_TIMEOUT_SECS=10\n\
         CALSYNC_WEBHOOK_RETRY_DELAYS_SECS=5,10,15\n",
    );

    let config = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("loads");

    assert_eq!(config.profile, "test");
    assert_eq!(config.database_url, "sqlite::memory:");
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.caldav.connect_timeout_secs, 10);
    assert_eq!(config.webhooks.retry_delays_secs, vec![5, 10, 15]);
}

#[test]
fn local_layer_overrides_base() {
    let dir = TempDir::new().expect("tempdir");
    write(&dir, ".env", "CALSYNC_PROFILE=test\nCALSYNC_LOG_LEVEL=info\n");
    write(&dir, ".env.local", "CALSYNC_LOG_LEVEL=trace\n");

    let config = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("loads");

    assert_eq!(config.log_level, "trace");
}

#[test]
fn profile_layer_overrides_local() {
    let dir = TempDir::new().expect("tempdir");
    write(&dir, ".env", "CALSYNC_PROFILE=staging\nCALSYNC_LOG_FORMAT=json\n");
    write(&dir, ".env.staging", "CALSYNC_LOG_FORMAT=pretty\n");

    let config = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("loads");

    assert_eq!(config.profile, "staging");
    assert_eq!(config.log_format, "pretty");
}

#[test]
fn unknown_keys_are_ignored_and_defaults_survive() {
    let dir = TempDir::new().expect("tempdir");
    write(
        &dir,
        ".env",
        "CALSYNC_PROFILE=test\nCALSYNC_NO_SUCH_KEY=1\nUNPREFIXED=2\n",
    );

    let config = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("loads");

    assert_eq!(config.sync.max_concurrent_runs, 5);
    assert_eq!(config.google.rate_limit_delay_ms, 100);
    assert_eq!(config.webhooks.retry_delays_secs, vec![30, 300, 1800]);
}

#[test]
fn missing_env_files_fall_back_to_defaults() {
    let dir = TempDir::new().expect("tempdir");

    let config = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("loads");

    assert_eq!(config.db_max_connections, 10);
    assert_eq!(config.caldav.read_timeout_secs, 60);
}
