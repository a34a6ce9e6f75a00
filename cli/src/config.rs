//! On-disk CLI configuration, loaded with `confy`: a flat, serde-derived
//! struct with a `Default` impl standing in for the file when none exists
//! yet.

use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub data_dir: String,
    pub disable_wal: bool,
    pub compute_workers: usize,
    pub queue_capacity: usize,
    pub thread_lock_shards: usize,

    /// Hex-encoded 32-byte KEK. Empty means encryption is off.
    pub kek_hex: String,
    /// Field policy paths, e.g. `body.ssn`. Empty means "encrypt whole body"
    /// when a KEK is configured, and is otherwise unused.
    pub field_policy_paths: Vec<String>,

    pub retention_enabled: bool,
    pub retention_cron: Option<String>,
    pub retention_period: String,
    pub retention_lock_ttl_secs: u64,
    pub retention_dry_run: bool,

    pub monitor_wal_bytes_high: u64,
    pub monitor_disk_util_high_pct: f64,
    pub monitor_wal_bytes_mid: u64,
    pub monitor_disk_util_mid_pct: f64,
    pub monitor_recovery_window_secs: u64,
    pub monitor_poll_interval_secs: u64,

    pub log_level: String,
    pub log_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            data_dir: "data".to_string(),
            disable_wal: false,
            compute_workers: 4,
            queue_capacity: progressdb_core::queue::DEFAULT_CAPACITY,
            thread_lock_shards: progressdb_core::shard_lock::DEFAULT_SHARDS,
            kek_hex: String::new(),
            field_policy_paths: Vec::new(),
            retention_enabled: false,
            retention_cron: None,
            retention_period: "30d".to_string(),
            retention_lock_ttl_secs: 30,
            retention_dry_run: false,
            monitor_wal_bytes_high: 256 * 1024 * 1024,
            monitor_disk_util_high_pct: 90.0,
            monitor_wal_bytes_mid: 64 * 1024 * 1024,
            monitor_disk_util_mid_pct: 75.0,
            monitor_recovery_window_secs: 30,
            monitor_poll_interval_secs: 5,
            log_level: "info".to_string(),
            log_dir: "data/logs".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let cfg = match path {
            Some(p) => confy::load_path(p)?,
            None => confy::load("progressdb", "config")?,
        };
        Ok(cfg)
    }
}
