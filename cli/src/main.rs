use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use progressdb_cli::config::AppConfig;
use progressdb_cli::trace;
use progressdb_core::clock::{Clock, SystemClock};
use progressdb_core::monitor::Thresholds;
use progressdb_core::retention::RetentionConfig;
use progressdb_core::{Core, CoreConfig};

#[derive(Debug, Parser)]
#[command(name = "progressdb", version, about = "Admin CLI for the ProgressDB message store")]
struct Args {
    /// Configuration file path. Defaults to the platform config directory.
    #[clap(short = 'c', long = "config")]
    config: Option<String>,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new thread.
    CreateThread {
        author: String,
        #[clap(long)]
        title: Option<String>,
        #[clap(long)]
        encrypt: bool,
    },
    /// Append a message to a thread.
    SaveMessage {
        thread_id: String,
        msg_id: String,
        /// The message body as a JSON value.
        body: String,
        #[clap(long)]
        author: Option<String>,
        #[clap(long)]
        role: Option<String>,
        #[clap(long)]
        reply_to: Option<String>,
        #[clap(long)]
        delete: bool,
    },
    /// List current messages in a thread.
    ListMessages {
        thread_id: String,
        #[clap(long)]
        cursor: Option<String>,
        #[clap(long, default_value_t = 50)]
        limit: usize,
    },
    /// List every historical version of one message.
    ListVersions { thread_id: String, msg_id: String },
    /// List every thread a user owns.
    ListThreads { user_id: String },
    /// Re-encrypt a thread's history under a freshly minted DEK.
    RotateDek { thread_id: String },
    /// Mark a thread deleted without removing its data.
    SoftDelete { thread_id: String },
    /// Permanently remove a soft-deleted thread's data.
    Purge { thread_id: String },
    /// Run one retention sweep immediately, ignoring the cron schedule.
    /// Honors `retention_dry_run` from the configuration file.
    RetentionRun,
    /// Print queue and WAL pressure for operator diagnostics.
    Stats,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = AppConfig::load(args.config.as_deref()).context("loading configuration")?;

    let _guards = trace::init_logging(&cfg.log_dir, &cfg.log_level)?;
    log::info!("progressdb cli starting: {:?}", args.cmd);

    let core = Core::open(core_config(&cfg))?;
    let result = run(&core, args.cmd);
    core.shutdown();
    result
}

fn core_config(cfg: &AppConfig) -> CoreConfig {
    let data_dir = PathBuf::from(&cfg.data_dir);
    CoreConfig {
        store_path: data_dir.join("store"),
        index_path: data_dir.join("index"),
        wal_path: data_dir.join("wal"),
        disable_wal: cfg.disable_wal,
        compute_workers: cfg.compute_workers,
        queue_capacity: cfg.queue_capacity,
        thread_lock_shards: cfg.thread_lock_shards,
        kek_hex: if cfg.kek_hex.is_empty() { None } else { Some(cfg.kek_hex.clone()) },
        field_policy_paths: cfg.field_policy_paths.clone(),
        monitor_thresholds: Thresholds {
            wal_bytes_high: cfg.monitor_wal_bytes_high,
            disk_util_high_pct: cfg.monitor_disk_util_high_pct,
            wal_bytes_mid: cfg.monitor_wal_bytes_mid,
            disk_util_mid_pct: cfg.monitor_disk_util_mid_pct,
            recovery_window: Duration::from_secs(cfg.monitor_recovery_window_secs),
            poll_interval: Duration::from_secs(cfg.monitor_poll_interval_secs),
        },
        retention: RetentionConfig {
            enabled: cfg.retention_enabled,
            cron_expr: cfg.retention_cron.clone(),
            period: cfg.retention_period.clone(),
            lock_ttl: Duration::from_secs(cfg.retention_lock_ttl_secs),
            dry_run: cfg.retention_dry_run,
            lock_path: data_dir.join("retention/retention.lock"),
            audit_path: data_dir.join("retention/audit.log"),
        },
    }
}

fn run(core: &Core, cmd: Command) -> Result<()> {
    let now_ns = SystemClock.now_ns();

    match cmd {
        Command::CreateThread { author, title, encrypt } => {
            let thread = core.store_api.create_thread(&author, title, encrypt, now_ns)?;
            print_json(&thread)
        }
        Command::SaveMessage { thread_id, msg_id, body, author, role, reply_to, delete } => {
            let body: Value = serde_json::from_str(&body).context("message body must be valid JSON")?;
            core.store_api.save_message(&thread_id, &msg_id, body, now_ns, author, role, reply_to, delete)?;
            println!("queued");
            Ok(())
        }
        Command::ListMessages { thread_id, cursor, limit } => {
            let (rows, next_cursor) = core.store_api.list_thread_messages(&thread_id, cursor.as_deref(), limit)?;
            print_json(&serde_json::json!({ "messages": rows, "next_cursor": next_cursor }))
        }
        Command::ListVersions { thread_id, msg_id } => {
            let rows = core.store_api.list_message_versions(&thread_id, &msg_id)?;
            print_json(&rows)
        }
        Command::ListThreads { user_id } => {
            let threads = core.store_api.list_threads_for_user(&user_id)?;
            print_json(&threads)
        }
        Command::RotateDek { thread_id } => {
            let key_id = core.store_api.rotate_thread_dek(&thread_id, now_ns)?;
            println!("{key_id}");
            Ok(())
        }
        Command::SoftDelete { thread_id } => {
            core.store_api.soft_delete_thread(&thread_id, now_ns)?;
            println!("ok");
            Ok(())
        }
        Command::Purge { thread_id } => {
            core.store_api.purge_thread_permanently(&thread_id)?;
            println!("ok");
            Ok(())
        }
        Command::RetentionRun => {
            let stats = core.retention.run_once()?;
            print_json(&serde_json::json!({
                "purged": stats.purged,
                "dry_run": stats.dry_run,
                "failed": stats.failed,
            }))
        }
        Command::Stats => print_json(&serde_json::json!({
            "queue_in_flight": core.queue.in_flight(),
            "queue_dropped": core.queue.dropped(),
            "queue_failed_total": core.queue.failed_total(),
            "wal_first_index": core.wal.first_index()?,
            "wal_last_index": core.wal.last_index()?,
        })),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
