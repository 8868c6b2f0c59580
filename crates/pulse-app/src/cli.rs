//! CLI argument definitions for the Pulse application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use pulse_insight::GroupBy;
use std::path::PathBuf;

/// Pulse - clusters Telegram channel posts into stories and builds digests.
#[derive(Parser, Debug)]
#[command(name = "pulse", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the SQLite database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run clustering workers, reconciliation and retention until Ctrl-C.
    Run,
    /// Ingest one post and cluster it immediately.
    Ingest(IngestArgs),
    /// Subscribe a user to a channel.
    Subscribe(SubscriptionArgs),
    /// Remove a user's subscription.
    Unsubscribe(SubscriptionArgs),
    /// List known channels with their categories as JSON.
    Channels {
        /// Skip deactivated channels.
        #[arg(long = "active-only")]
        active_only: bool,
    },
    /// Print a digest page as JSON.
    Digest(DigestArgs),
    /// Print the narrative digest of the last day.
    TextDigest {
        #[arg(long)]
        user: i64,
    },
    /// Cluster publications left unclustered by earlier failures.
    Reconcile {
        /// Window in hours (defaults to clustering.reconcile_window_hours).
        #[arg(long)]
        hours: Option<u32>,
        /// Batch size (defaults to clustering.reconcile_batch_limit).
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete expired stories and their publications.
    Sweep,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct IngestArgs {
    /// Platform channel id (may be negative).
    #[arg(long, allow_hyphen_values = true)]
    pub channel: i64,
    #[arg(long)]
    pub title: String,
    /// Public handle, with or without `@`.
    #[arg(long)]
    pub handle: Option<String>,
    #[arg(long = "message-id")]
    pub message_id: i64,
    #[arg(long)]
    pub text: String,
    #[arg(long, default_value_t = 0)]
    pub views: i64,
    /// RFC 3339 publish time; defaults to now.
    #[arg(long = "published-at")]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SubscriptionArgs {
    #[arg(long)]
    pub user: i64,
    /// Platform channel id (may be negative).
    #[arg(long, allow_hyphen_values = true)]
    pub channel: i64,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct DigestArgs {
    #[arg(long)]
    pub user: i64,
    /// category, channel or time.
    #[arg(long = "group-by", default_value = "category")]
    pub group_by: GroupBy,
    /// Lookback window (defaults to digest.default_lookback_hours).
    #[arg(long)]
    pub hours: Option<u32>,
    /// Pinned category or channel title; repeatable.
    #[arg(long = "pinned")]
    pub pinned: Vec<String>,
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > PULSE_CONFIG env var > ~/.pulse/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("PULSE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory.
    ///
    /// Priority: --data-dir flag > PULSE_DATA_DIR env var > config file value.
    pub fn resolve_data_dir(&self, config_dir: &str) -> String {
        if let Some(ref p) = self.data_dir {
            return p.to_string_lossy().to_string();
        }
        if let Ok(p) = std::env::var("PULSE_DATA_DIR") {
            if !p.is_empty() {
                return p;
            }
        }
        config_dir.to_string()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path.
fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".pulse").join("config.toml");
    }
    PathBuf::from("config.toml")
}
