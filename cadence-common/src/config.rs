//! Configuration loading for the Cadence crates
//!
//! Two tiers:
//! 1. **TOML bootstrap** (`CadenceConfig`): database path, logging, and the timing
//!    tunables of the player, discovery engine and monitor. Every field has a built-in
//!    default, so an empty file (or no file at all) is valid.
//! 2. **Per-channel settings** live in the `channel_settings` table and are read by
//!    the player at runtime (see `cadence_ap::player::settings`).
//!
//! # Config file resolution priority
//!
//! 1. Explicit path argument (highest priority)
//! 2. `CADENCE_CONFIG` environment variable
//! 3. Platform config dir (`~/.config/cadence/config.toml` on Linux)
//! 4. Built-in defaults
//!
//! `CADENCE_DATABASE_PATH` overrides `[database] path` after loading.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CADENCE_CONFIG";

/// Environment variable overriding the database path
pub const DATABASE_ENV_VAR: &str = "CADENCE_DATABASE_PATH";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub player: PlayerConfig,
    pub discovery: DiscoveryConfig,
    pub monitor: MonitorConfig,
}

/// Database bootstrap settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,

    /// SQLite busy timeout in milliseconds
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: 5000,
            max_connections: 8,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,

    /// Include the event target (module path) in output
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
        }
    }
}

/// Playback loop timing and queue tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Disconnect a non-playing channel after this much inactivity
    pub idle_timeout_ms: u64,
    /// Upper bound on resolving a stream reference
    pub stream_fetch_timeout_ms: u64,
    /// Playback wait ceiling when the duration is unknown
    pub playback_ceiling_ms: u64,
    /// Added to a known duration to form the playback wait timeout
    pub playback_buffer_ms: u64,
    /// Upper bound on one discovery call from the loop
    pub discovery_timeout_ms: u64,
    /// Consecutive failures before the loop backs off
    pub max_consecutive_failures: u32,
    /// Backoff sleep once the failure threshold is reached
    pub failure_backoff_ms: u64,
    /// Upper bound on one metadata enrichment call
    pub enrichment_timeout_ms: u64,
    /// Delay before refreshing "now playing" after enrichment
    pub enrichment_refresh_delay_ms: u64,
    /// Queue maintenance tick
    pub maintenance_interval_ms: u64,
    /// Queue depth the maintenance task tops up to
    pub target_queue_depth: usize,
    /// Default autoplay flag for channels without a stored setting
    pub autoplay: bool,
    /// Default pre-buffer flag for channels without a stored setting
    pub pre_buffer: bool,
    /// Re-rolls allowed when discovery returns a song over the channel's length limit
    pub max_duration_rerolls: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 300_000,
            stream_fetch_timeout_ms: 30_000,
            playback_ceiling_ms: 600_000,
            playback_buffer_ms: 60_000,
            discovery_timeout_ms: 20_000,
            max_consecutive_failures: 3,
            failure_backoff_ms: 5_000,
            enrichment_timeout_ms: 6_000,
            enrichment_refresh_delay_ms: 1_000,
            maintenance_interval_ms: 30_000,
            target_queue_depth: 4,
            autoplay: true,
            pre_buffer: true,
            max_duration_rerolls: 3,
        }
    }
}

impl PlayerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn stream_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_fetch_timeout_ms)
    }

    pub fn playback_ceiling(&self) -> Duration {
        Duration::from_millis(self.playback_ceiling_ms)
    }

    pub fn playback_buffer(&self) -> Duration {
        Duration::from_millis(self.playback_buffer_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }

    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_millis(self.enrichment_timeout_ms)
    }

    pub fn enrichment_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.enrichment_refresh_delay_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    /// Timeout for waiting on playback completion
    ///
    /// Known duration plus the buffer, or the ceiling when the duration is unknown.
    pub fn playback_wait(&self, duration_seconds: Option<u32>) -> Duration {
        match duration_seconds {
            Some(secs) if secs > 0 => Duration::from_secs(u64::from(secs)) + self.playback_buffer(),
            _ => self.playback_ceiling(),
        }
    }
}

/// Discovery engine tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Default time-window cooldown for channels without a stored setting
    pub replay_cooldown_secs: u64,
    /// The last N plays are always excluded regardless of time
    pub history_cooldown_count: u32,
    /// Candidates considered by softmax selection
    pub top_k: usize,
    /// Exploration noise added to cosine scores
    pub score_temperature: f32,
    /// Softmax sampling temperature
    pub softmax_temperature: f32,
    /// Upper bound on each candidate pool
    pub pool_timeout_ms: u64,
    /// Per-pool candidate limit
    pub pool_limit: usize,
    /// Liked songs sampled into the profile centroid
    pub liked_sample: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            replay_cooldown_secs: 7200,
            history_cooldown_count: 20,
            top_k: 8,
            score_temperature: 0.15,
            softmax_temperature: 0.5,
            pool_timeout_ms: 8_000,
            pool_limit: 20,
            liked_sample: 10,
        }
    }
}

impl DiscoveryConfig {
    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }
}

/// Idle/health monitor tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sweep interval
    pub sweep_interval_ms: u64,
    /// A playing channel whose health check is older than this is considered stuck
    pub stuck_threshold_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 60_000,
            stuck_threshold_ms: 1_800_000,
        }
    }
}

impl MonitorConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_millis(self.stuck_threshold_ms)
    }

    /// How often a waiting player refreshes its health timestamp
    pub fn heartbeat_interval(&self) -> Duration {
        (self.stuck_threshold() / 2).max(Duration::from_millis(10))
    }
}

impl CadenceConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CadenceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration following the resolution priority
    ///
    /// A missing file at the default location is not an error; an explicitly named
    /// file (argument or environment) that cannot be read is.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(explicit)? {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
                })?;
                info!("Loaded configuration from {}", path.display());
                Self::from_toml_str(&content)?
            }
            None => {
                debug!("No config file found, using built-in defaults");
                Self::default()
            }
        };

        if let Ok(db_path) = std::env::var(DATABASE_ENV_VAR) {
            if !db_path.trim().is_empty() {
                config.database.path = PathBuf::from(db_path);
            }
        }

        Ok(config)
    }

    /// Reject values that would make the loop spin or divide by zero
    pub fn validate(&self) -> Result<()> {
        if self.discovery.top_k == 0 {
            return Err(Error::Config("discovery.top_k must be at least 1".to_string()));
        }
        if self.player.max_consecutive_failures == 0 {
            return Err(Error::Config(
                "player.max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.monitor.sweep_interval_ms == 0 || self.player.maintenance_interval_ms == 0 {
            return Err(Error::Config("sweep and maintenance intervals must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    // Priority 1: explicit argument
    if let Some(path) = explicit {
        return Ok(Some(path.to_path_buf()));
    }

    // Priority 2: environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Ok(Some(PathBuf::from(path)));
        }
    }

    // Priority 3: platform config dir, only if present
    Ok(dirs::config_dir()
        .map(|d| d.join("cadence").join("config.toml"))
        .filter(|p| p.exists()))
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cadence").join("cadence.db"))
        .unwrap_or_else(|| PathBuf::from("./cadence_data/cadence.db"))
}
