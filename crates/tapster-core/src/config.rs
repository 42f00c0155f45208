use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WINDOW_MINUTES: i64 = 30;
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 30;
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;
/// Europe/Moscow, where the group meets.
pub const DEFAULT_DISPLAY_OFFSET_MINUTES: i32 = 180;

/// Top-level config (tapster.toml + TAPSTER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TapsterConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chat id of the operator (bartender) who receives attendance reports
    /// and may run admin commands. 0 means unset.
    #[serde(default)]
    pub operator_id: i64,
}

/// Notification scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Length of the pre-event window in which choices count.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,
    /// Send attempts per firing before the timer is flagged as stalled.
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    /// How often in-memory waits are re-synced with the durable registry.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// UTC offset used when rendering event times in notifications.
    #[serde(default = "default_display_offset_minutes")]
    pub display_offset_minutes: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            window_minutes: DEFAULT_WINDOW_MINUTES,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            retry_backoff_secs: DEFAULT_RETRY_BACKOFF_SECS,
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            display_offset_minutes: DEFAULT_DISPLAY_OFFSET_MINUTES,
        }
    }
}

fn default_window_minutes() -> i64 {
    DEFAULT_WINDOW_MINUTES
}
fn default_max_delivery_attempts() -> u32 {
    DEFAULT_MAX_DELIVERY_ATTEMPTS
}
fn default_retry_backoff_secs() -> u64 {
    DEFAULT_RETRY_BACKOFF_SECS
}
fn default_reconcile_interval_secs() -> u64 {
    DEFAULT_RECONCILE_INTERVAL_SECS
}
fn default_display_offset_minutes() -> i32 {
    DEFAULT_DISPLAY_OFFSET_MINUTES
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tapster/tapster.db", home)
}

impl TapsterConfig {
    /// Load config from a TOML file with TAPSTER_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `TAPSTER_SCHEDULER__WINDOW_MINUTES=45`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::TapsterError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("TAPSTER_").split("__"))
    }

    /// Operator chat id, if one is configured.
    pub fn operator_id(&self) -> Option<i64> {
        self.telegram
            .as_ref()
            .map(|t| t.operator_id)
            .filter(|id| *id != 0)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tapster/tapster.toml", home)
}
