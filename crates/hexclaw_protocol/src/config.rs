//! Environment-keyed system configuration.
//!
//! The set of recognised variables is closed. Missing optional values fall
//! back to benign defaults; only an explicitly set but unparseable value is
//! a configuration error (fatal at startup).

use crate::defaults;
use crate::types::Severity;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Canonical system configuration used by the launcher and daemon.
#[derive(Debug, Clone)]
pub struct HexClawConfig {
    /// State root: DB file, artifact data, logs (HEXCLAW_HOME)
    pub home: PathBuf,
    /// External tool server base URL
    pub tool_server_url: String,
    /// Seconds between queue drain cycles
    pub heartbeat_sec: u64,
    /// Worker pool bound
    pub max_concurrent: usize,
    /// Per-tool HTTP timeout (seconds)
    pub tool_timeout_sec: u64,
    /// Enqueue a follow-up job when the operator picks a suggested action
    pub chain_on_choice: bool,

    /// Exact-tier cache TTL (seconds)
    pub cache_exact_ttl_sec: u64,
    /// Semantic-tier cache TTL (seconds)
    pub cache_semantic_ttl_sec: u64,
    /// Cosine similarity threshold for a semantic hit
    pub cache_semantic_threshold: f32,
    /// Semantic tier entry bound (FIFO eviction past this)
    pub cache_semantic_max_entries: usize,
    /// Optional shared KV server for the exact tier and monitor seen-set
    pub redis_url: Option<String>,

    /// Provider descriptors per tier, most-preferred first
    pub providers_high: Vec<String>,
    pub providers_low: Vec<String>,
    pub providers_free: Vec<String>,
    /// Let the planner consult the model before falling back to rules
    pub planner_use_model: bool,

    /// Operator chat credentials; None disables the transport
    pub telegram_bot_token: Option<String>,
    /// Single allowlisted chat id
    pub telegram_chat_id: Option<i64>,

    /// Threat monitor feed URLs
    pub rss_feeds: Vec<String>,
    pub monitor_interval_sec: u64,
    pub alert_min_severity: Severity,
    /// Host-intel API key; None disables that poller
    pub shodan_api_key: Option<String>,
}

impl HexClawConfig {
    /// Read the full configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = match std::env::var("HEXCLAW_HOME") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".hexclaw"),
        };

        let providers_high = provider_rotation(
            "HEXCLAW_PROVIDER_HIGH",
            &[
                defaults::DEFAULT_PROVIDER_HIGH,
                defaults::DEFAULT_PROVIDER_LOW,
            ],
        );
        let providers_low = provider_rotation(
            "HEXCLAW_PROVIDER_LOW",
            &[
                defaults::DEFAULT_PROVIDER_LOW,
                defaults::DEFAULT_PROVIDER_FREE,
            ],
        );
        let providers_free = provider_rotation(
            "HEXCLAW_PROVIDER_FREE",
            &[
                defaults::DEFAULT_PROVIDER_FREE,
                defaults::DEFAULT_PROVIDER_LOW,
            ],
        );

        let rss_feeds = match std::env::var("RSS_FEEDS") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => defaults::DEFAULT_RSS_FEEDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        Ok(Self {
            home,
            tool_server_url: env_string(
                "HEXCLAW_TOOL_SERVER_URL",
                defaults::DEFAULT_TOOL_SERVER_URL,
            ),
            heartbeat_sec: env_parsed("HEXCLAW_HEARTBEAT_SEC", defaults::DEFAULT_HEARTBEAT_SEC)?,
            max_concurrent: env_parsed(
                "HEXCLAW_MAX_CONCURRENT",
                defaults::DEFAULT_MAX_CONCURRENT,
            )?,
            tool_timeout_sec: env_parsed(
                "HEXCLAW_TOOL_TIMEOUT_SEC",
                defaults::DEFAULT_TOOL_TIMEOUT_SEC,
            )?,
            chain_on_choice: env_parsed("HEXCLAW_CHAIN_ON_CHOICE", true)?,
            cache_exact_ttl_sec: env_parsed(
                "CACHE_EXACT_TTL",
                defaults::DEFAULT_CACHE_EXACT_TTL_SEC,
            )?,
            cache_semantic_ttl_sec: env_parsed(
                "CACHE_SEMANTIC_TTL",
                defaults::DEFAULT_CACHE_SEMANTIC_TTL_SEC,
            )?,
            cache_semantic_threshold: env_parsed(
                "CACHE_SEMANTIC_THRESHOLD",
                defaults::DEFAULT_CACHE_SEMANTIC_THRESHOLD,
            )?,
            cache_semantic_max_entries: env_parsed(
                "CACHE_SEMANTIC_MAX_ENTRIES",
                defaults::DEFAULT_CACHE_SEMANTIC_MAX_ENTRIES,
            )?,
            redis_url: env_optional("REDIS_URL"),
            providers_high,
            providers_low,
            providers_free,
            planner_use_model: env_parsed("PLANNER_USE_MODEL", false)?,
            telegram_bot_token: env_optional("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: match env_optional("TELEGRAM_CHAT_ID") {
                Some(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid {
                    var: "TELEGRAM_CHAT_ID",
                    value: raw.clone(),
                    reason: "expected an integer chat id".to_string(),
                })?),
                None => None,
            },
            rss_feeds,
            monitor_interval_sec: env_parsed(
                "MONITOR_INTERVAL_SEC",
                defaults::DEFAULT_MONITOR_INTERVAL_SEC,
            )?,
            alert_min_severity: match env_optional("ALERT_MIN_SEVERITY") {
                Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                    var: "ALERT_MIN_SEVERITY",
                    value: raw.clone(),
                    reason,
                })?,
                None => defaults::DEFAULT_ALERT_MIN_SEVERITY
                    .parse()
                    .expect("default severity parses"),
            },
            shodan_api_key: env_optional("SHODAN_API_KEY"),
        })
    }

    /// Directory holding per-job artifact outputs.
    pub fn data_dir(&self) -> PathBuf {
        self.home.join("data")
    }

    /// Directory holding skill definition files.
    pub fn skills_dir(&self) -> PathBuf {
        self.home.join("skills")
    }

    /// The SQLite state store (jobs + token ledger + alerts).
    pub fn db_path(&self) -> PathBuf {
        self.home.join("hexclaw.db")
    }

    /// True when the operator chat transport is fully configured.
    pub fn chat_configured(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }
}

fn env_optional(var: &str) -> Option<String> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn env_string(var: &str, default: &str) -> String {
    env_optional(var).unwrap_or_else(|| default.to_string())
}

fn env_parsed<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_optional(var) {
        Some(raw) => raw.parse().map_err(|err: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

/// Split a comma-separated rotation list from the environment, falling back
/// to the built-in rotation for the tier.
fn provider_rotation(var: &str, default: &[&str]) -> Vec<String> {
    match env_optional(var) {
        Some(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}
