//! Canonical default values shared across the daemon and its crates.

pub const DEFAULT_TOOL_SERVER_URL: &str = "http://localhost:8888";
pub const DEFAULT_HEARTBEAT_SEC: u64 = 5;
pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const DEFAULT_TOOL_TIMEOUT_SEC: u64 = 300;

pub const DEFAULT_CACHE_EXACT_TTL_SEC: u64 = 86_400; // 1 day
pub const DEFAULT_CACHE_SEMANTIC_TTL_SEC: u64 = 604_800; // 7 days
pub const DEFAULT_CACHE_SEMANTIC_THRESHOLD: f32 = 0.92;
pub const DEFAULT_CACHE_SEMANTIC_MAX_ENTRIES: usize = 2_000;

pub const DEFAULT_PROVIDER_HIGH: &str = "openrouter/google/gemini-pro-1.5";
pub const DEFAULT_PROVIDER_LOW: &str = "openrouter/mistralai/mistral-7b-instruct";
pub const DEFAULT_PROVIDER_FREE: &str = "openrouter/mistralai/mistral-7b-instruct:free";

pub const DEFAULT_MONITOR_INTERVAL_SEC: u64 = 900; // 15 min
pub const DEFAULT_ALERT_MIN_SEVERITY: &str = "medium";
pub const DEFAULT_APPROVAL_TIMEOUT_SEC: u64 = 300;

/// Telegram caps a single message at 4096 code units.
pub const CHAT_MESSAGE_MAX_CHARS: usize = 4_096;

pub const DEFAULT_RSS_FEEDS: &[&str] = &[
    "https://feeds.feedburner.com/TheHackersNews",
    "https://www.bleepingcomputer.com/feed/",
    "https://www.cisa.gov/cybersecurity-advisories/all.xml",
    "https://nvd.nist.gov/feeds/xml/cve/misc/nvd-rss.xml",
    "https://www.exploit-db.com/rss.xml",
];
