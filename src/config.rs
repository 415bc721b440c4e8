use crate::error::{Error, Result};
use crate::llm::Provider;
use crate::sources::SourceKind;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Upper bound for `documents.retention_hours`: ten years.
pub const MAX_RETENTION_HOURS: u64 = 24 * 365 * 10;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub finance: FinanceConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub social: SocialConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            api_key_env: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FanoutConfig {
    /// Sources the server will call at all.
    #[serde(default = "default_enabled_sources")]
    pub enabled_sources: Vec<SourceKind>,
    /// Sources used when a request names none.
    #[serde(default = "default_request_sources")]
    pub default_sources: Vec<SourceKind>,
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    #[serde(default = "default_max_items_per_source")]
    pub max_items_per_source: usize,
    #[serde(default = "default_max_context_items")]
    pub max_context_items: usize,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            enabled_sources: default_enabled_sources(),
            default_sources: default_request_sources(),
            source_timeout_ms: default_source_timeout_ms(),
            max_items_per_source: default_max_items_per_source(),
            max_context_items: default_max_context_items(),
            min_confidence: default_min_confidence(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsConfig {
    #[serde(default = "default_feeds")]
    pub feeds: Vec<String>,
    #[serde(default = "default_items_per_feed")]
    pub max_items_per_feed: usize,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            feeds: default_feeds(),
            max_items_per_feed: default_items_per_feed(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinanceConfig {
    #[serde(default = "default_finance_url")]
    pub base_url: String,
    #[serde(default = "default_finance_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_symbols")]
    pub default_symbols: Vec<String>,
    #[serde(default = "default_max_symbols")]
    pub max_symbols: usize,
}

impl Default for FinanceConfig {
    fn default() -> Self {
        Self {
            base_url: default_finance_url(),
            api_key_env: default_finance_key_env(),
            default_symbols: default_symbols(),
            max_symbols: default_max_symbols(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherConfig {
    #[serde(default = "default_weather_url")]
    pub base_url: String,
    #[serde(default = "default_weather_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_cities")]
    pub default_cities: Vec<String>,
    #[serde(default = "default_max_cities")]
    pub max_cities: usize,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: default_weather_url(),
            api_key_env: default_weather_key_env(),
            default_cities: default_cities(),
            max_cities: default_max_cities(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocialConfig {
    #[serde(default = "default_reddit_url")]
    pub base_url: String,
    #[serde(default = "default_subreddits")]
    pub subreddits: Vec<String>,
    #[serde(default = "default_max_posts")]
    pub max_posts: usize,
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            base_url: default_reddit_url(),
            subreddits: default_subreddits(),
            max_posts: default_max_posts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentsConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// Stored documents below this confidence are never returned.
    #[serde(default = "default_index_min_confidence")]
    pub min_confidence: f64,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_documents: default_max_documents(),
            retention_hours: default_retention_hours(),
            min_confidence: default_index_min_confidence(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            retry_secs: default_retry_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Zero disables answer caching.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
    #[serde(default = "default_redis_url")]
    pub redis_url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_entries(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

// Defaults
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".into(),
        "http://127.0.0.1:3000".into(),
        "http://localhost:8000".into(),
        "http://127.0.0.1:8000".into(),
    ]
}
fn default_log_filter() -> String {
    "livemind=info,tower_http=info".into()
}
fn default_model() -> String {
    "llama3-8b-8192".into()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_enabled_sources() -> Vec<SourceKind> {
    SourceKind::ALL.to_vec()
}
fn default_request_sources() -> Vec<SourceKind> {
    vec![SourceKind::News, SourceKind::Weather, SourceKind::Finance]
}
fn default_source_timeout_ms() -> u64 {
    4000
}
fn default_max_items_per_source() -> usize {
    5
}
fn default_max_context_items() -> usize {
    12
}
fn default_min_confidence() -> f64 {
    0.7
}
fn default_index_min_confidence() -> f64 {
    0.5
}
fn default_feeds() -> Vec<String> {
    vec![
        "https://feeds.bbci.co.uk/news/rss.xml".into(),
        "https://rss.cnn.com/rss/edition.rss".into(),
        "https://techcrunch.com/feed/".into(),
        "https://www.wired.com/feed/rss".into(),
    ]
}
fn default_items_per_feed() -> usize {
    10
}
fn default_finance_url() -> String {
    "https://www.alphavantage.co/query".into()
}
fn default_finance_key_env() -> String {
    "ALPHA_VANTAGE_API_KEY".into()
}
fn default_symbols() -> Vec<String> {
    ["AAPL", "GOOGL", "MSFT", "TSLA", "NVDA"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_max_symbols() -> usize {
    5
}
fn default_weather_url() -> String {
    "https://api.openweathermap.org/data/2.5/weather".into()
}
fn default_weather_key_env() -> String {
    "OPENWEATHER_API_KEY".into()
}
fn default_cities() -> Vec<String> {
    ["New York", "London", "Tokyo", "Mumbai", "Sydney"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_max_cities() -> usize {
    3
}
fn default_reddit_url() -> String {
    "https://www.reddit.com".into()
}
fn default_subreddits() -> Vec<String> {
    vec!["worldnews".into(), "technology".into(), "stocks".into()]
}
fn default_max_posts() -> usize {
    10
}
fn default_top_k() -> usize {
    5
}
fn default_max_documents() -> usize {
    5000
}
fn default_retention_hours() -> u64 {
    24 * 7
}
fn default_true() -> bool {
    true
}
fn default_interval_secs() -> u64 {
    60
}
fn default_retry_secs() -> u64 {
    30
}
fn default_cache_ttl() -> u64 {
    60
}
fn default_cache_entries() -> usize {
    512
}
fn default_redis_url() -> Option<String> {
    std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty())
}
fn default_key_prefix() -> String {
    "livemind".into()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| Error::config(format!("Failed to parse config: {e}")))
    }

    /// Load the file when it exists, otherwise start from defaults. Environment
    /// overrides are applied either way.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!(path = %path.display(), "loading config");
            Self::load(path)?
        } else {
            info!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("LIVEMIND_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("LIVEMIND_PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => warn!(value = %port, "ignoring invalid LIVEMIND_PORT"),
            }
        }
        if let Some(origins) = lookup("LIVEMIND_ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(format) = lookup("LIVEMIND_LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                other => warn!(value = %other, "ignoring invalid LIVEMIND_LOG_FORMAT"),
            }
        }
        if let Some(url) = lookup("REDIS_URL").filter(|u| !u.is_empty()) {
            self.cache.redis_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::config("server.port must be non-zero"));
        }
        if self.fanout.source_timeout_ms == 0 {
            return Err(Error::config("fanout.source_timeout_ms must be positive"));
        }
        if self.fanout.max_context_items == 0 || self.fanout.max_items_per_source == 0 {
            return Err(Error::config(
                "fanout.max_context_items and fanout.max_items_per_source must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.fanout.min_confidence) {
            return Err(Error::config("fanout.min_confidence must be within [0, 1]"));
        }
        if !(1..=MAX_RETENTION_HOURS).contains(&self.documents.retention_hours) {
            return Err(Error::config(format!(
                "documents.retention_hours must be between 1 and {MAX_RETENTION_HOURS}"
            )));
        }
        if !(0.0..=1.0).contains(&self.documents.min_confidence) {
            return Err(Error::config("documents.min_confidence must be within [0, 1]"));
        }
        if self.refresh.enabled && self.refresh.interval_secs == 0 {
            return Err(Error::config("refresh.interval_secs must be positive"));
        }
        for kind in &self.fanout.default_sources {
            if !self.fanout.enabled_sources.contains(kind) {
                warn!(source = %kind, "default source is not enabled and will be skipped");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn full_config_parses() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000
allowed_origins = ["https://app.example.com"]

[log]
format = "json"

[llm]
provider = "anthropic"
model = "claude-test"
max_tokens = 512

[fanout]
enabled_sources = ["news", "reddit", "docs"]
default_sources = ["news"]
source_timeout_ms = 1500
min_confidence = 0.3

[news]
feeds = ["https://example.com/rss"]

[finance]
default_symbols = ["IBM"]

[weather]
default_cities = ["Paris"]

[social]
subreddits = ["rust"]

[refresh]
enabled = false

[cache]
ttl_secs = 0
redis_url = "redis://cache:6379"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(matches!(config.llm.provider, Provider::Anthropic));
        assert_eq!(
            config.fanout.enabled_sources,
            vec![SourceKind::News, SourceKind::Social, SourceKind::Documents]
        );
        assert_eq!(config.fanout.source_timeout_ms, 1500);
        assert_eq!(config.finance.default_symbols, vec!["IBM"]);
        assert!(!config.refresh.enabled);
        assert_eq!(config.cache.ttl_secs, 0);
        assert_eq!(config.cache.redis_url.as_deref(), Some("redis://cache:6379"));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8000);
        assert!(matches!(config.llm.provider, Provider::Groq));
        assert_eq!(config.llm.model, "llama3-8b-8192");
        assert_eq!(config.fanout.enabled_sources.len(), 5);
        assert_eq!(
            config.fanout.default_sources,
            vec![SourceKind::News, SourceKind::Weather, SourceKind::Finance]
        );
        assert_eq!(config.documents.retention_hours, 168);
        assert!((config.fanout.min_confidence - 0.7).abs() < 1e-9);
        assert!((config.documents.min_confidence - 0.5).abs() < 1e-9);
        assert!(config.refresh.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("LIVEMIND_PORT", "9100"),
            ("LIVEMIND_ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
            ("LIVEMIND_LOG_FORMAT", "JSON"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.server.port, 9100);
        assert_eq!(
            config.server.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides_from(|k| (k == "LIVEMIND_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn validate_rejects_bad_threshold() {
        let mut config = Config::default();
        config.fanout.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_bounds_retention() {
        let mut config = Config::default();
        config.documents.retention_hours = 0;
        assert!(config.validate().is_err());
        config.documents.retention_hours = u64::MAX;
        assert!(config.validate().is_err());
        config.documents.retention_hours = MAX_RETENTION_HOURS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.fanout.source_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
