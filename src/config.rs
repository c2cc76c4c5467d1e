use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub market: MarketConfig,
    /// Optional feed-to-JSON conversion service every feed is requested through
    pub feed_proxy: Option<FeedProxyConfig>,
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// News cache lifetime in seconds
    #[serde(default = "default_news_ttl")]
    pub news_ttl_secs: u64,
    /// Lifetime of each market data slot in seconds
    #[serde(default = "default_market_ttl")]
    pub market_ttl_secs: u64,
}

fn default_news_ttl() -> u64 {
    5 * 60
}

fn default_market_ttl() -> u64 {
    2 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            news_ttl_secs: default_news_ttl(),
            market_ttl_secs: default_market_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn news_ttl(&self) -> Duration {
        Duration::from_secs(self.news_ttl_secs)
    }

    pub fn market_ttl(&self) -> Duration {
        Duration::from_secs(self.market_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    /// Per-feed request timeout in milliseconds
    #[serde(default = "default_feed_timeout")]
    pub timeout_ms: u64,
    /// Feeds fetched at once before the aggregator switches to batches
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_batch_pause")]
    pub batch_pause_ms: u64,
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_feed_timeout() -> u64 {
    3000
}

fn default_max_concurrent() -> usize {
    15
}

fn default_batch_pause() -> u64 {
    50
}

fn default_max_articles() -> usize {
    200
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_feed_timeout(),
            max_concurrent: default_max_concurrent(),
            batch_pause_ms: default_batch_pause(),
            max_articles: default_max_articles(),
            user_agent: default_user_agent(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    /// Batch size, never zero
    pub fn concurrency(&self) -> usize {
        self.max_concurrent.max(1)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketConfig {
    #[serde(default = "default_coingecko_url")]
    pub coingecko_url: String,
    #[serde(default = "default_coinmarketcap_url")]
    pub coinmarketcap_url: String,
    #[serde(default = "default_coinmarketcap_key")]
    pub coinmarketcap_api_key: String,
    #[serde(default = "default_fear_greed_url")]
    pub fear_greed_url: String,
    #[serde(default = "default_coin_ids")]
    pub coin_ids: Vec<String>,
    #[serde(default = "default_market_timeout")]
    pub timeout_ms: u64,
    /// Reported when every dominance source fails
    #[serde(default = "default_fallback_dominance")]
    pub fallback_dominance: f64,
}

fn default_coingecko_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_coinmarketcap_url() -> String {
    "https://api.coinmarketcap.com/v1".to_string()
}

fn default_coinmarketcap_key() -> String {
    "demo".to_string()
}

fn default_fear_greed_url() -> String {
    "https://api.alternative.me/fng/".to_string()
}

fn default_coin_ids() -> Vec<String> {
    ["bitcoin", "ethereum", "ripple", "solana", "binancecoin", "tron"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_market_timeout() -> u64 {
    10_000
}

fn default_fallback_dominance() -> f64 {
    45.5
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            coingecko_url: default_coingecko_url(),
            coinmarketcap_url: default_coinmarketcap_url(),
            coinmarketcap_api_key: default_coinmarketcap_key(),
            fear_greed_url: default_fear_greed_url(),
            coin_ids: default_coin_ids(),
            timeout_ms: default_market_timeout(),
            fallback_dominance: default_fallback_dominance(),
        }
    }
}

impl MarketConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedProxyConfig {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_proxy_count")]
    pub count: u32,
}

fn default_proxy_count() -> u32 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    /// Part of the low-latency subset used by fast loads
    #[serde(default)]
    pub priority: bool,
    /// Fallback thumbnail for items without one
    pub image: Option<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}

/// Process-level settings taken from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub environment: String,
    pub cors_origin: String,
    pub feeds_config: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(3001),
            environment: lookup("APP_ENV").unwrap_or_else(|| "development".to_string()),
            cors_origin: lookup("CORS_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            feeds_config: lookup("FEEDS_CONFIG").unwrap_or_else(|| "feeds.toml".to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_cache_policy() {
        let cache = CacheConfig::default();
        assert_eq!(cache.news_ttl(), Duration::from_secs(300));
        assert_eq!(cache.market_ttl(), Duration::from_secs(120));

        let fetch = FetchConfig::default();
        assert_eq!(fetch.timeout(), Duration::from_millis(3000));
        assert_eq!(fetch.max_concurrent, 15);
        assert_eq!(fetch.max_articles, 200);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
            [cache]
            news_ttl_secs = 60

            [[feeds]]
            name = "CoinTelegraph"
            url = "https://cointelegraph.com/rss"
            priority = true

            [[feeds]]
            name = "Solana Blog"
            url = "https://solana.com/news/rss.xml"
            image = "https://img.example.com/solana.png"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.cache.news_ttl_secs, 60);
        assert_eq!(config.cache.market_ttl_secs, 120);
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[0].name, "CoinTelegraph");
        assert!(config.feeds[0].priority);
        assert!(config.feeds[0].image.is_none());
        assert!(!config.feeds[1].priority);
        assert_eq!(
            config.feeds[1].image.as_deref(),
            Some("https://img.example.com/solana.png")
        );
        assert!(config.feed_proxy.is_none());
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = Config::load("/nonexistent/path/feeds.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let content = "this is not valid toml {{{";

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let result = Config::load(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_missing_required_fields() {
        let content = r#"
            [[feeds]]
            name = "Test Feed"
            # Missing url field
        "#;

        let result = Config::from_str(content);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_feeds_list() {
        let config = Config::from_str("feeds = []").unwrap();
        assert!(config.feeds.is_empty());
        assert_eq!(config.market.fallback_dominance, 45.5);
        assert_eq!(config.market.coin_ids.len(), 6);
    }

    #[test]
    fn test_feed_proxy_section() {
        let content = r#"
            feeds = []

            [feed_proxy]
            url = "https://api.rss2json.com/v1/api.json"
            api_key = "secret"
        "#;

        let config = Config::from_str(content).unwrap();
        let proxy = config.feed_proxy.unwrap();
        assert_eq!(proxy.api_key, "secret");
        assert_eq!(proxy.count, 20);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let content = r#"
            feeds = []

            [fetch]
            max_concurrent = 0
        "#;

        let config = Config::from_str(content).unwrap();
        assert_eq!(config.fetch.concurrency(), 1);
    }

    #[test]
    fn test_server_config_defaults() {
        let server = ServerConfig::from_lookup(|_| None);
        assert_eq!(server.port, 3001);
        assert_eq!(server.environment, "development");
        assert_eq!(server.cors_origin, "http://localhost:3000");
        assert_eq!(server.feeds_config, "feeds.toml");
        assert!(!server.is_production());
    }

    #[test]
    fn test_server_config_from_env_values() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "8080"),
            ("APP_ENV", "production"),
            ("CORS_ORIGIN", "https://pulse.example.com"),
        ]
        .into_iter()
        .collect();

        let server = ServerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(server.port, 8080);
        assert!(server.is_production());
        assert_eq!(server.cors_origin, "https://pulse.example.com");
    }

    #[test]
    fn test_invalid_port_falls_back() {
        let server = ServerConfig::from_lookup(|key| {
            (key == "PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(server.port, 3001);
    }
}
