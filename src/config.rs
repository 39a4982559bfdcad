//! Configuration loading and validation

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub use crate::feed::FeedConfig;
pub use crate::flow::ReportConfig;
pub use crate::holders::HoldersConfig;
pub use crate::hot::HotTokenConfig;
pub use crate::notify::NotifyConfig;
pub use crate::retrieval::RetrievalConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub holders: HoldersConfig,
    #[serde(default)]
    pub hot_tokens: HotTokenConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub lists: ListsConfig,
}

/// Upstream DEX API endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL serving `/swaps`
    #[serde(default = "default_api_url")]
    pub feed_url: String,

    /// Base URL serving `/user/{address}/balances`
    #[serde(default = "default_api_url")]
    pub balance_url: String,

    /// Base URL serving `/token/{pool}` and `/user/{address}`
    #[serde(default = "default_api_url")]
    pub metadata_url: String,

    /// Bearer token for authenticated calls
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Balance sweeps refuse to run unauthenticated
    #[serde(default)]
    pub sweep_requires_auth: bool,
}

fn default_api_url() -> String {
    "https://api.odin.fun/v1".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            feed_url: default_api_url(),
            balance_url: default_api_url(),
            metadata_url: default_api_url(),
            auth_token: None,
            sweep_requires_auth: false,
        }
    }
}

/// Where state is persisted
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Pools seeded into the persisted lists on first start
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListsConfig {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub block: Vec<String>,
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SENTINEL_)
            .add_source(
                config::Environment::with_prefix("SENTINEL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("api.feed_url", &self.api.feed_url),
            ("api.balance_url", &self.api.balance_url),
            ("api.metadata_url", &self.api.metadata_url),
            ("notify.telegram_api_url", &self.notify.telegram_api_url),
        ] {
            url::Url::parse(value).with_context(|| format!("Invalid {}: {}", name, value))?;
        }

        if self.feed.window_size == 0 {
            anyhow::bail!("feed.window_size must be positive");
        }
        if self.feed.poll_interval_secs == 0 {
            anyhow::bail!("feed.poll_interval_secs must be positive");
        }

        // Retrieval
        let retrieval = &self.retrieval;
        if retrieval.requests_per_second == 0 {
            anyhow::bail!("retrieval.requests_per_second must be positive");
        }
        if retrieval.backoff_factor < 1.0 {
            anyhow::bail!(
                "retrieval.backoff_factor must be at least 1, got {}",
                retrieval.backoff_factor
            );
        }
        if retrieval.base_delay_ms > retrieval.max_delay_ms {
            anyhow::bail!("retrieval.base_delay_ms cannot exceed max_delay_ms");
        }

        // Holders
        if self.holders.min_holding < Decimal::ZERO {
            anyhow::bail!("holders.min_holding cannot be negative");
        }
        if self.holders.epsilon < Decimal::ZERO {
            anyhow::bail!("holders.epsilon cannot be negative");
        }
        for tracked in &self.holders.tickers {
            if tracked.ticker.trim().is_empty() || tracked.token_id.trim().is_empty() {
                anyhow::bail!("Tracked tickers need both ticker and token_id");
            }
        }

        // Hot tokens
        let hot = &self.hot_tokens;
        if hot.min_swaps == 0 {
            anyhow::bail!("hot_tokens.min_swaps must be positive");
        }
        if hot.min_unique_addresses > hot.min_swaps {
            anyhow::bail!(
                "hot_tokens.min_unique_addresses ({}) cannot exceed min_swaps ({})",
                hot.min_unique_addresses,
                hot.min_swaps
            );
        }
        if hot.min_swaps > self.feed.window_size {
            tracing::warn!(
                min_swaps = hot.min_swaps,
                window = self.feed.window_size,
                "hot_tokens.min_swaps exceeds the feed window, no pool can qualify"
            );
        }

        // Notify
        for sink in &self.notify.sinks {
            if sink.min_btc < Decimal::ZERO {
                anyhow::bail!("Sink '{}' has a negative min_btc", sink.name);
            }
        }

        if self.report.hour_utc > 23 {
            anyhow::bail!("report.hour_utc must be 0-23, got {}", self.report.hour_utc);
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let tickers: Vec<String> = self
            .holders
            .tickers
            .iter()
            .map(|t| format!("{} ({})", t.ticker, t.token_id))
            .collect();
        let sinks: Vec<String> = self
            .notify
            .sinks
            .iter()
            .map(|s| {
                format!(
                    "{} [{}] min_btc={} token={}",
                    s.name,
                    s.kind,
                    s.min_btc,
                    if s.bot_token.is_some() { "***" } else { "(not set)" }
                )
            })
            .collect();

        format!(
            r#"Configuration:
  API:
    feed: {}
    balances: {}
    metadata: {}
    auth_token: {}
  Retrieval:
    rate: {}/s (burst {})
    retries: {} ({}ms..{}ms, x{})
    breaker: {} failures, {}s cooldown
  Feed:
    poll_interval: {}s
    window: {}
  Holders:
    tickers: {:?}
    min_holding: {}
    epsilon: {}
    sweep_interval: {}s
  Hot tokens:
    enabled: {}
    K/A: {}/{}
    cooldown: {}s
  Notify:
    sinks: {:?}
    enrichment: {}
  Report:
    enabled: {}
    hour_utc: {}
  Storage:
    data_dir: {}
"#,
            mask_url(&self.api.feed_url),
            mask_url(&self.api.balance_url),
            mask_url(&self.api.metadata_url),
            if self.api.auth_token.is_some() { "***" } else { "(not set)" },
            self.retrieval.requests_per_second,
            self.retrieval.burst,
            self.retrieval.max_retries,
            self.retrieval.base_delay_ms,
            self.retrieval.max_delay_ms,
            self.retrieval.backoff_factor,
            self.retrieval.failure_threshold,
            self.retrieval.breaker_cooldown_secs,
            self.feed.poll_interval_secs,
            self.feed.window_size,
            tickers,
            self.holders.min_holding,
            self.holders.epsilon,
            self.holders.sweep_interval_secs,
            self.hot_tokens.enabled,
            self.hot_tokens.min_swaps,
            self.hot_tokens.min_unique_addresses,
            self.hot_tokens.cooldown_secs,
            sinks,
            self.notify.enrichment.enabled,
            self.report.enabled,
            self.report.hour_utc,
            self.storage.data_dir.display(),
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.feed.window_size, 100);
        assert_eq!(config.hot_tokens.min_swaps, 6);
        assert_eq!(config.holders.min_holding, Decimal::from(10));
    }

    #[test]
    fn test_rejects_unique_above_swaps() {
        let mut config = Config::default();
        config.hot_tokens.min_unique_addresses = 7;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.hot_tokens.min_swaps = 0;
        config.hot_tokens.min_unique_addresses = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_nonsense() {
        let mut config = Config::default();
        config.feed.window_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.holders.min_holding = Decimal::from(-1);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retrieval.backoff_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.report.hour_utc = 24;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.api.feed_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[api]
feed_url = "https://api.example.com/v1"
auth_token = "secret-token"

[holders]
min_holding = "25"
tickers = [{{ ticker = "ODINDOG", token_id = "2jjj" }}]

[hot_tokens]
min_swaps = 8
min_unique_addresses = 4

[[notify.sinks]]
name = "alerts"
kind = "telegram"
bot_token = "123:abc"
chat_id = "-100200"
min_btc = "0.0025"
list_rule = "allow_list_only"

[lists]
block = ["rug"]
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.api.feed_url, "https://api.example.com/v1");
        assert_eq!(config.holders.min_holding, Decimal::from(25));
        assert_eq!(config.holders.tickers[0].token_id, "2jjj");
        assert_eq!(config.hot_tokens.min_swaps, 8);
        assert_eq!(config.notify.sinks.len(), 1);
        assert_eq!(config.lists.block, vec!["rug".to_string()]);
        // Untouched sections keep their defaults
        assert_eq!(config.feed.window_size, 100);

        let shown = config.masked_display();
        assert!(!shown.contains("secret-token"));
        assert!(!shown.contains("123:abc"));
        assert!(shown.contains("ODINDOG (2jjj)"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.feed.poll_interval_secs, 15);
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(mask_url("https://api.example.com"), "https://api.example.com");
    }
}
