//! Notification routing
//!
//! Events from the pipeline fan out to every configured sink. Each sink applies
//! its own minimum BTC value, list rule and hot-token cooldown. A failing sink
//! never blocks the others, and enrichment (names, prices) is best-effort.

pub mod cache;
pub mod dispatcher;
pub mod enrich;
pub mod message;
pub mod sink;

use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::feed::SwapRecord;
use crate::flow::DailyReport;
use crate::holders::HolderChange;
use crate::hot::PoolActivity;
use crate::retrieval::{BearerToken, ResilientClient, RetrievalConfig};

pub use cache::TtlCache;
pub use dispatcher::{DispatchReport, Dispatcher, SinkOutcome, SinkRoute};
pub use enrich::{Enricher, Enrichment, HttpMetadataSource, MetadataSource, TokenMetadata};
pub use message::{format_event, MessageButton, OutgoingMessage};
pub use sink::{LogSink, NotificationSink, TelegramSink};

/// Something worth telling someone about
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    Swap(SwapRecord),
    HolderChange(HolderChange),
    HotToken(PoolActivity),
    DailyReport(DailyReport),
}

impl NotificationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::Swap(_) => "swap",
            NotificationEvent::HolderChange(_) => "holder_change",
            NotificationEvent::HotToken(_) => "hot_token",
            NotificationEvent::DailyReport(_) => "daily_report",
        }
    }

    /// Pool the event is about; reports span a whole ticker
    pub fn pool_id(&self) -> Option<&str> {
        match self {
            NotificationEvent::Swap(swap) => Some(&swap.pool_id),
            NotificationEvent::HolderChange(change) => Some(&change.pool_id),
            NotificationEvent::HotToken(activity) => Some(&activity.pool_id),
            NotificationEvent::DailyReport(_) => None,
        }
    }

    /// BTC value checked against a sink's minimum; `None` bypasses the check
    pub fn btc_value(&self) -> Option<Decimal> {
        match self {
            NotificationEvent::Swap(swap) => Some(swap.btc_value()),
            NotificationEvent::HolderChange(change) => Some(change.record.btc_value),
            NotificationEvent::HotToken(_) | NotificationEvent::DailyReport(_) => None,
        }
    }

    /// Address whose display name is worth looking up
    pub fn address(&self) -> Option<&str> {
        match self {
            NotificationEvent::Swap(swap) => Some(&swap.swapper),
            NotificationEvent::HolderChange(change) => Some(&change.address),
            NotificationEvent::HotToken(_) | NotificationEvent::DailyReport(_) => None,
        }
    }

    pub fn is_hot_token(&self) -> bool {
        matches!(self, NotificationEvent::HotToken(_))
    }
}

/// How a sink treats the allow/block lists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListRule {
    /// Anything not block-listed
    #[default]
    All,
    /// Only allow-listed pools
    AllowListOnly,
    /// Lists do not apply
    IgnoreLists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Telegram,
    Log,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Telegram => write!(f, "telegram"),
            SinkKind::Log => write!(f, "log"),
        }
    }
}

/// One delivery target and its rules
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub name: String,

    pub kind: SinkKind,

    /// Telegram bot token
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Telegram chat id
    #[serde(default)]
    pub chat_id: Option<String>,

    /// Events worth less than this (whole BTC) are not sent
    #[serde(default)]
    pub min_btc: Decimal,

    #[serde(default)]
    pub list_rule: ListRule,

    /// Per-pool cooldown for hot-token alerts
    #[serde(default = "default_sink_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_sink_cooldown_secs() -> u64 { 3600 }

/// Best-effort lookup settings
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_enrichment_enabled")]
    pub enabled: bool,

    /// Upper bound on all lookups for one message
    #[serde(default = "default_enrichment_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_enrichment_enabled() -> bool { true }
fn default_enrichment_timeout_ms() -> u64 { 1500 }
fn default_cache_ttl_secs() -> u64 { 300 }
fn default_cache_capacity() -> usize { 1000 }

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: default_enrichment_enabled(),
            timeout_ms: default_enrichment_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Notification settings
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Trade page link, `{pool}` is replaced by the pool id
    #[serde(default)]
    pub pool_url_template: Option<String>,

    /// Telegram Bot API base URL
    #[serde(default = "default_telegram_api_url")]
    pub telegram_api_url: String,
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            sinks: Vec::new(),
            enrichment: EnrichmentConfig::default(),
            pool_url_template: None,
            telegram_api_url: default_telegram_api_url(),
        }
    }
}

/// Build a route for every configured sink
///
/// Telegram sinks share one resilient client.
pub fn build_routes(
    config: &NotifyConfig,
    retrieval: &RetrievalConfig,
    cancel: &CancellationToken,
) -> Result<Vec<SinkRoute>> {
    let mut telegram_client: Option<Arc<ResilientClient>> = None;
    let mut routes = Vec::with_capacity(config.sinks.len());

    for sink_config in &config.sinks {
        let (sink, target): (Arc<dyn NotificationSink>, String) = match sink_config.kind {
            SinkKind::Log => (
                Arc::new(LogSink::new(&sink_config.name)),
                sink_config.name.clone(),
            ),
            SinkKind::Telegram => {
                let (Some(token), Some(chat_id)) = (&sink_config.bot_token, &sink_config.chat_id)
                else {
                    return Err(Error::Config(format!(
                        "Telegram sink '{}' needs bot_token and chat_id",
                        sink_config.name
                    )));
                };

                let client = match &telegram_client {
                    Some(client) => client.clone(),
                    None => {
                        let client = Arc::new(ResilientClient::new(
                            "telegram",
                            retrieval,
                            Arc::new(BearerToken::anonymous()),
                        )?);
                        telegram_client = Some(client.clone());
                        client
                    }
                };

                (
                    Arc::new(TelegramSink::new(
                        &sink_config.name,
                        client,
                        &config.telegram_api_url,
                        token,
                        cancel.clone(),
                    )),
                    chat_id.clone(),
                )
            }
        };

        routes.push(SinkRoute {
            name: sink_config.name.clone(),
            sink,
            target,
            min_btc: sink_config.min_btc,
            list_rule: sink_config.list_rule,
            cooldown: Duration::from_secs(sink_config.cooldown_secs),
        });
    }

    Ok(routes)
}
