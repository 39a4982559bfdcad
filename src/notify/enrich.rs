//! Best-effort message enrichment: token names, prices, wallet names

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::cache::TtlCache;
use super::{EnrichmentConfig, NotificationEvent};
use crate::error::{Error, Result};
use crate::feed::sats_to_btc;
use crate::retrieval::{AuthMode, ResilientClient};
use crate::wire::{ObjectEnvelope, Scalar};

/// Token details from the metadata source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub decimals: Option<u32>,
    /// Price of one token, whole BTC
    pub price_btc: Option<Decimal>,
    pub image_url: Option<String>,
}

/// Where enrichment data comes from; every lookup may come back empty
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn token_metadata(&self, pool_id: &str) -> Result<Option<TokenMetadata>>;

    /// Market cap in whole BTC
    async fn market_cap(&self, pool_id: &str) -> Result<Option<Decimal>>;

    async fn wallet_name(&self, address: &str) -> Result<Option<String>>;
}

/// What the enricher found for one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub token: Option<TokenMetadata>,
    pub market_cap_btc: Option<Decimal>,
    pub wallet_name: Option<String>,
}

/// Cached, time-bounded lookups in front of a metadata source
pub struct Enricher {
    source: Arc<dyn MetadataSource>,
    tokens: TtlCache<Option<TokenMetadata>>,
    market_caps: TtlCache<Option<Decimal>>,
    wallet_names: TtlCache<Option<String>>,
    timeout: Duration,
}

impl Enricher {
    pub fn new(source: Arc<dyn MetadataSource>, config: &EnrichmentConfig) -> Self {
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        Self {
            source,
            tokens: TtlCache::new(ttl, config.cache_capacity),
            // Market caps go stale sooner than names
            market_caps: TtlCache::new(ttl / 5, config.cache_capacity),
            wallet_names: TtlCache::new(ttl, config.cache_capacity),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Look up everything useful for an event; never fails
    pub async fn enrich(&self, event: &NotificationEvent) -> Enrichment {
        let pool_id = event.pool_id();
        let address = event.address();
        if pool_id.is_none() && address.is_none() {
            return Enrichment::default();
        }

        let lookups = async {
            let token = async {
                match pool_id {
                    Some(pool) => {
                        self.tokens
                            .get_or_fetch(pool, || self.source.token_metadata(pool))
                            .await
                    }
                    None => Ok(None),
                }
            };
            let market_cap = async {
                match pool_id {
                    Some(pool) => {
                        self.market_caps
                            .get_or_fetch(pool, || self.source.market_cap(pool))
                            .await
                    }
                    None => Ok(None),
                }
            };
            let wallet_name = async {
                match address {
                    Some(address) => {
                        self.wallet_names
                            .get_or_fetch(address, || self.source.wallet_name(address))
                            .await
                    }
                    None => Ok(None),
                }
            };
            tokio::join!(token, market_cap, wallet_name)
        };

        match tokio::time::timeout(self.timeout, lookups).await {
            Ok((token, market_cap, wallet_name)) => Enrichment {
                token: settle("token", token),
                market_cap_btc: settle("market_cap", market_cap),
                wallet_name: settle("wallet_name", wallet_name),
            },
            Err(_) => {
                debug!(kind = event.kind(), timeout_ms = self.timeout.as_millis() as u64, "Enrichment timed out");
                Enrichment::default()
            }
        }
    }
}

fn settle<T>(lookup: &str, result: Result<Option<T>>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            debug!(lookup = %lookup, error = %e, "Enrichment lookup failed");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireToken {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "symbol")]
    ticker: Option<String>,
    #[serde(default, alias = "divisibility")]
    decimals: Option<u32>,
    /// Sats per token
    #[serde(default, alias = "price_sats")]
    price: Option<Scalar>,
    /// Sats
    #[serde(default, alias = "marketcap", alias = "marketCap")]
    market_cap: Option<Scalar>,
    #[serde(default, alias = "image", alias = "icon")]
    image_url: Option<String>,
}

/// Wallet profiles name their owner in one of a few shapes
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireProfile {
    Username { username: String },
    Named { name: String },
    Nested { profile: Box<WireProfile> },
    Anonymous {},
}

impl WireProfile {
    fn into_name(self) -> Option<String> {
        let name = match self {
            WireProfile::Username { username } => username,
            WireProfile::Named { name } => name,
            WireProfile::Nested { profile } => return profile.into_name(),
            WireProfile::Anonymous {} => return None,
        };
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}

fn scalar_btc(value: Option<Scalar>) -> Option<Decimal> {
    value
        .and_then(|v| v.to_decimal().ok())
        .map(sats_to_btc)
}

/// Metadata source over HTTP
pub struct HttpMetadataSource {
    client: Arc<ResilientClient>,
    base_url: String,
    cancel: CancellationToken,
}

impl HttpMetadataSource {
    pub fn new(client: Arc<ResilientClient>, base_url: &str, cancel: CancellationToken) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cancel,
        }
    }

    async fn fetch_token(&self, pool_id: &str) -> Result<Option<WireToken>> {
        let url = format!("{}/token/{}", self.base_url, pool_id);
        match self
            .client
            .get_json::<ObjectEnvelope<WireToken>>(&url, &[], AuthMode::Optional, &self.cancel)
            .await
        {
            Ok(envelope) => Ok(Some(envelope.into_inner())),
            Err(Error::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn token_metadata(&self, pool_id: &str) -> Result<Option<TokenMetadata>> {
        Ok(self.fetch_token(pool_id).await?.map(|token| TokenMetadata {
            name: token.name,
            ticker: token.ticker,
            decimals: token.decimals,
            price_btc: scalar_btc(token.price),
            image_url: token.image_url,
        }))
    }

    async fn market_cap(&self, pool_id: &str) -> Result<Option<Decimal>> {
        Ok(self
            .fetch_token(pool_id)
            .await?
            .and_then(|token| scalar_btc(token.market_cap)))
    }

    async fn wallet_name(&self, address: &str) -> Result<Option<String>> {
        let url = format!("{}/user/{}", self.base_url, address);
        match self
            .client
            .get_json::<ObjectEnvelope<WireProfile>>(&url, &[], AuthMode::Optional, &self.cancel)
            .await
        {
            Ok(envelope) => Ok(envelope.into_inner().into_name()),
            Err(Error::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixed answers, or failures, or a hang
    #[derive(Default)]
    pub struct FixedMetadata {
        pub token: Option<TokenMetadata>,
        pub wallet: Option<String>,
        pub fail: bool,
        pub hang: bool,
        pub calls: AtomicUsize,
    }

    impl FixedMetadata {
        async fn answer<T>(&self, value: Option<T>) -> Result<Option<T>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail {
                return Err(Error::Http {
                    status: 500,
                    body: "boom".into(),
                    retry_after: None,
                });
            }
            Ok(value)
        }
    }

    #[async_trait]
    impl MetadataSource for FixedMetadata {
        async fn token_metadata(&self, _pool_id: &str) -> Result<Option<TokenMetadata>> {
            self.answer(self.token.clone()).await
        }

        async fn market_cap(&self, _pool_id: &str) -> Result<Option<Decimal>> {
            self.answer(Some(Decimal::from(12))).await
        }

        async fn wallet_name(&self, _address: &str) -> Result<Option<String>> {
            self.answer(self.wallet.clone()).await
        }
    }
}
