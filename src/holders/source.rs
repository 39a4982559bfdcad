//! Live balance collaborator and its HTTP implementation

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::types::{Holdings, TokenBalance};
use crate::error::Result;
use crate::feed::sats_to_btc;
use crate::retrieval::{AuthMode, ResilientClient};
use crate::wire::Scalar;

/// Where live balances come from
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn get_address_holdings(&self, address: &str) -> Result<Holdings>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireHoldings {
    Object {
        #[serde(default, alias = "btc_balance", alias = "btcBalance")]
        native: Option<Scalar>,
        #[serde(alias = "data", alias = "tokens", alias = "balances")]
        items: Vec<serde_json::Value>,
    },
    Bare(Vec<serde_json::Value>),
}

#[derive(Debug, Deserialize)]
struct WireTokenBalance {
    #[serde(alias = "id", alias = "token", alias = "tokenId")]
    token_id: Scalar,
    #[serde(default, alias = "symbol")]
    ticker: Option<String>,
    #[serde(alias = "amount", alias = "quantity")]
    balance: Scalar,
}

fn decode_holdings(wire: WireHoldings) -> Holdings {
    let (native, items) = match wire {
        WireHoldings::Object { native, items } => (native, items),
        WireHoldings::Bare(items) => (None, items),
    };

    let native = match native.map(|n| n.to_decimal()).transpose() {
        Ok(sats) => sats.map(sats_to_btc).unwrap_or(Decimal::ZERO),
        Err(e) => {
            warn!(error = %e, "Unreadable native balance");
            Decimal::ZERO
        }
    };

    let tokens = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<WireTokenBalance>(item) {
            Ok(token) => Some(TokenBalance {
                token_id: token.token_id.to_id(),
                ticker: token.ticker,
                // Kept raw; the reconciler decides what is parsable
                balance: token.balance.to_id(),
            }),
            Err(e) => {
                warn!(error = %e, "Skipping malformed token balance");
                None
            }
        })
        .collect();

    Holdings { native, tokens }
}

/// Balance source over HTTP
pub struct HttpBalanceSource {
    client: Arc<ResilientClient>,
    base_url: String,
    cancel: CancellationToken,
}

impl HttpBalanceSource {
    pub fn new(client: Arc<ResilientClient>, base_url: &str, cancel: CancellationToken) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cancel,
        }
    }
}

#[async_trait]
impl BalanceSource for HttpBalanceSource {
    async fn get_address_holdings(&self, address: &str) -> Result<Holdings> {
        let url = format!("{}/user/{}/balances", self.base_url, address);
        let wire: WireHoldings = self
            .client
            .get_json(&url, &[], AuthMode::Optional, &self.cancel)
            .await?;
        Ok(decode_holdings(wire))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Balances keyed by address for a single token; unknown addresses fail
    #[derive(Default)]
    pub struct StaticBalances {
        token_id: String,
        balances: Mutex<HashMap<String, String>>,
        pub calls: AtomicUsize,
    }

    impl StaticBalances {
        pub fn new(token_id: &str) -> Self {
            Self {
                token_id: token_id.to_string(),
                ..Default::default()
            }
        }

        pub fn set(&self, address: &str, balance: &str) {
            self.balances
                .lock()
                .unwrap()
                .insert(address.to_string(), balance.to_string());
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BalanceSource for StaticBalances {
        async fn get_address_holdings(&self, address: &str) -> Result<Holdings> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let balance = self.balances.lock().unwrap().get(address).cloned();
            match balance {
                Some(balance) => Ok(Holdings {
                    native: Decimal::ZERO,
                    tokens: vec![TokenBalance {
                        token_id: self.token_id.clone(),
                        ticker: None,
                        balance,
                    }],
                }),
                None => Err(Error::Http {
                    status: 404,
                    body: "unknown address".into(),
                    retry_after: None,
                }),
            }
        }
    }
}
