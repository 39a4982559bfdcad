//! Swap feed collaborator and its HTTP implementation

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{AssetLeg, SwapPage, SwapRecord};
use crate::error::Result;
use crate::retrieval::{AuthMode, ResilientClient};
use crate::wire::{ListEnvelope, Scalar, WireTime};

/// Where swaps come from
#[async_trait]
pub trait SwapFeedSource: Send + Sync {
    /// Most recent swaps across all pools, newest first
    async fn list_recent_swaps(&self, limit: usize) -> Result<SwapPage>;

    /// Most recent swaps by one address in one pool, newest first
    async fn list_swaps_for_address(
        &self,
        address: &str,
        pool_id: &str,
        limit: usize,
    ) -> Result<Vec<SwapRecord>>;
}

/// Swap as the feed API sends it
#[derive(Debug, Deserialize)]
struct WireSwap {
    id: Scalar,
    #[serde(alias = "token", alias = "pool", alias = "tokenId", alias = "token_id")]
    pool_id: String,
    #[serde(alias = "user", alias = "address", alias = "trader")]
    swapper: String,
    #[serde(alias = "tokenIn")]
    asset_in: String,
    #[serde(alias = "amountIn")]
    amount_in: Scalar,
    #[serde(alias = "tokenOut")]
    asset_out: String,
    #[serde(alias = "amountOut")]
    amount_out: Scalar,
    #[serde(default)]
    price: Option<Scalar>,
    #[serde(default)]
    fee: Option<Scalar>,
    #[serde(alias = "time", alias = "timestamp", alias = "createdAt")]
    created_at: WireTime,
}

impl WireSwap {
    fn into_record(self) -> Result<SwapRecord> {
        Ok(SwapRecord {
            id: self.id.to_id(),
            pool_id: self.pool_id,
            swapper: self.swapper,
            leg_in: AssetLeg {
                asset: self.asset_in,
                amount: self.amount_in.to_decimal()?,
            },
            leg_out: AssetLeg {
                asset: self.asset_out,
                amount: self.amount_out.to_decimal()?,
            },
            price: self.price.map(|p| p.to_decimal()).transpose()?.unwrap_or_default(),
            fee: self.fee.map(|f| f.to_decimal()).transpose()?.unwrap_or_default(),
            created_at: self.created_at.to_utc()?,
        })
    }
}

/// Decode swap items one by one; a malformed item is skipped
pub(crate) fn decode_swaps(items: Vec<serde_json::Value>) -> Vec<SwapRecord> {
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let decoded = serde_json::from_value::<WireSwap>(item)
            .map_err(crate::error::Error::from)
            .and_then(WireSwap::into_record);
        match decoded {
            Ok(record) => records.push(record),
            Err(e) => warn!(error = %e, "Skipping malformed swap"),
        }
    }
    records
}

/// Swap feed over HTTP
pub struct HttpSwapFeed {
    client: Arc<ResilientClient>,
    base_url: String,
    cancel: CancellationToken,
}

impl HttpSwapFeed {
    pub fn new(client: Arc<ResilientClient>, base_url: &str, cancel: CancellationToken) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cancel,
        }
    }
}

#[async_trait]
impl SwapFeedSource for HttpSwapFeed {
    async fn list_recent_swaps(&self, limit: usize) -> Result<SwapPage> {
        let url = format!("{}/swaps", self.base_url);
        let query = [
            ("limit", limit.to_string()),
            ("sort", "time:desc".to_string()),
        ];

        let envelope: ListEnvelope<serde_json::Value> = self
            .client
            .get_json(&url, &query, AuthMode::Optional, &self.cancel)
            .await?;
        let (items, total) = envelope.into_parts();
        let fetched = items.len();
        let records = decode_swaps(items);

        debug!(fetched, decoded = records.len(), total = ?total, "Fetched recent swaps");
        Ok(SwapPage { records, total })
    }

    async fn list_swaps_for_address(
        &self,
        address: &str,
        pool_id: &str,
        limit: usize,
    ) -> Result<Vec<SwapRecord>> {
        let url = format!("{}/swaps", self.base_url);
        let query = [
            ("user", address.to_string()),
            ("token", pool_id.to_string()),
            ("limit", limit.to_string()),
            ("sort", "time:desc".to_string()),
        ];

        let envelope: ListEnvelope<serde_json::Value> = self
            .client
            .get_json(&url, &query, AuthMode::Optional, &self.cancel)
            .await?;
        Ok(decode_swaps(envelope.into_parts().0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::SwapSide;
    use rust_decimal::Decimal;
    use serde_json::json;

    #[test]
    fn test_decode_mixed_shapes() {
        let items = vec![
            json!({
                "id": 101,
                "token": "2jjj",
                "user": "bc1qbuyer",
                "asset_in": "btc",
                "amount_in": "500000",
                "asset_out": "2jjj",
                "amount_out": 1200.5,
                "price": "0.41",
                "time": 1_760_000_000_000i64
            }),
            json!({
                "id": "102",
                "pool_id": "2jjj",
                "swapper": "bc1qseller",
                "asset_in": "2jjj",
                "amount_in": 10,
                "asset_out": "BTC",
                "amount_out": 250000,
                "created_at": "2026-10-19T12:00:00Z"
            }),
        ];

        let records = decode_swaps(items);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].id, "101");
        assert_eq!(records[0].side(), SwapSide::Buy);
        assert_eq!(records[0].btc_value(), "0.005".parse::<Decimal>().unwrap());
        assert_eq!(records[0].fee, Decimal::ZERO);

        assert_eq!(records[1].side(), SwapSide::Sell);
        assert_eq!(records[1].price, Decimal::ZERO);
    }

    #[test]
    fn test_malformed_item_skipped() {
        let items = vec![
            json!({"id": 1, "token": "p"}),
            json!({
                "id": 2, "token": "p", "user": "a",
                "asset_in": "btc", "amount_in": "not-a-number",
                "asset_out": "p", "amount_out": 1, "time": 1_760_000_000
            }),
            json!({
                "id": 3, "token": "p", "user": "a",
                "asset_in": "btc", "amount_in": 1,
                "asset_out": "p", "amount_out": 1, "time": 1_760_000_000
            }),
        ];

        let records = decode_swaps(items);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "3");
    }
}
