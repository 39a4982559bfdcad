//! Decoding helpers for loosely shaped upstream JSON
//!
//! Upstreams disagree on envelopes, field names and whether numbers are
//! numbers or strings. Everything here converts those shapes into clean
//! internal values at the boundary.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A number that may arrive as a JSON number or a string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn to_decimal(&self) -> Result<Decimal> {
        match self {
            Scalar::Int(v) => Ok(Decimal::from(*v)),
            Scalar::Float(v) => Decimal::try_from(*v)
                .map_err(|_| Error::InvalidAmount(v.to_string())),
            Scalar::Text(s) => parse_decimal(s),
        }
    }

    /// Identifiers are sometimes numeric
    pub fn to_id(&self) -> String {
        match self {
            Scalar::Int(v) => v.to_string(),
            Scalar::Float(v) => v.to_string(),
            Scalar::Text(s) => s.clone(),
        }
    }
}

/// Parse a decimal string, accepting scientific notation
pub fn parse_decimal(raw: &str) -> Result<Decimal> {
    let s = raw.trim();
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|_| Error::InvalidAmount(raw.to_string()))
}

/// A timestamp as epoch seconds, epoch millis or RFC 3339 text
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireTime {
    Epoch(i64),
    Text(String),
}

impl WireTime {
    pub fn to_utc(&self) -> Result<DateTime<Utc>> {
        match self {
            // Anything past year 5138 in seconds is really milliseconds
            WireTime::Epoch(v) if *v > 100_000_000_000 => Utc
                .timestamp_millis_opt(*v)
                .single()
                .ok_or_else(|| Error::Decode(format!("Bad timestamp: {}", v))),
            WireTime::Epoch(v) => Utc
                .timestamp_opt(*v, 0)
                .single()
                .ok_or_else(|| Error::Decode(format!("Bad timestamp: {}", v))),
            WireTime::Text(s) => {
                if let Ok(v) = s.trim().parse::<i64>() {
                    return WireTime::Epoch(v).to_utc();
                }
                DateTime::parse_from_rfc3339(s.trim())
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| Error::Decode(format!("Bad timestamp {:?}: {}", s, e)))
            }
        }
    }
}

/// List responses: either a bare array or an object wrapping one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListEnvelope<T> {
    Wrapped {
        #[serde(alias = "items", alias = "results", alias = "swaps")]
        data: Vec<T>,
        #[serde(default, alias = "total", alias = "totalCount")]
        count: Option<u64>,
    },
    Bare(Vec<T>),
}

impl<T> ListEnvelope<T> {
    pub fn into_parts(self) -> (Vec<T>, Option<u64>) {
        match self {
            ListEnvelope::Wrapped { data, count } => (data, count),
            ListEnvelope::Bare(data) => (data, None),
        }
    }
}

/// Single-object responses, optionally wrapped in `data`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ObjectEnvelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> ObjectEnvelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            ObjectEnvelope::Wrapped { data } => data,
            ObjectEnvelope::Bare(data) => data,
        }
    }
}
