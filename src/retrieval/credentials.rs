//! Authenticated-call provider
//!
//! Acquiring and refreshing credentials happens elsewhere. The retrieval layer
//! only needs to attach a credential to a request and to know whether the
//! current one is usable.

use chrono::{DateTime, Utc};
use reqwest::RequestBuilder;

/// Whether a call needs credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Never attach credentials
    Anonymous,
    /// Attach if valid, otherwise go unauthenticated
    Optional,
    /// Fail with `CredentialUnavailable` unless valid
    Required,
}

/// Source of a credential for outbound requests
pub trait CredentialProvider: Send + Sync {
    /// Attach the credential to a request
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder;

    /// Whether the credential can be used right now
    fn is_valid(&self) -> bool;
}

/// Static bearer token with an optional expiry
#[derive(Debug, Clone, Default)]
pub struct BearerToken {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl BearerToken {
    pub fn new(token: Option<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        let token = token.filter(|t| !t.trim().is_empty());
        Self { token, expires_at }
    }

    /// No credential at all; every call runs unauthenticated
    pub fn anonymous() -> Self {
        Self::default()
    }

    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.token, self.expires_at) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(_), Some(expiry)) => now < expiry,
        }
    }
}

impl CredentialProvider for BearerToken {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) if self.is_valid() => request.bearer_auth(token),
            _ => request,
        }
    }

    fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}
