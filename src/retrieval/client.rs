//! HTTP client wrapped in the full retrieval stack

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::circuit_breaker::CircuitBreaker;
use super::credentials::{AuthMode, CredentialProvider};
use super::rate_limit::RequestLimiter;
use super::retry::{retry_with_policy, RetryPolicy};
use super::RetrievalConfig;
use crate::error::{Error, Result};

/// Longest response body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// One upstream service: its own limiter and breaker, shared retry policy
pub struct ResilientClient {
    name: String,
    http: Client,
    limiter: RequestLimiter,
    breaker: CircuitBreaker,
    policy: RetryPolicy,
    credentials: Arc<dyn CredentialProvider>,
    attempt_timeout: Duration,
    call_deadline: Duration,
}

impl ResilientClient {
    pub fn new(
        name: impl Into<String>,
        config: &RetrievalConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let name = name.into();
        let http = Client::builder()
            .user_agent(concat!("swap-sentinel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            breaker: CircuitBreaker::new(
                name.clone(),
                config.failure_threshold,
                Duration::from_secs(config.breaker_cooldown_secs),
            ),
            limiter: RequestLimiter::new(config.requests_per_second, config.burst),
            policy: RetryPolicy::from_config(config),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            call_deadline: Duration::from_millis(config.call_deadline_ms),
            name,
            http,
            credentials,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Whether authenticated calls can be made right now
    pub fn has_credential(&self) -> bool {
        self.credentials.is_valid()
    }

    /// GET a JSON document
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        auth: AuthMode,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.execute(&loggable(url), auth, cancel, |http| http.get(url).query(query))
            .await
    }

    /// POST a JSON body and decode a JSON reply
    pub async fn post_json<B, T>(
        &self,
        url: &str,
        body: &B,
        auth: AuthMode,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(&loggable(url), auth, cancel, |http| http.post(url).json(body))
            .await
    }

    async fn execute<T, F>(
        &self,
        label: &str,
        auth: AuthMode,
        cancel: &CancellationToken,
        build: F,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let authorize = match auth {
            AuthMode::Anonymous => false,
            AuthMode::Optional => self.credentials.is_valid(),
            AuthMode::Required => {
                if !self.credentials.is_valid() {
                    return Err(Error::CredentialUnavailable(self.name.clone()));
                }
                true
            }
        };

        let run = retry_with_policy(&self.policy, cancel, label, |attempt| {
            let mut request = build(&self.http);
            if authorize {
                request = self.credentials.authorize(request);
            }
            debug!(service = %self.name, url = %label, attempt, "Outbound request");
            self.attempt(request, cancel)
        });

        match tokio::time::timeout(self.call_deadline, run).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.call_deadline.as_millis() as u64)),
        }
    }

    /// One attempt through breaker, limiter and attempt timeout
    async fn attempt<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<T> {
        // Released on drop if this future never reaches an outcome
        let permit = self.breaker.try_acquire()?;

        self.limiter.acquire(cancel).await?;

        let result = match tokio::time::timeout(self.attempt_timeout, send::<T>(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.attempt_timeout.as_millis() as u64)),
        };

        match &result {
            Ok(_) => permit.success(),
            Err(e) if e.is_upstream_failure() => permit.failure(),
            // The service answered; a 4xx is our problem, not its health
            Err(_) => permit.success(),
        }

        result
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let response = request.send().await?;
    let status = response.status();

    if !status.is_success() {
        let retry_after = parse_retry_after(response.headers());
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        return Err(Error::Http {
            status: status.as_u16(),
            body,
            retry_after,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| Error::Decode(e.to_string()))
}

/// URL safe to log: path segments carrying a `id:secret` token are masked
fn loggable(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, url),
    };
    let masked: Vec<&str> = rest
        .split('/')
        .enumerate()
        .map(|(i, segment)| if i > 0 && segment.contains(':') { "***" } else { segment })
        .collect();
    match scheme {
        Some(scheme) => format!("{}://{}", scheme, masked.join("/")),
        None => masked.join("/"),
    }
}

/// Retry-After in delta-seconds form (HTTP-date is not used by our upstreams)
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::circuit_breaker::BreakerState;
    use crate::retrieval::credentials::BearerToken;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_loggable_masks_token_segment() {
        assert_eq!(
            loggable("https://api.telegram.org/bot123:abc/sendMessage"),
            "https://api.telegram.org/***/sendMessage"
        );
        assert_eq!(
            loggable("https://api.odin.fun/v1/user/bc1qa/balances"),
            "https://api.odin.fun/v1/user/bc1qa/balances"
        );
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn test_required_auth_without_credential_fails_fast() {
        let client = ResilientClient::new(
            "balances",
            &RetrievalConfig::default(),
            Arc::new(BearerToken::anonymous()),
        )
        .unwrap();
        let cancel = CancellationToken::new();

        let result: Result<serde_json::Value> = client
            .get_json("http://127.0.0.1:9/holdings", &[], AuthMode::Required, &cancel)
            .await;

        assert!(matches!(result, Err(Error::CredentialUnavailable(_))));
        assert!(!client.has_credential());
    }

    /// Upstream that accepts connections and never answers
    async fn silent_upstream() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}/token/2jjj", addr)
    }

    #[tokio::test]
    async fn test_abandoned_half_open_call_does_not_wedge_breaker() {
        let config = RetrievalConfig {
            failure_threshold: 1,
            breaker_cooldown_secs: 0,
            ..Default::default()
        };
        let client =
            ResilientClient::new("metadata", &config, Arc::new(BearerToken::anonymous())).unwrap();
        let url = silent_upstream().await;
        let cancel = CancellationToken::new();

        client.breaker().record_failure();
        assert_eq!(client.breaker().state(), BreakerState::Open);

        // The caller's own deadline drops the half-open attempt mid-request
        let first = tokio::time::timeout(
            Duration::from_millis(200),
            client.get_json::<serde_json::Value>(&url, &[], AuthMode::Anonymous, &cancel),
        )
        .await;
        assert!(first.is_err());
        assert_eq!(client.breaker().state(), BreakerState::HalfOpen);

        // The next call is admitted and reaches the upstream again
        let second = tokio::time::timeout(
            Duration::from_millis(200),
            client.get_json::<serde_json::Value>(&url, &[], AuthMode::Anonymous, &cancel),
        )
        .await;
        assert!(!matches!(second, Ok(Err(Error::CircuitOpen(_)))));
        assert!(second.is_err());
        assert!(client.breaker().try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_network() {
        let config = RetrievalConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let client =
            ResilientClient::new("feed", &config, Arc::new(BearerToken::anonymous())).unwrap();
        client.breaker().record_failure();

        let cancel = CancellationToken::new();
        let result: Result<serde_json::Value> = client
            .get_json("http://127.0.0.1:9/swaps", &[], AuthMode::Anonymous, &cancel)
            .await;

        assert!(matches!(result, Err(Error::CircuitOpen(_))));
    }
}
