//! Fan-out of events to sinks

use dashmap::DashMap;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::enrich::{Enricher, Enrichment};
use super::message::format_event;
use super::sink::NotificationSink;
use super::{ListRule, NotificationEvent};
use crate::store::TokenLists;

/// A sink and the rules it applies
#[derive(Clone)]
pub struct SinkRoute {
    pub name: String,
    pub sink: Arc<dyn NotificationSink>,
    /// Chat id or label handed to the sink
    pub target: String,
    pub min_btc: Decimal,
    pub list_rule: ListRule,
    /// Per-pool quiet period for hot-token alerts
    pub cooldown: Duration,
}

impl fmt::Debug for SinkRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkRoute")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("min_btc", &self.min_btc)
            .field("list_rule", &self.list_rule)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

/// What happened for one sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    Sent,
    BelowThreshold,
    Filtered,
    CooledDown,
    Failed(String),
}

/// Per-sink outcomes of one dispatch, in route order
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<(String, SinkOutcome)>,
}

impl DispatchReport {
    pub fn sent(&self) -> usize {
        self.count(|o| *o == SinkOutcome::Sent)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SinkOutcome::Failed(_)))
    }

    pub fn outcome(&self, sink: &str) -> Option<&SinkOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == sink)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, pred: impl Fn(&SinkOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Routes every event to every eligible sink
pub struct Dispatcher {
    routes: Vec<SinkRoute>,
    lists: Arc<TokenLists>,
    enricher: Option<Arc<Enricher>>,
    pool_url_template: Option<String>,
    /// (sink, pool) -> last hot-token alert
    cooldowns: DashMap<(String, String), Instant>,
}

impl Dispatcher {
    pub fn new(
        lists: Arc<TokenLists>,
        enricher: Option<Arc<Enricher>>,
        pool_url_template: Option<String>,
    ) -> Self {
        Self {
            routes: Vec::new(),
            lists,
            enricher,
            pool_url_template,
            cooldowns: DashMap::new(),
        }
    }

    pub fn with_routes(mut self, routes: impl IntoIterator<Item = SinkRoute>) -> Self {
        self.routes.extend(routes);
        self
    }

    pub async fn dispatch(&self, event: &NotificationEvent) -> DispatchReport {
        self.dispatch_at(event, Instant::now()).await
    }

    /// Filter per sink, enrich once, format once, send concurrently
    pub async fn dispatch_at(&self, event: &NotificationEvent, now: Instant) -> DispatchReport {
        let mut outcomes: Vec<Option<SinkOutcome>> = Vec::with_capacity(self.routes.len());
        for route in &self.routes {
            outcomes.push(self.check(route, event, now).await);
        }

        let eligible: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_none())
            .map(|(i, _)| i)
            .collect();

        if !eligible.is_empty() {
            let enrichment = match &self.enricher {
                Some(enricher) => enricher.enrich(event).await,
                None => Enrichment::default(),
            };
            let message = format_event(event, &enrichment, self.pool_url_template.as_deref());

            let sends = eligible.iter().map(|&i| {
                let route = &self.routes[i];
                let mut message = message.clone();
                message.target = route.target.clone();
                async move { route.sink.send(&message).await }
            });
            let results = join_all(sends).await;

            for (&i, result) in eligible.iter().zip(results) {
                let route = &self.routes[i];
                let outcome = match result {
                    Ok(()) => {
                        if event.is_hot_token() {
                            if let Some(pool) = event.pool_id() {
                                self.cooldowns
                                    .insert((route.name.clone(), pool.to_string()), now);
                            }
                        }
                        SinkOutcome::Sent
                    }
                    Err(e) => {
                        warn!(sink = %route.name, event = event.kind(), error = %e, "Notification failed");
                        SinkOutcome::Failed(e.to_string())
                    }
                };
                outcomes[i] = Some(outcome);
            }
        }

        let outcomes = self
            .routes
            .iter()
            .zip(outcomes)
            .map(|(route, outcome)| {
                (
                    route.name.clone(),
                    outcome.unwrap_or_else(|| SinkOutcome::Failed("not attempted".to_string())),
                )
            })
            .collect();

        DispatchReport { outcomes }
    }

    /// `None` when the route should receive the event
    async fn check(
        &self,
        route: &SinkRoute,
        event: &NotificationEvent,
        now: Instant,
    ) -> Option<SinkOutcome> {
        if let Some(value) = event.btc_value() {
            if value < route.min_btc {
                debug!(sink = %route.name, value = %value, min = %route.min_btc, "Below sink minimum");
                return Some(SinkOutcome::BelowThreshold);
            }
        }

        if let Some(pool) = event.pool_id() {
            let filtered = match route.list_rule {
                ListRule::All => self.lists.is_blocked(pool).await,
                ListRule::AllowListOnly => !self.lists.is_allowed(pool).await,
                ListRule::IgnoreLists => false,
            };
            if filtered {
                debug!(sink = %route.name, pool, rule = ?route.list_rule, "Filtered by token lists");
                return Some(SinkOutcome::Filtered);
            }

            if event.is_hot_token() {
                let key = (route.name.clone(), pool.to_string());
                let cooling = self
                    .cooldowns
                    .get(&key)
                    .is_some_and(|last| now.saturating_duration_since(*last) < route.cooldown);
                if cooling {
                    return Some(SinkOutcome::CooledDown);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::feed::types::fixtures::buy;
    use crate::hot::PoolActivity;
    use crate::notify::enrich::fake::FixedMetadata;
    use crate::notify::{EnrichmentConfig, OutgoingMessage};
    use crate::store::ListKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        name: String,
        fail: bool,
        sent: Mutex<Vec<OutgoingMessage>>,
    }

    impl RecordingSink {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                ..Default::default()
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                fail: true,
                ..Default::default()
            })
        }

        fn sent(&self) -> Vec<OutgoingMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, message: &OutgoingMessage) -> Result<()> {
            if self.fail {
                return Err(Error::Notification("chat not found".into()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn route(sink: Arc<RecordingSink>, min_btc: &str, list_rule: ListRule) -> SinkRoute {
        SinkRoute {
            name: sink.name.clone(),
            target: format!("chat-{}", sink.name),
            sink,
            min_btc: min_btc.parse().unwrap(),
            list_rule,
            cooldown: Duration::from_secs(3600),
        }
    }

    fn hot(pool: &str) -> NotificationEvent {
        NotificationEvent::HotToken(PoolActivity {
            pool_id: pool.into(),
            swap_count: 6,
            unique_addresses: 5,
            btc_volume: Decimal::ONE,
            hot: true,
        })
    }

    #[tokio::test]
    async fn test_min_btc_per_sink() {
        let small = RecordingSink::new("small");
        let big = RecordingSink::new("big");
        let dispatcher = Dispatcher::new(Arc::new(TokenLists::in_memory()), None, None)
            .with_routes([
                route(small.clone(), "0.0025", ListRule::All),
                route(big.clone(), "0.01", ListRule::All),
            ]);

        // 500_000 sats = 0.005 BTC
        let event = NotificationEvent::Swap(buy("1", "2jjj", "bc1qa", 500_000, 10));
        let report = dispatcher.dispatch(&event).await;

        assert_eq!(report.outcome("small"), Some(&SinkOutcome::Sent));
        assert_eq!(report.outcome("big"), Some(&SinkOutcome::BelowThreshold));
        assert_eq!(small.sent().len(), 1);
        assert_eq!(small.sent()[0].target, "chat-small");
        assert!(big.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let broken = RecordingSink::failing("broken");
        let healthy = RecordingSink::new("healthy");
        let dispatcher = Dispatcher::new(Arc::new(TokenLists::in_memory()), None, None)
            .with_routes([
                route(broken, "0", ListRule::All),
                route(healthy.clone(), "0", ListRule::All),
            ]);

        let event = NotificationEvent::Swap(buy("1", "2jjj", "bc1qa", 500_000, 10));
        let report = dispatcher.dispatch(&event).await;

        assert_eq!(report.sent(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(healthy.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_enrichment_failure_still_sends() {
        let sink = RecordingSink::new("alerts");
        let source = Arc::new(FixedMetadata {
            fail: true,
            ..Default::default()
        });
        let enricher = Arc::new(Enricher::new(source, &EnrichmentConfig::default()));
        let dispatcher = Dispatcher::new(Arc::new(TokenLists::in_memory()), Some(enricher), None)
            .with_routes([route(sink.clone(), "0", ListRule::All)]);

        let event = NotificationEvent::Swap(buy("1", "2jjj", "bc1qa", 500_000, 10));
        let report = dispatcher.dispatch(&event).await;

        assert_eq!(report.sent(), 1);
        assert!(sink.sent()[0].text.contains("<code>2jjj</code>"));
    }

    #[tokio::test]
    async fn test_no_enrichment_when_nothing_eligible() {
        let sink = RecordingSink::new("alerts");
        let source = Arc::new(FixedMetadata::default());
        let enricher = Arc::new(Enricher::new(source.clone(), &EnrichmentConfig::default()));
        let dispatcher = Dispatcher::new(Arc::new(TokenLists::in_memory()), Some(enricher), None)
            .with_routes([route(sink, "1", ListRule::All)]);

        let event = NotificationEvent::Swap(buy("1", "2jjj", "bc1qa", 500_000, 10));
        dispatcher.dispatch(&event).await;

        assert_eq!(source.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_list_rules() {
        let lists = Arc::new(TokenLists::in_memory());
        lists.add(ListKind::Block, "blocked").await.unwrap();
        lists.add(ListKind::Allow, "allowed").await.unwrap();

        let all = RecordingSink::new("all");
        let allow_only = RecordingSink::new("allow_only");
        let ignore = RecordingSink::new("ignore");
        let dispatcher = Dispatcher::new(lists, None, None).with_routes([
            route(all.clone(), "0", ListRule::All),
            route(allow_only.clone(), "0", ListRule::AllowListOnly),
            route(ignore.clone(), "0", ListRule::IgnoreLists),
        ]);

        let blocked = NotificationEvent::Swap(buy("1", "blocked", "bc1qa", 500_000, 10));
        let report = dispatcher.dispatch(&blocked).await;
        assert_eq!(report.outcome("all"), Some(&SinkOutcome::Filtered));
        assert_eq!(report.outcome("allow_only"), Some(&SinkOutcome::Filtered));
        assert_eq!(report.outcome("ignore"), Some(&SinkOutcome::Sent));

        let allowed = NotificationEvent::Swap(buy("2", "allowed", "bc1qa", 500_000, 10));
        let report = dispatcher.dispatch(&allowed).await;
        assert_eq!(report.sent(), 3);

        let other = NotificationEvent::Swap(buy("3", "other", "bc1qa", 500_000, 10));
        let report = dispatcher.dispatch(&other).await;
        assert_eq!(report.outcome("all"), Some(&SinkOutcome::Sent));
        assert_eq!(report.outcome("allow_only"), Some(&SinkOutcome::Filtered));
    }

    #[tokio::test]
    async fn test_hot_token_cooldown_per_sink() {
        let sink = RecordingSink::new("alerts");
        let dispatcher = Dispatcher::new(Arc::new(TokenLists::in_memory()), None, None)
            .with_routes([route(sink.clone(), "0", ListRule::All)]);
        let start = Instant::now();

        let first = dispatcher.dispatch_at(&hot("X"), start).await;
        assert_eq!(first.sent(), 1);

        let again = dispatcher
            .dispatch_at(&hot("X"), start + Duration::from_secs(60))
            .await;
        assert_eq!(again.outcome("alerts"), Some(&SinkOutcome::CooledDown));

        let other_pool = dispatcher
            .dispatch_at(&hot("Y"), start + Duration::from_secs(60))
            .await;
        assert_eq!(other_pool.sent(), 1);

        let later = dispatcher
            .dispatch_at(&hot("X"), start + Duration::from_secs(3600))
            .await;
        assert_eq!(later.sent(), 1);
        assert_eq!(sink.sent().len(), 3);
    }
}
