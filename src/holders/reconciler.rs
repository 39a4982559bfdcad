//! Reconciler owning every tracked ticker's book

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::book::TickerBook;
use super::source::BalanceSource;
use super::transition::{Driver, Thresholds};
use super::types::{BalanceAction, BalanceChangeRecord, HolderChange, SweepReport};
use super::{HoldersConfig, TrackedTicker};
use crate::error::{Error, Result};
use crate::feed::SwapRecord;
use crate::flow::{DailyFlow, DailyReport, FlowRepair};
use crate::store::JsonStore;
use crate::wire::parse_decimal;

fn book_key(ticker: &str) -> String {
    format!("holders/{}", ticker)
}

/// Serializes every load-modify-save of a ticker behind that ticker's lock
///
/// Balances are fetched outside the lock. Each fetch takes a sequence number
/// before it starts, and a reading is only applied if no later-started
/// reading of the same address got there first.
pub struct HolderReconciler {
    balances: Arc<dyn BalanceSource>,
    store: Option<Arc<JsonStore>>,
    thresholds: Thresholds,
    concurrency: usize,
    tickers: Vec<TrackedTicker>,
    books: DashMap<String, Arc<Mutex<TickerBook>>>,
    readings: AtomicU64,
}

impl HolderReconciler {
    /// In-memory reconciler with empty books
    pub fn new(balances: Arc<dyn BalanceSource>, config: &HoldersConfig) -> Self {
        let books = DashMap::new();
        for tracked in &config.tickers {
            books.insert(
                tracked.ticker.to_uppercase(),
                Arc::new(Mutex::new(TickerBook::new(&tracked.ticker))),
            );
        }

        Self {
            balances,
            store: None,
            thresholds: config.thresholds(),
            concurrency: config.sweep_concurrency.max(1),
            tickers: config.tickers.clone(),
            books,
            readings: AtomicU64::new(0),
        }
    }

    /// Reconciler with books restored from the store
    pub async fn load(
        balances: Arc<dyn BalanceSource>,
        config: &HoldersConfig,
        store: Arc<JsonStore>,
    ) -> Self {
        let mut reconciler = Self::new(balances, config);

        for tracked in &config.tickers {
            let mut book: TickerBook = store.load_or_default(&book_key(&tracked.ticker)).await;
            book.ticker = tracked.ticker.clone();
            info!(
                ticker = %tracked.ticker,
                holders = book.holder_count(),
                last_sweep = ?book.last_sweep(),
                "Loaded holder book"
            );
            reconciler
                .books
                .insert(tracked.ticker.to_uppercase(), Arc::new(Mutex::new(book)));
        }

        reconciler.store = Some(store);
        reconciler
    }

    pub fn tickers(&self) -> &[TrackedTicker] {
        &self.tickers
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// The tracked ticker whose pool a swap belongs to
    pub fn ticker_for_pool(&self, pool_id: &str) -> Option<&TrackedTicker> {
        self.tickers.iter().find(|t| t.token_id == pool_id)
    }

    fn tracked(&self, ticker: &str) -> Result<&TrackedTicker> {
        self.tickers
            .iter()
            .find(|t| t.ticker.eq_ignore_ascii_case(ticker))
            .ok_or_else(|| Error::UnknownTicker(ticker.to_string()))
    }

    fn book(&self, ticker: &str) -> Result<Arc<Mutex<TickerBook>>> {
        self.books
            .get(&ticker.to_uppercase())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnknownTicker(ticker.to_string()))
    }

    async fn persist(&self, book: &TickerBook) {
        if let Some(store) = &self.store {
            store.save_logged(&book_key(&book.ticker), book).await;
        }
    }

    /// Live balance of one address; a token it does not hold is zero
    ///
    /// Returns the reading's sequence number alongside it.
    async fn fetch_balance(
        &self,
        tracked: &TrackedTicker,
        address: &str,
    ) -> (u64, Result<Decimal>) {
        let sequence = self.readings.fetch_add(1, Ordering::SeqCst) + 1;
        let balance = match self.balances.get_address_holdings(address).await {
            Ok(holdings) => match holdings.balance_of(&tracked.token_id, &tracked.ticker) {
                Some(raw) => parse_decimal(raw),
                None => Ok(Decimal::ZERO),
            },
            Err(e) => Err(e),
        };
        (sequence, balance)
    }

    /// Event-driven check of the swapper named by a swap
    pub async fn on_swap(&self, swap: &SwapRecord) -> Result<Option<HolderChange>> {
        self.on_swap_at(swap, Utc::now()).await
    }

    pub(crate) async fn on_swap_at(
        &self,
        swap: &SwapRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<HolderChange>> {
        let Some(tracked) = self.ticker_for_pool(&swap.pool_id) else {
            return Ok(None);
        };

        let (sequence, current) = self.fetch_balance(tracked, &swap.swapper).await;
        let current = current?;
        let driver = Driver::Swap {
            side: swap.side(),
            btc_value: swap.btc_value(),
        };

        let book = self.book(&tracked.ticker)?;
        let mut guard = book.lock().await;
        if !guard.observe(&swap.swapper, sequence) {
            debug!(ticker = %tracked.ticker, address = %swap.swapper, "Newer reading already applied");
            return Ok(None);
        }
        let Some(record) = guard.apply(&swap.swapper, current, driver, &self.thresholds, now)?
        else {
            debug!(ticker = %tracked.ticker, address = %swap.swapper, "No balance movement");
            return Ok(None);
        };
        self.persist(&guard).await;
        drop(guard);

        info!(
            ticker = %tracked.ticker,
            address = %swap.swapper,
            action = %record.action,
            delta = %record.delta,
            btc = %record.btc_value,
            "Holder change"
        );

        Ok(Some(HolderChange {
            ticker: tracked.ticker.clone(),
            pool_id: tracked.token_id.clone(),
            address: swap.swapper.clone(),
            swap_id: Some(swap.id.clone()),
            record,
        }))
    }

    /// Sweep every held address of one ticker, or of all tickers
    ///
    /// A ticker already swept today is skipped unless `force` is set.
    pub async fn sweep(&self, ticker: Option<&str>, force: bool) -> Result<Vec<SweepReport>> {
        self.sweep_at(ticker, force, Utc::now()).await
    }

    pub(crate) async fn sweep_at(
        &self,
        ticker: Option<&str>,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<SweepReport>> {
        let targets: Vec<&TrackedTicker> = match ticker {
            Some(ticker) => vec![self.tracked(ticker)?],
            None => self.tickers.iter().collect(),
        };

        let today = now.date_naive();
        let mut reports = Vec::with_capacity(targets.len());

        for tracked in targets {
            let book = self.book(&tracked.ticker)?;
            let addresses = {
                let guard = book.lock().await;
                if !force && guard.last_sweep() == Some(today) {
                    debug!(ticker = %tracked.ticker, "Already swept today");
                    reports.push(SweepReport {
                        ticker: tracked.ticker.clone(),
                        skipped: true,
                        ..Default::default()
                    });
                    continue;
                }
                guard.held_addresses()
            };

            let report = self.reconcile_addresses(tracked, addresses, now).await?;

            {
                let mut guard = book.lock().await;
                guard.mark_swept(today);
                self.persist(&guard).await;
            }

            info!(
                ticker = %tracked.ticker,
                checked = report.checked,
                changes = report.changes.len(),
                failed = report.failed,
                "Sweep complete"
            );
            reports.push(report);
        }

        Ok(reports)
    }

    /// Reconcile a given address list with the sweep driver
    ///
    /// Used at startup to pick up holders that moved while the process was down.
    /// Does not touch the last-sweep date.
    pub async fn catch_up(&self, ticker: &str, addresses: &[String]) -> Result<SweepReport> {
        let tracked = self.tracked(ticker)?;
        self.reconcile_addresses(tracked, addresses.to_vec(), Utc::now())
            .await
    }

    async fn reconcile_addresses(
        &self,
        tracked: &TrackedTicker,
        addresses: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<SweepReport> {
        let book = self.book(&tracked.ticker)?;
        let mut report = SweepReport {
            ticker: tracked.ticker.clone(),
            ..Default::default()
        };

        let mut fetches = stream::iter(addresses)
            .map(move |address| async move {
                let (sequence, balance) = self.fetch_balance(tracked, &address).await;
                (address, sequence, balance)
            })
            .buffer_unordered(self.concurrency);

        let mut dirty = false;
        while let Some((address, sequence, balance)) = fetches.next().await {
            report.checked += 1;

            let current = match balance {
                Ok(current) => current,
                Err(e) => {
                    warn!(ticker = %tracked.ticker, address = %address, error = %e, "Balance fetch failed");
                    report.failed += 1;
                    continue;
                }
            };

            let mut guard = book.lock().await;
            if !guard.observe(&address, sequence) {
                debug!(ticker = %tracked.ticker, address = %address, "Stale sweep reading dropped");
                continue;
            }
            match guard.apply(&address, current, Driver::Sweep, &self.thresholds, now) {
                Ok(Some(record)) => {
                    dirty = true;
                    report.changes.push(HolderChange {
                        ticker: tracked.ticker.clone(),
                        pool_id: tracked.token_id.clone(),
                        address,
                        swap_id: None,
                        record,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(ticker = %tracked.ticker, address = %address, error = %e, "Skipping unreadable balance");
                    report.failed += 1;
                }
            }
        }

        if dirty {
            let guard = book.lock().await;
            self.persist(&guard).await;
        }

        Ok(report)
    }

    /// Held addresses, largest balance first
    pub async fn holders(&self, ticker: &str) -> Result<Vec<(String, Decimal)>> {
        Ok(self.book(ticker)?.lock().await.holders())
    }

    pub async fn ledger_for(&self, ticker: &str, address: &str) -> Result<Vec<BalanceChangeRecord>> {
        Ok(self.book(ticker)?.lock().await.ledger_for(address).to_vec())
    }

    pub async fn daily_event_count(
        &self,
        ticker: &str,
        address: &str,
        date: NaiveDate,
    ) -> Result<u32> {
        Ok(self
            .book(ticker)?
            .lock()
            .await
            .daily_event_count(address, date))
    }

    pub async fn last_sweep(&self, ticker: &str) -> Result<Option<NaiveDate>> {
        Ok(self.book(ticker)?.lock().await.last_sweep())
    }

    /// Stored flow of a day
    pub async fn flow(&self, ticker: &str, date: NaiveDate) -> Result<DailyFlow> {
        Ok(self.book(ticker)?.lock().await.flow(date))
    }

    /// Fold an event into a day's flow directly
    pub async fn record_flow_event(
        &self,
        ticker: &str,
        date: NaiveDate,
        action: BalanceAction,
        value: Decimal,
    ) -> Result<()> {
        let book = self.book(ticker)?;
        let mut guard = book.lock().await;
        guard.record_flow_event(date, action, value);
        self.persist(&guard).await;
        Ok(())
    }

    /// Replay a day's flow from the full ledger
    pub async fn recompute_flow(&self, ticker: &str, date: NaiveDate) -> Result<DailyFlow> {
        Ok(self.book(ticker)?.lock().await.recompute_flow(date))
    }

    /// Replace a day's stored flow with the replay if it drifted
    pub async fn repair_flow(&self, ticker: &str, date: NaiveDate) -> Result<FlowRepair> {
        let book = self.book(ticker)?;
        let mut guard = book.lock().await;
        let repair = guard.repair_flow(date);
        if repair.drifted() {
            warn!(
                ticker = %ticker,
                date = %date,
                stored = ?repair.stored,
                recomputed = ?repair.recomputed,
                "Flow drifted from ledger, repaired"
            );
            self.persist(&guard).await;
        }
        Ok(repair)
    }

    pub async fn daily_report(&self, ticker: &str, date: NaiveDate) -> Result<DailyReport> {
        let tracked = self.tracked(ticker)?;
        let book = self.book(ticker)?;
        let guard = book.lock().await;
        Ok(DailyReport {
            ticker: tracked.ticker.clone(),
            date,
            flow: guard.flow(date),
            holders: guard.holder_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::types::fixtures::{buy, sell};
    use crate::holders::source::fake::StaticBalances;
    use crate::holders::types::Holdings;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;
    use tokio::sync::Notify;

    const POOL: &str = "2jjj";

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        now().date_naive()
    }

    fn config() -> HoldersConfig {
        HoldersConfig {
            tickers: vec![TrackedTicker {
                ticker: "ODINDOG".into(),
                token_id: POOL.into(),
            }],
            ..Default::default()
        }
    }

    fn setup() -> (Arc<StaticBalances>, HolderReconciler) {
        let balances = Arc::new(StaticBalances::new(POOL));
        let reconciler = HolderReconciler::new(balances.clone(), &config());
        (balances, reconciler)
    }

    #[tokio::test]
    async fn test_buy_creates_holder_with_swap_value() {
        let (balances, reconciler) = setup();
        balances.set("bc1qa", "500");

        let change = reconciler
            .on_swap_at(&buy("s1", POOL, "bc1qa", 500_000, 500), now())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(change.ticker, "ODINDOG");
        assert_eq!(change.swap_id.as_deref(), Some("s1"));
        assert_eq!(change.record.action, BalanceAction::Invested);
        assert_eq!(change.record.btc_value, d("0.005"));

        let flow = reconciler.flow("ODINDOG", today()).await.unwrap();
        assert_eq!(flow.buys, 1);
        assert_eq!(flow.btc_bought, d("0.005"));
        assert_eq!(
            reconciler.holders("odindog").await.unwrap(),
            vec![("bc1qa".to_string(), d("500"))]
        );
    }

    #[tokio::test]
    async fn test_untracked_pool_ignored() {
        let (balances, reconciler) = setup();
        let result = reconciler
            .on_swap_at(&buy("s1", "other", "bc1qa", 1, 1), now())
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(balances.calls(), 0);
    }

    #[tokio::test]
    async fn test_small_new_holder_not_recorded() {
        let (balances, reconciler) = setup();
        balances.set("bc1qsmall", "5");

        let result = reconciler
            .on_swap_at(&buy("s1", POOL, "bc1qsmall", 1_000, 5), now())
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(reconciler.holders("ODINDOG").await.unwrap().is_empty());
        assert!(reconciler
            .ledger_for("ODINDOG", "bc1qsmall")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_sell_then_sweep_then_repeat_sweep() {
        let (balances, reconciler) = setup();
        balances.set("bc1qa", "500.00000000");
        reconciler
            .on_swap_at(&buy("s1", POOL, "bc1qa", 1_000, 500), now())
            .await
            .unwrap();

        balances.set("bc1qa", "450.00000000");
        let reports = reconciler.sweep_at(None, false, now()).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].changes.len(), 1);
        assert_eq!(reports[0].changes[0].record.action, BalanceAction::Sold);
        assert_eq!(reports[0].changes[0].record.delta, d("-50"));

        // Same day: skipped without fetching
        let calls = balances.calls();
        let reports = reconciler.sweep_at(None, false, now()).await.unwrap();
        assert!(reports[0].skipped);
        assert_eq!(balances.calls(), calls);

        // Forced: fetches again but nothing moved
        let reports = reconciler
            .sweep_at(Some("ODINDOG"), true, now())
            .await
            .unwrap();
        assert!(!reports[0].skipped);
        assert!(reports[0].changes.is_empty());
        assert_eq!(
            reconciler.ledger_for("ODINDOG", "bc1qa").await.unwrap().len(),
            2
        );
        assert_eq!(
            reconciler
                .daily_event_count("ODINDOG", "bc1qa", today())
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_sweep_failure_skips_address_only() {
        let (balances, reconciler) = setup();
        balances.set("bc1qa", "100");
        balances.set("bc1qb", "200");
        reconciler
            .on_swap_at(&buy("s1", POOL, "bc1qa", 1, 100), now())
            .await
            .unwrap();
        reconciler
            .on_swap_at(&buy("s2", POOL, "bc1qb", 1, 200), now())
            .await
            .unwrap();

        balances.set("bc1qa", "garbage");
        balances.set("bc1qb", "0");

        let report = reconciler
            .catch_up("ODINDOG", &["bc1qa".into(), "bc1qb".into(), "bc1qgone".into()])
            .await
            .unwrap();

        assert_eq!(report.checked, 3);
        // unparsable balance plus unknown address
        assert_eq!(report.failed, 2);
        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.changes[0].record.action, BalanceAction::Liquidated);
        assert_eq!(
            reconciler.holders("ODINDOG").await.unwrap(),
            vec![("bc1qa".to_string(), d("100"))]
        );
        // catch-up leaves the sweep date alone
        assert_eq!(reconciler.last_sweep("ODINDOG").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sell_side_first_sighting() {
        let (balances, reconciler) = setup();
        balances.set("bc1qa", "40");

        let change = reconciler
            .on_swap_at(&sell("s1", POOL, "bc1qa", 250_000, 60), now())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(change.record.action, BalanceAction::Sold);
        let flow = reconciler.flow("ODINDOG", today()).await.unwrap();
        assert_eq!(flow.sells, 1);
        assert_eq!(flow.btc_sold, d("0.0025"));
    }

    #[tokio::test]
    async fn test_flow_repair_and_report() {
        let (balances, reconciler) = setup();
        balances.set("bc1qa", "100");
        reconciler
            .on_swap_at(&buy("s1", POOL, "bc1qa", 100_000, 100), now())
            .await
            .unwrap();

        reconciler
            .record_flow_event("ODINDOG", today(), BalanceAction::Invested, d("1"))
            .await
            .unwrap();
        let repair = reconciler.repair_flow("ODINDOG", today()).await.unwrap();
        assert!(repair.drifted());
        assert_eq!(
            reconciler.flow("ODINDOG", today()).await.unwrap(),
            reconciler.recompute_flow("ODINDOG", today()).await.unwrap()
        );

        let report = reconciler.daily_report("odindog", today()).await.unwrap();
        assert_eq!(report.ticker, "ODINDOG");
        assert_eq!(report.holders, 1);
        assert_eq!(report.flow.btc_bought, d("0.001"));
    }

    #[tokio::test]
    async fn test_unknown_ticker() {
        let (_, reconciler) = setup();
        assert!(matches!(
            reconciler.holders("NOPE").await,
            Err(Error::UnknownTicker(_))
        ));
        assert!(matches!(
            reconciler.sweep(Some("NOPE"), false).await,
            Err(Error::UnknownTicker(_))
        ));
    }

    /// Live balances whose next reading can be held back before it returns
    struct HeldBack {
        live: StaticBalances,
        hold_next: AtomicBool,
        read: Notify,
        release: Notify,
    }

    impl HeldBack {
        fn new() -> Self {
            Self {
                live: StaticBalances::new(POOL),
                hold_next: AtomicBool::new(false),
                read: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl BalanceSource for HeldBack {
        async fn get_address_holdings(&self, address: &str) -> Result<Holdings> {
            let reading = self.live.get_address_holdings(address).await;
            if self.hold_next.swap(false, Ordering::SeqCst) {
                self.read.notify_one();
                self.release.notified().await;
            }
            reading
        }
    }

    #[tokio::test]
    async fn test_sweep_reading_older_than_swap_is_dropped() {
        let source = Arc::new(HeldBack::new());
        let reconciler = Arc::new(HolderReconciler::new(source.clone(), &config()));
        source.live.set("bc1qa", "500");
        reconciler
            .on_swap_at(&buy("s1", POOL, "bc1qa", 500_000, 500), now())
            .await
            .unwrap();

        // The sweep reads 500, then stalls before applying it
        source.hold_next.store(true, Ordering::SeqCst);
        let sweeping = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.sweep_at(None, true, now()).await })
        };
        source.read.notified().await;

        // Meanwhile a buy lands and is applied first
        source.live.set("bc1qa", "600");
        let change = reconciler
            .on_swap_at(&buy("s2", POOL, "bc1qa", 100_000, 100), now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.record.action, BalanceAction::Invested);
        assert_eq!(change.record.delta, d("100"));

        source.release.notify_one();
        let reports = sweeping.await.unwrap().unwrap();
        assert_eq!(reports[0].checked, 1);
        assert!(reports[0].changes.is_empty());

        let ledger = reconciler.ledger_for("ODINDOG", "bc1qa").await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.iter().all(|r| r.action == BalanceAction::Invested));
        assert_eq!(
            reconciler.holders("ODINDOG").await.unwrap(),
            vec![("bc1qa".to_string(), d("600"))]
        );
        let flow = reconciler.flow("ODINDOG", today()).await.unwrap();
        assert_eq!(flow.buys, 2);
        assert_eq!(flow.sells, 0);

        // A later sweep sees the settled balance and records nothing
        let reports = reconciler.sweep_at(None, true, now()).await.unwrap();
        assert!(reports[0].changes.is_empty());
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonStore::new(dir.path()));
        let balances = Arc::new(StaticBalances::new(POOL));
        balances.set("bc1qa", "500");

        let reconciler = HolderReconciler::load(balances.clone(), &config(), store.clone()).await;
        reconciler
            .on_swap_at(&buy("s1", POOL, "bc1qa", 500_000, 500), now())
            .await
            .unwrap();
        reconciler.sweep_at(None, false, now()).await.unwrap();

        let restarted = HolderReconciler::load(balances, &config(), store).await;
        assert_eq!(restarted.holders("ODINDOG").await.unwrap().len(), 1);
        assert_eq!(
            restarted.ledger_for("ODINDOG", "bc1qa").await.unwrap().len(),
            1
        );
        assert_eq!(restarted.last_sweep("ODINDOG").await.unwrap(), Some(today()));
        assert_eq!(restarted.flow("ODINDOG", today()).await.unwrap().buys, 1);
    }
}
