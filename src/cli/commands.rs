//! CLI command implementations

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::feed::{HttpSwapFeed, SwapFeedSource, SwapPoller, SwapSnapshot};
use crate::flow::ReportSchedule;
use crate::holders::{HolderChange, HolderReconciler, HttpBalanceSource};
use crate::hot::HotTokenDetector;
use crate::notify::{
    build_routes, Dispatcher, Enricher, HttpMetadataSource, ListRule, LogSink, NotificationEvent,
    SinkRoute,
};
use crate::retrieval::{BearerToken, CredentialProvider, ResilientClient};
use crate::store::{JsonStore, ListKind, TokenLists};

/// Everything a command needs, wired from configuration
struct Services {
    store: Arc<JsonStore>,
    lists: Arc<TokenLists>,
    feed: Arc<dyn SwapFeedSource>,
    balance_client: Arc<ResilientClient>,
    reconciler: Arc<HolderReconciler>,
    dispatcher: Arc<Dispatcher>,
}

impl Services {
    async fn build(config: &Config, cancel: &CancellationToken) -> Result<Self> {
        let store = Arc::new(JsonStore::new(&config.storage.data_dir));
        let lists = Arc::new(
            TokenLists::load(store.clone(), &config.lists.allow, &config.lists.block).await,
        );

        let credentials: Arc<dyn CredentialProvider> =
            Arc::new(BearerToken::new(config.api.auth_token.clone(), None));
        let client = |name: &str| -> Result<Arc<ResilientClient>> {
            let client = ResilientClient::new(name, &config.retrieval, credentials.clone())
                .with_context(|| format!("Failed to create {} client", name))?;
            Ok(Arc::new(client))
        };

        let feed_client = client("feed")?;
        let balance_client = client("balances")?;

        let feed: Arc<dyn SwapFeedSource> = Arc::new(HttpSwapFeed::new(
            feed_client,
            &config.api.feed_url,
            cancel.clone(),
        ));
        let balances = Arc::new(HttpBalanceSource::new(
            balance_client.clone(),
            &config.api.balance_url,
            cancel.clone(),
        ));
        let reconciler =
            Arc::new(HolderReconciler::load(balances, &config.holders, store.clone()).await);

        let enricher = if config.notify.enrichment.enabled {
            let source = Arc::new(HttpMetadataSource::new(
                client("metadata")?,
                &config.api.metadata_url,
                cancel.clone(),
            ));
            Some(Arc::new(Enricher::new(source, &config.notify.enrichment)))
        } else {
            None
        };

        let mut routes = build_routes(&config.notify, &config.retrieval, cancel)
            .context("Failed to build notification sinks")?;
        if routes.is_empty() {
            warn!("No notification sinks configured, alerts go to the log only");
            routes.push(SinkRoute {
                name: "log".to_string(),
                sink: Arc::new(LogSink::new("log")),
                target: "log".to_string(),
                min_btc: Default::default(),
                list_rule: ListRule::All,
                cooldown: Duration::from_secs(config.hot_tokens.cooldown_secs),
            });
        }

        let dispatcher = Dispatcher::new(
            lists.clone(),
            enricher,
            config.notify.pool_url_template.clone(),
        )
        .with_routes(routes);

        Ok(Self {
            store,
            lists,
            feed,
            balance_client,
            reconciler,
            dispatcher: Arc::new(dispatcher),
        })
    }
}

async fn announce_changes(dispatcher: &Dispatcher, changes: Vec<HolderChange>) {
    for change in changes {
        let report = dispatcher
            .dispatch(&NotificationEvent::HolderChange(change))
            .await;
        debug!(sent = report.sent(), failed = report.failed(), "Holder change dispatched");
    }
}

/// Start every monitor and run until Ctrl-C
pub async fn start(config: &Config) -> Result<()> {
    info!("Starting swap sentinel...");
    info!(
        tickers = config.holders.tickers.len(),
        window = config.feed.window_size,
        poll_secs = config.feed.poll_interval_secs,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    let services = Services::build(config, &cancel).await?;

    let poller = SwapPoller::new(services.feed.clone(), config.feed.window_size)
        .with_store(services.store.clone())
        .await;

    catch_up(&services, poller.snapshot()).await;

    let (snapshot_tx, snapshot_rx) =
        watch::channel::<Option<Arc<SwapSnapshot>>>(poller.snapshot().cloned().map(Arc::new));

    let mut tasks: Vec<JoinHandle<()>> = vec![spawn_ingestion(
        config,
        &services,
        poller,
        snapshot_tx,
        cancel.clone(),
    )];

    if config.hot_tokens.enabled {
        tasks.push(spawn_hot_tokens(config, &services, snapshot_rx, cancel.clone()));
    } else {
        info!("Hot-token detection disabled");
    }

    if !config.holders.tickers.is_empty() {
        tasks.push(spawn_sweeps(config, &services, cancel.clone()));
    } else {
        warn!("No tickers tracked, holder sweeps disabled");
    }

    if config.report.enabled && !config.holders.tickers.is_empty() {
        tasks.push(spawn_reports(config, &services, cancel.clone()));
    }

    info!(tasks = tasks.len(), "Sentinel started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");
    cancel.cancel();

    for result in join_all(tasks).await {
        if let Err(e) = result {
            error!("Task ended abnormally: {}", e);
        }
    }

    info!("Sentinel stopped");
    Ok(())
}

/// Reconcile the swappers of the persisted window before polling resumes
async fn catch_up(services: &Services, snapshot: Option<&SwapSnapshot>) {
    let Some(snapshot) = snapshot else {
        return;
    };

    for tracked in services.reconciler.tickers() {
        let addresses: Vec<String> = snapshot
            .records
            .iter()
            .filter(|r| r.pool_id == tracked.token_id)
            .map(|r| r.swapper.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if addresses.is_empty() {
            continue;
        }

        match services.reconciler.catch_up(&tracked.ticker, &addresses).await {
            Ok(report) => {
                info!(
                    ticker = %tracked.ticker,
                    checked = report.checked,
                    changes = report.changes.len(),
                    "Startup catch-up complete"
                );
                announce_changes(&services.dispatcher, report.changes).await;
            }
            Err(e) => warn!(ticker = %tracked.ticker, error = %e, "Startup catch-up failed"),
        }
    }
}

fn spawn_ingestion(
    config: &Config,
    services: &Services,
    mut poller: SwapPoller,
    snapshot_tx: watch::Sender<Option<Arc<SwapSnapshot>>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let reconciler = services.reconciler.clone();
    let dispatcher = services.dispatcher.clone();
    let period = Duration::from_secs(config.feed.poll_interval_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let first_run = poller.snapshot().is_none();
            let fresh = match poller.poll().await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!(error = %e, "Swap poll failed, keeping previous window");
                    continue;
                }
            };
            snapshot_tx.send_replace(poller.snapshot().cloned().map(Arc::new));

            if first_run {
                info!(records = fresh.len(), "Swap baseline established");
            }

            for swap in fresh {
                if !first_run {
                    dispatcher.dispatch(&NotificationEvent::Swap(swap.clone())).await;
                }

                if reconciler.ticker_for_pool(&swap.pool_id).is_none() {
                    continue;
                }
                match reconciler.on_swap(&swap).await {
                    Ok(Some(change)) => announce_changes(&dispatcher, vec![change]).await,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(swap = %swap.id, address = %swap.swapper, error = %e, "Holder check failed")
                    }
                }

                if cancel.is_cancelled() {
                    break;
                }
            }
        }

        debug!("Ingestion task stopped");
    })
}

fn spawn_hot_tokens(
    config: &Config,
    services: &Services,
    snapshot_rx: watch::Receiver<Option<Arc<SwapSnapshot>>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let detector = HotTokenDetector::new(&config.hot_tokens);
    let lists = services.lists.clone();
    let dispatcher = services.dispatcher.clone();
    let period = Duration::from_secs(config.hot_tokens.interval_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let current = snapshot_rx.borrow().clone();
            let Some(snapshot) = current else {
                continue;
            };
            let blocked: HashSet<String> = lists.list(ListKind::Block).await.into_iter().collect();

            for activity in detector.detect(&snapshot.records, |pool| blocked.contains(pool)) {
                dispatcher.dispatch(&NotificationEvent::HotToken(activity)).await;
            }
        }

        debug!("Hot-token task stopped");
    })
}

fn spawn_sweeps(config: &Config, services: &Services, cancel: CancellationToken) -> JoinHandle<()> {
    let reconciler = services.reconciler.clone();
    let dispatcher = services.dispatcher.clone();
    let balance_client = services.balance_client.clone();
    let requires_auth = config.api.sweep_requires_auth;
    let period = Duration::from_secs(config.holders.sweep_interval_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if requires_auth && !balance_client.has_credential() {
                error!("Sweeps require a valid credential and none is available, stopping sweeps");
                break;
            }

            match reconciler.sweep(None, false).await {
                Ok(reports) => {
                    for report in reports {
                        announce_changes(&dispatcher, report.changes).await;
                    }
                }
                Err(e) => warn!(error = %e, "Sweep failed"),
            }
        }

        debug!("Sweep task stopped");
    })
}

fn spawn_reports(config: &Config, services: &Services, cancel: CancellationToken) -> JoinHandle<()> {
    let reconciler = services.reconciler.clone();
    let dispatcher = services.dispatcher.clone();
    let mut schedule = ReportSchedule::new(&config.report, Utc::now());
    let period = Duration::from_secs(config.report.check_interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(date) = schedule.due(Utc::now()) else {
                continue;
            };

            for tracked in reconciler.tickers() {
                match reconciler.daily_report(&tracked.ticker, date).await {
                    Ok(report) => {
                        info!(
                            ticker = %report.ticker,
                            date = %report.date,
                            net_btc = %report.net_btc(),
                            "Daily report"
                        );
                        dispatcher.dispatch(&NotificationEvent::DailyReport(report)).await;
                    }
                    Err(e) => warn!(ticker = %tracked.ticker, error = %e, "Daily report failed"),
                }
            }
        }

        debug!("Report task stopped");
    })
}

/// Run one sweep now
pub async fn sweep(config: &Config, ticker: Option<&str>, force: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let services = Services::build(config, &cancel).await?;

    if config.api.sweep_requires_auth && !services.balance_client.has_credential() {
        anyhow::bail!("Sweeps require api.auth_token");
    }

    let reports = services.reconciler.sweep(ticker, force).await?;

    println!("\n=== SWEEP ===\n");
    for report in reports {
        if report.skipped {
            println!("{}: already swept today (use --force)", report.ticker);
            continue;
        }
        println!(
            "{}: checked {}, changed {}, failed {}",
            report.ticker,
            report.checked,
            report.changes.len(),
            report.failed
        );
        for change in &report.changes {
            println!(
                "  {} {} {} -> {}",
                change.record.action, change.address, change.record.delta, change.record.amount
            );
        }
        announce_changes(&services.dispatcher, report.changes).await;
    }

    Ok(())
}

/// Holders and today's flow per tracked ticker
pub async fn status(config: &Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let services = Services::build(config, &cancel).await?;
    let reconciler = &services.reconciler;
    let today = Utc::now().date_naive();

    println!("\n=== SENTINEL STATUS ===\n");
    if reconciler.tickers().is_empty() {
        println!("No tickers tracked.");
    }

    for tracked in reconciler.tickers() {
        let holders = reconciler.holders(&tracked.ticker).await?;
        let flow = reconciler.flow(&tracked.ticker, today).await?;
        let last_sweep = reconciler.last_sweep(&tracked.ticker).await?;

        println!("{} ({})", tracked.ticker, tracked.token_id);
        println!("  Holders: {}", holders.len());
        println!(
            "  Last sweep: {}",
            last_sweep.map(|d| d.to_string()).unwrap_or_else(|| "never".to_string())
        );
        println!(
            "  Today: {} buys ({} BTC), {} sells ({} BTC), net {} BTC",
            flow.buys,
            flow.btc_bought,
            flow.sells,
            flow.btc_sold,
            flow.net_btc()
        );
        for (address, balance) in holders.iter().take(10) {
            println!("    {:<64} {}", address, balance);
        }
        println!();
    }

    println!("Allow-list: {} pools", services.lists.list(ListKind::Allow).await.len());
    println!("Block-list: {} pools", services.lists.list(ListKind::Block).await.len());
    Ok(())
}

/// One day's flow, optionally repaired from the ledger
pub async fn flow(
    config: &Config,
    ticker: &str,
    date: Option<NaiveDate>,
    repair: bool,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let services = Services::build(config, &cancel).await?;
    let reconciler = &services.reconciler;
    let date = date.unwrap_or_else(|| Utc::now().date_naive());

    let (stored, recomputed, drifted) = if repair {
        let repair = reconciler.repair_flow(ticker, date).await?;
        let drifted = repair.drifted();
        (repair.stored, repair.recomputed, drifted)
    } else {
        let stored = reconciler.flow(ticker, date).await?;
        let recomputed = reconciler.recompute_flow(ticker, date).await?;
        let drifted = stored != recomputed;
        (stored, recomputed, drifted)
    };

    println!("\n=== {} FLOW {} ===\n", ticker.to_uppercase(), date);
    println!(
        "Stored:     {} buys ({} BTC), {} sells ({} BTC), net {} BTC",
        stored.buys,
        stored.btc_bought,
        stored.sells,
        stored.btc_sold,
        stored.net_btc()
    );
    println!(
        "From ledger: {} buys ({} BTC), {} sells ({} BTC), net {} BTC",
        recomputed.buys,
        recomputed.btc_bought,
        recomputed.sells,
        recomputed.btc_sold,
        recomputed.net_btc()
    );

    match (drifted, repair) {
        (false, _) => println!("\nStored flow matches the ledger."),
        (true, true) => println!("\nStored flow had drifted and was replaced."),
        (true, false) => println!("\nStored flow has drifted. Run with --repair to fix."),
    }
    Ok(())
}

/// Balance history and recent swaps of one address
pub async fn address(
    config: &Config,
    address: &str,
    ticker: Option<&str>,
    limit: usize,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let services = Services::build(config, &cancel).await?;
    let reconciler = &services.reconciler;

    let tracked: Vec<_> = reconciler
        .tickers()
        .iter()
        .filter(|t| ticker.map_or(true, |wanted| t.ticker.eq_ignore_ascii_case(wanted)))
        .collect();
    if tracked.is_empty() {
        anyhow::bail!("No tracked ticker matches {:?}", ticker);
    }

    for t in tracked {
        println!("\n=== {} / {} ===\n", t.ticker, address);

        let ledger = reconciler.ledger_for(&t.ticker, address).await?;
        if ledger.is_empty() {
            println!("No balance changes recorded.");
        }
        for record in &ledger {
            println!(
                "  {} {:<10} {:>20} -> {} ({} BTC, {:?})",
                record.timestamp.format("%Y-%m-%d %H:%M"),
                record.action.to_string(),
                record.delta,
                record.amount,
                record.btc_value,
                record.source
            );
        }

        match services
            .feed
            .list_swaps_for_address(address, &t.token_id, limit)
            .await
        {
            Ok(swaps) => {
                println!("\nRecent swaps: {}", swaps.len());
                for swap in swaps {
                    println!(
                        "  {} {:?} {} tokens for {} BTC",
                        swap.created_at.format("%Y-%m-%d %H:%M"),
                        swap.side(),
                        swap.token_amount(),
                        swap.btc_value()
                    );
                }
            }
            Err(e) => println!("\nRecent swaps unavailable: {}", e),
        }
    }
    Ok(())
}

fn token_store(config: &Config) -> Arc<JsonStore> {
    Arc::new(JsonStore::new(&config.storage.data_dir))
}

pub async fn tokens_add(config: &Config, kind: ListKind, pool: &str) -> Result<()> {
    let lists = TokenLists::load(token_store(config), &config.lists.allow, &config.lists.block).await;
    if lists.add(kind, pool).await? {
        println!("Added {} to the {}-list", pool, kind);
    } else {
        println!("{} is already on the {}-list", pool, kind);
    }
    Ok(())
}

pub async fn tokens_remove(config: &Config, kind: ListKind, pool: &str) -> Result<()> {
    let lists = TokenLists::load(token_store(config), &config.lists.allow, &config.lists.block).await;
    if lists.remove(kind, pool).await? {
        println!("Removed {} from the {}-list", pool, kind);
    } else {
        println!("{} is not on the {}-list", pool, kind);
    }
    Ok(())
}

pub async fn tokens_list(config: &Config, kind: ListKind) -> Result<()> {
    let lists = TokenLists::load(token_store(config), &config.lists.allow, &config.lists.block).await;
    let pools = lists.list(kind).await;

    println!("\n=== {}-LIST ({}) ===\n", kind.to_string().to_uppercase(), pools.len());
    for pool in pools {
        println!("{}", pool);
    }
    Ok(())
}

/// Show configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}
