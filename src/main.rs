//! Swap Sentinel - DEX swap watcher
//!
//! Polls the swap feed, reconciles holder balances of tracked tickers, keeps
//! daily buy/sell flow, flags hot tokens and routes alerts to sinks.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use swap_sentinel::cli::commands;
use swap_sentinel::config::Config;
use swap_sentinel::store::ListKind;

/// Swap Sentinel - DEX swap watcher
#[derive(Parser)]
#[command(name = "sentinel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "sentinel.toml", env = "SENTINEL_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every monitor until interrupted
    Start,

    /// Reconcile held addresses against live balances
    Sweep {
        /// Only this ticker (default: all tracked tickers)
        #[arg(long)]
        ticker: Option<String>,

        /// Sweep even if already swept today
        #[arg(long)]
        force: bool,
    },

    /// Show holders and today's flow per ticker
    Status,

    /// Show one day's flow for a ticker
    Flow {
        #[arg(long)]
        ticker: String,

        /// Day as YYYY-MM-DD (default: today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Replace the stored flow with the one rebuilt from the ledger
        #[arg(long)]
        repair: bool,
    },

    /// Show an address's balance history and recent swaps
    Address {
        address: String,

        /// Only this ticker (default: all tracked tickers)
        #[arg(long)]
        ticker: Option<String>,

        /// Number of recent swaps to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Manage the allow-list and block-list
    Tokens {
        #[command(subcommand)]
        list: TokenList,
    },

    /// Show current configuration (secrets masked)
    Config,
}

#[derive(Subcommand)]
enum TokenList {
    /// Pools always announced by allow-list-only sinks
    Allow {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Pools never announced
    Block {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    Add { pool: String },
    Remove { pool: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("swap_sentinel=info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Start => commands::start(&config).await,
        Commands::Sweep { ticker, force } => {
            commands::sweep(&config, ticker.as_deref(), force).await
        }
        Commands::Status => commands::status(&config).await,
        Commands::Flow {
            ticker,
            date,
            repair,
        } => commands::flow(&config, &ticker, date, repair).await,
        Commands::Address {
            address,
            ticker,
            limit,
        } => commands::address(&config, &address, ticker.as_deref(), limit).await,
        Commands::Tokens { list } => {
            let (kind, action) = match list {
                TokenList::Allow { action } => (ListKind::Allow, action),
                TokenList::Block { action } => (ListKind::Block, action),
            };
            match action {
                TokenAction::Add { pool } => commands::tokens_add(&config, kind, &pool).await,
                TokenAction::Remove { pool } => {
                    commands::tokens_remove(&config, kind, &pool).await
                }
                TokenAction::List => commands::tokens_list(&config, kind).await,
            }
        }
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
