use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use sportsarb_arbitrage::engine::{StaticDiscovery, TradingEngine};
use sportsarb_arbitrage::ledger::{TradeLedger, TradingState, TradingStateStore};
use sportsarb_arbitrage::venue::PaperVenue;
use sportsarb_core::config_loader::ConfigLoader;
use sportsarb_core::types::VenueId;

#[derive(Parser)]
#[command(name = "sportsarb")]
#[command(about = "Cross-venue sports arbitrage between Kalshi and Polymarket", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the poll-and-trade loop until halted
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Market list file: one `<venue> <identifier>` per line
        #[arg(short, long, default_value = "config/markets.txt")]
        markets: String,
        /// Evaluate and record without submitting orders
        #[arg(long)]
        dry_run: bool,
    },
    /// Mark a naked position as resolved after flattening it manually
    ResolveNaked {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Trade record id from the ledger
        #[arg(long)]
        id: Uuid,
        /// What was done (e.g. "sold 2 shares on venue web UI")
        #[arg(long)]
        note: String,
    },
    /// Show ledger and trading-state summary
    Status {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Run {
            config,
            markets,
            dry_run,
        } => run(&config, &markets, dry_run).await,
        Commands::ResolveNaked { config, id, note } => resolve_naked(&config, id, &note),
        Commands::Status { config } => status(&config),
    }
}

async fn run(config_path: &str, markets_path: &str, dry_run: bool) -> anyhow::Result<()> {
    let mut config = ConfigLoader::load(config_path)?;
    if dry_run {
        config.trading.dry_run = true;
    }
    let markets = load_markets(markets_path)?;
    info!(
        config = config_path,
        markets = markets.len(),
        dry_run = config.trading.dry_run,
        leg1 = %config.venues.leg1,
        "starting trading engine"
    );

    // Live venue connectivity plugs in behind `VenueClient`; this binary
    // ships with the paper venues for rehearsal and dry runs.
    let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
    let polymarket = Arc::new(PaperVenue::new(VenueId::Polymarket));
    let discovery = Arc::new(StaticDiscovery::new(markets));

    let engine = TradingEngine::new(config, kalshi, polymarket, discovery);
    engine.run().await?;
    // A voluntary halt is an orderly shutdown, not a process failure.
    Ok(())
}

fn resolve_naked(config_path: &str, id: Uuid, note: &str) -> anyhow::Result<()> {
    let config = ConfigLoader::load(config_path)?;
    let ledger = TradeLedger::new(&config.ledger.path);
    ledger
        .mark_resolved(id, note)
        .with_context(|| format!("could not resolve record {id}"))?;
    // The naked outcome also latched the persisted halt; clear it so the
    // next preflight re-derives everything from the ledger.
    TradingStateStore::new(&config.ledger.state_path)
        .save(&TradingState::Active)
        .context("could not clear the persisted halt")?;
    println!("record {id} marked resolved, trading state reset to active");
    println!("restart with `sportsarb run`");
    Ok(())
}

fn status(config_path: &str) -> anyhow::Result<()> {
    let config = ConfigLoader::load(config_path)?;
    let ledger = TradeLedger::new(&config.ledger.path);
    let trades = ledger.trades()?;
    let naked = ledger.unresolved_naked()?;
    let loss = ledger.cumulative_loss()?;
    let state = TradingStateStore::new(&config.ledger.state_path).load()?;

    println!("ledger:   {}", config.ledger.path.display());
    println!("trades:   {}", trades.len());
    if let Some(last) = ledger.last_trade()? {
        println!("last:     {}  {}  {:?}", last.timestamp, last.game_key, last.outcome);
    }
    println!("loss:     {loss}");
    match &state {
        TradingState::Active => println!("state:    active"),
        TradingState::Halted { reason, since } => {
            println!("state:    HALTED since {since}");
            println!("reason:   {reason}");
        }
    }
    match naked {
        None => println!("naked:    none"),
        Some(record) => {
            println!("naked:    unresolved position");
            println!("  {}  {}  {}", record.id, record.timestamp, record.game_key);
            println!(
                "flatten manually, then run `sportsarb resolve-naked --id {} --note <what>`",
                record.id
            );
        }
    }
    Ok(())
}

/// Reads the market list: blank lines and `#` comments skipped, each
/// remaining line `<venue> <identifier>`.
fn load_markets(path: &str) -> anyhow::Result<Vec<(VenueId, String)>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not read market list {path}"))?;
    let mut markets = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((venue, identifier)) = line.split_once(char::is_whitespace) else {
            bail!("{path}:{}: expected `<venue> <identifier>`", index + 1);
        };
        let venue = match venue.to_ascii_lowercase().as_str() {
            "kalshi" => VenueId::Kalshi,
            "polymarket" => VenueId::Polymarket,
            other => bail!("{path}:{}: unknown venue {other:?}", index + 1),
        };
        markets.push((venue, identifier.trim().to_string()));
    }
    Ok(markets)
}
