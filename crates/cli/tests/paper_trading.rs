//! End-to-end smoke test: config file to recorded trade, all on paper.

use std::io::Write;
use std::sync::Arc;

use sportsarb_arbitrage::engine::{StaticDiscovery, TradingEngine};
use sportsarb_arbitrage::ledger::{OutcomeKind, TradeLedger, TradingState, TradingStateStore};
use sportsarb_arbitrage::venue::PaperVenue;
use sportsarb_core::config_loader::ConfigLoader;
use sportsarb_core::types::{GameKey, MarketType, Side, Sport, VenueId, VenueQuote};

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn quote(venue: VenueId, side: Side, ask: Decimal, depth: Decimal) -> VenueQuote {
    VenueQuote {
        venue,
        game_key: GameKey::new(Sport::Nfl, "buf", "den", MarketType::Moneyline),
        side,
        best_bid: ask - dec!(0.02),
        best_ask: ask,
        bid_depth: depth,
        ask_depth: depth,
        fetched_at: Utc::now(),
    }
}

#[tokio::test]
async fn config_file_drives_a_full_paper_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("Config.toml");
    let mut file = std::fs::File::create(&config_path).unwrap();
    writeln!(
        file,
        r#"
[trading]
kalshi_taker_fee = "0"
cooldown = 0

[ledger]
path = "{0}/trades.jsonl"
state_path = "{0}/state.json"
"#,
        dir.path().display()
    )
    .unwrap();
    let config = ConfigLoader::load(&config_path).unwrap();

    let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
    let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
    kalshi.set_quote(quote(VenueId::Kalshi, Side::Yes, dec!(0.45), dec!(50)));
    kalshi.set_quote(quote(VenueId::Kalshi, Side::No, dec!(0.60), dec!(50)));
    poly.set_quote(quote(VenueId::Polymarket, Side::Yes, dec!(0.60), dec!(30)));
    poly.set_quote(quote(VenueId::Polymarket, Side::No, dec!(0.50), dec!(30)));
    poly.push_fill(dec!(2), dec!(0.50));
    kalshi.push_fill(dec!(2), dec!(0.45));

    let discovery = StaticDiscovery::new(vec![
        (VenueId::Kalshi, "KXNFLGAME-26JAN17BUFDEN".to_string()),
        (VenueId::Polymarket, "nfl-buf-den-2026-01-17".to_string()),
    ]);
    let engine = TradingEngine::new(
        config.clone(),
        kalshi,
        poly,
        Arc::new(discovery),
    );
    engine.governor().preflight().unwrap();
    let summary = engine.run_cycle().await.unwrap();
    assert_eq!(summary.executed, 1);

    // The artifacts the status command reads are on disk and consistent.
    let ledger = TradeLedger::new(&config.ledger.path);
    let trades = ledger.trades().unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].outcome, OutcomeKind::BothFilled);
    assert_eq!(trades[0].locked_profit, dec!(0.10));
    assert!(ledger.unresolved_naked().unwrap().is_none());

    let state = TradingStateStore::new(&config.ledger.state_path)
        .load()
        .unwrap();
    assert_eq!(state, TradingState::Active);
}
