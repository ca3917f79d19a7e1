//! The polling loop: discovery to recorded outcome, one cycle at a time.
//!
//! A single logical loop drives everything. There is never concurrent
//! evaluation of two candidates or two coordinator executions in flight:
//! two simultaneous hedges would draw on the same liquidity and balance
//! snapshot and break the liquidity cap. The only concurrency in a cycle is
//! fetching the two venues' quotes side by side, to shrink the staleness
//! window before evaluation.
//!
//! Per matched game, one cycle is:
//! discover → normalize → intersect keys → governor gate → fetch quotes
//! (both venues concurrently) → evaluate → clamp → execute → append record
//! → settle governor accounting. Per-game failures skip the game; a ledger
//! append failure stops the loop, because trading past an unrecorded cycle
//! is exactly the failure this system exists to prevent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use sportsarb_core::config::AppConfig;
use sportsarb_core::types::{GameKey, Side, VenueId};

use crate::coordinator::{CoordinatorConfig, DualLegCoordinator};
use crate::evaluator::{EvaluatorConfig, MarketSnapshot, OpportunityEvaluator};
use crate::gate::{GateConfig, LiquidityGate};
use crate::governor::{GovernorConfig, GovernorError, SafetyGovernor};
use crate::ledger::{TradeLedger, TradingStateStore};
use crate::normalizer::MarketNormalizer;
use crate::venue::VenueClient;

// =============================================================================
// Discovery
// =============================================================================

/// Source of venue-native market identifiers, polled once per cycle.
/// Live discovery (venue listing APIs) plugs in behind this; tests and
/// rehearsals feed static lists.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<(VenueId, String)>>;
}

/// Fixed identifier list, rediscovered identically every cycle.
pub struct StaticDiscovery {
    markets: Vec<(VenueId, String)>,
}

impl StaticDiscovery {
    #[must_use]
    pub fn new(markets: Vec<(VenueId, String)>) -> Self {
        Self { markets }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<(VenueId, String)>> {
        Ok(self.markets.clone())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// What one poll cycle did, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    /// Games listed on both venues this cycle.
    pub matched_games: usize,
    /// Coordinator executions (including dry runs).
    pub executed: usize,
    /// Games skipped by the governor, staleness, or liquidity.
    pub skipped: usize,
}

pub struct TradingEngine {
    config: AppConfig,
    normalizer: MarketNormalizer,
    evaluator: OpportunityEvaluator,
    gate: LiquidityGate,
    coordinator: DualLegCoordinator,
    governor: SafetyGovernor,
    ledger: TradeLedger,
    kalshi: Arc<dyn VenueClient>,
    polymarket: Arc<dyn VenueClient>,
    discovery: Arc<dyn Discovery>,
}

impl TradingEngine {
    /// Wires the full pipeline from configuration and the two venue
    /// clients. The leg-1/leg-2 role split follows `config.venues`.
    #[must_use]
    pub fn new(
        config: AppConfig,
        kalshi: Arc<dyn VenueClient>,
        polymarket: Arc<dyn VenueClient>,
        discovery: Arc<dyn Discovery>,
    ) -> Self {
        let trading = &config.trading;
        let evaluator = OpportunityEvaluator::new(EvaluatorConfig {
            min_profit_threshold: trading.min_profit_threshold,
            quote_freshness: trading.quote_freshness,
            kalshi_taker_fee: trading.kalshi_taker_fee,
            max_position_size: trading.max_position_size,
        });
        let gate = LiquidityGate::new(GateConfig {
            liquidity_fraction: trading.liquidity_fraction,
            min_notional: trading.min_notional,
        });
        let client_for = |venue: VenueId| -> Arc<dyn VenueClient> {
            match venue {
                VenueId::Kalshi => Arc::clone(&kalshi),
                VenueId::Polymarket => Arc::clone(&polymarket),
            }
        };
        let coordinator = DualLegCoordinator::new(
            client_for(config.venues.leg1),
            client_for(config.venues.leg2()),
            CoordinatorConfig {
                kalshi_taker_fee: trading.kalshi_taker_fee,
                dry_run: trading.dry_run,
            },
        );
        let ledger = TradeLedger::new(&config.ledger.path);
        let governor = SafetyGovernor::new(
            GovernorConfig {
                loss_halt_fraction: trading.loss_halt_fraction,
                starting_capital: trading.starting_capital,
                max_positions_per_game: trading.max_positions_per_game,
                cooldown: trading.cooldown,
            },
            ledger.clone(),
            TradingStateStore::new(&config.ledger.state_path),
        );

        Self {
            config,
            normalizer: MarketNormalizer::default(),
            evaluator,
            gate,
            coordinator,
            governor,
            ledger,
            kalshi,
            polymarket,
            discovery,
        }
    }

    #[must_use]
    pub fn governor(&self) -> &SafetyGovernor {
        &self.governor
    }

    /// Runs until the governor halts trading. Returns `Ok(())` on a
    /// voluntary halt; startup refusals (naked position, persisted halt)
    /// surface as errors before any cycle runs.
    ///
    /// # Errors
    ///
    /// Preflight refusals, ledger append failures, and discovery faults.
    pub async fn run(&self) -> Result<()> {
        self.governor.preflight().context("preflight refused")?;
        let (kalshi_balance, polymarket_balance) =
            tokio::join!(self.kalshi.balance(), self.polymarket.balance());
        let kalshi_balance = kalshi_balance.context("kalshi balance")?;
        let polymarket_balance = polymarket_balance.context("polymarket balance")?;
        info!(
            kalshi_balance = %kalshi_balance,
            polymarket_balance = %polymarket_balance,
            "venue balances at startup"
        );
        if self.config.trading.dry_run {
            info!("dry run: candidates will be logged, no orders submitted");
        }
        loop {
            let summary = self.run_cycle().await?;
            debug!(
                matched = summary.matched_games,
                executed = summary.executed,
                skipped = summary.skipped,
                "cycle complete"
            );
            if self.governor.is_halted() {
                info!("trading halted, leaving the poll loop");
                return Ok(());
            }
            tokio::time::sleep(self.config.trading.poll_interval).await;
        }
    }

    /// One poll cycle. Public for tests and for single-shot invocations.
    ///
    /// # Errors
    ///
    /// Discovery faults and ledger append failures; everything scoped to a
    /// single game is logged and skipped instead.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let mut summary = CycleSummary::default();
        let discovered = self.discovery.discover().await?;

        // A game is tradeable only when both venues list it.
        let mut venues_by_key: HashMap<GameKey, HashSet<VenueId>> = HashMap::new();
        for (venue, native_id) in &discovered {
            match self.normalizer.normalize(*venue, native_id) {
                Ok(market) => {
                    venues_by_key
                        .entry(market.game_key)
                        .or_default()
                        .insert(*venue);
                }
                Err(err) => debug!(error = %err, "skipping unrecognized identifier"),
            }
        }
        let mut matched: Vec<GameKey> = venues_by_key
            .into_iter()
            .filter(|(_, venues)| venues.len() == 2)
            .map(|(key, _)| key)
            .collect();
        matched.sort_by_key(ToString::to_string);
        summary.matched_games = matched.len();

        for game_key in matched {
            if summary.executed >= self.config.trading.max_executions_per_cycle as usize {
                break;
            }
            match self.governor.check_game(&game_key) {
                Ok(None) => {}
                Ok(Some(refusal)) => {
                    debug!(game_key = %game_key, ?refusal, "governor skipped game");
                    summary.skipped += 1;
                    continue;
                }
                Err(GovernorError::TradingHalted { .. }) => break,
                Err(err) => return Err(err.into()),
            }
            if self.trade_one(&game_key).await? {
                summary.executed += 1;
            } else {
                summary.skipped += 1;
            }
        }
        Ok(summary)
    }

    /// Evaluates and, if approved, executes one matched game. Returns
    /// whether a coordinator execution happened. Game-scoped failures
    /// return `Ok(false)`; only recording failures propagate.
    async fn trade_one(&self, game_key: &GameKey) -> Result<bool> {
        // Both venues fetched side by side to minimize staleness.
        let (kalshi_snapshot, polymarket_snapshot) = tokio::join!(
            self.snapshot(&self.kalshi, game_key),
            self.snapshot(&self.polymarket, game_key),
        );
        let (kalshi_snapshot, polymarket_snapshot) = match (kalshi_snapshot, polymarket_snapshot)
        {
            (Ok(a), Ok(b)) => (a, b),
            (Err(err), _) | (_, Err(err)) => {
                debug!(game_key = %game_key, error = %err, "quote fetch failed, skipping game");
                return Ok(false);
            }
        };

        let candidate = match self.evaluator.evaluate(&kalshi_snapshot, &polymarket_snapshot) {
            Ok(Some(candidate)) => candidate,
            Ok(None) => return Ok(false),
            Err(err) => {
                debug!(game_key = %game_key, error = %err, "evaluation skipped game");
                return Ok(false);
            }
        };

        let snapshot_for = |venue: VenueId| -> &MarketSnapshot {
            match venue {
                VenueId::Kalshi => &kalshi_snapshot,
                VenueId::Polymarket => &polymarket_snapshot,
            }
        };
        let [first, second] = &candidate.legs;
        let clamped = match self.gate.clamp(
            &candidate,
            snapshot_for(first.venue).quote(first.side),
            snapshot_for(second.venue).quote(second.side),
        ) {
            Ok(clamped) => clamped,
            Err(err) => {
                debug!(game_key = %game_key, error = %err, "liquidity gate rejected candidate");
                return Ok(false);
            }
        };

        info!(
            game_key = %game_key,
            size = %clamped.size_shares,
            expected_profit = %clamped.expected_profit,
            roi = %clamped.roi,
            "executing candidate"
        );
        let record = self.coordinator.execute(&clamped).await?;
        // The record must be durable before anything else happens; an
        // unrecorded naked position is worse than a stopped bot.
        self.ledger
            .append_trade(&record)
            .context("failed to record completed cycle")?;
        self.governor.after_cycle(&record)?;
        Ok(true)
    }

    async fn snapshot(
        &self,
        client: &Arc<dyn VenueClient>,
        game_key: &GameKey,
    ) -> Result<MarketSnapshot> {
        let yes = client.fetch_quote(game_key, Side::Yes).await?;
        let no = client.fetch_quote(game_key, Side::No).await?;
        Ok(MarketSnapshot::new(yes, no)?)
    }
}

// =============================================================================
// Tests
// =============================================================================
