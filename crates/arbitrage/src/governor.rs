//! Safety governor: the gate between the ledger and the trading loop.
//!
//! Three latches, all derived from persisted state so they hold across
//! crashes and restarts:
//!
//! - an unresolved naked position in the ledger refuses startup entirely,
//!   until an operator appends a resolution marker;
//! - cumulative realized loss at or past the configured fraction of
//!   starting capital halts trading and persists the halt;
//! - a failed compensation halts immediately, before any further cycle.
//!
//! The governor also rations attempts: a per-game cap on open positions
//! and a cooldown between attempts on the same game, both computed from
//! ledger history rather than in-memory counters.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use sportsarb_core::types::GameKey;

use crate::ledger::{
    LedgerError, OutcomeKind, TradeLedger, TradeRecord, TradingState, TradingStateStore,
};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum GovernorError {
    /// The ledger holds a naked position with no resolution marker. The
    /// trading loop must not start; flatten manually, then run
    /// `resolve-naked`.
    #[error("unresolved naked position {record_id} on {game_key}; refusing to trade")]
    UnresolvedNakedPosition { record_id: Uuid, game_key: GameKey },

    /// The persisted trading state is halted.
    #[error("trading halted: {reason}")]
    TradingHalted { reason: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// A non-fatal reason to skip one game this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    /// Open-position cap for this game reached.
    PerGameCap { open: u32 },
    /// Too soon since the last attempt on this game.
    Cooldown { remaining: Duration },
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Loss fraction of starting capital that latches the halt.
    pub loss_halt_fraction: Decimal,
    pub starting_capital: Decimal,
    pub max_positions_per_game: u32,
    pub cooldown: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            loss_halt_fraction: rust_decimal_macros::dec!(0.40),
            starting_capital: rust_decimal_macros::dec!(100),
            max_positions_per_game: 3,
            cooldown: Duration::from_secs(3600),
        }
    }
}

impl GovernorConfig {
    fn loss_limit(&self) -> Decimal {
        self.loss_halt_fraction * self.starting_capital
    }
}

// =============================================================================
// Governor
// =============================================================================

pub struct SafetyGovernor {
    config: GovernorConfig,
    ledger: TradeLedger,
    state_store: TradingStateStore,
    state: RwLock<TradingState>,
    cumulative_loss: RwLock<Decimal>,
}

impl SafetyGovernor {
    #[must_use]
    pub fn new(config: GovernorConfig, ledger: TradeLedger, state_store: TradingStateStore) -> Self {
        Self {
            config,
            ledger,
            state_store,
            state: RwLock::new(TradingState::Active),
            cumulative_loss: RwLock::new(Decimal::ZERO),
        }
    }

    /// Startup gate, run once before the trading loop.
    ///
    /// Loads the persisted state, scans the ledger for unresolved naked
    /// positions, and re-derives cumulative loss so the halt latch holds
    /// even if the state file was deleted.
    ///
    /// # Errors
    ///
    /// [`GovernorError::UnresolvedNakedPosition`] or
    /// [`GovernorError::TradingHalted`] when trading must not begin;
    /// [`GovernorError::Ledger`] when the ledger itself cannot be read.
    pub fn preflight(&self) -> Result<(), GovernorError> {
        let persisted = self.state_store.load()?;
        if let TradingState::Halted { reason, .. } = &persisted {
            *self.state.write() = persisted.clone();
            return Err(GovernorError::TradingHalted {
                reason: reason.clone(),
            });
        }

        if let Some(naked) = self.ledger.unresolved_naked()? {
            error!(
                record_id = %naked.id,
                game_key = %naked.game_key,
                "startup refused: unresolved naked position"
            );
            return Err(GovernorError::UnresolvedNakedPosition {
                record_id: naked.id,
                game_key: naked.game_key,
            });
        }

        let loss = self.ledger.cumulative_loss()?;
        *self.cumulative_loss.write() = loss;
        if loss >= self.config.loss_limit() {
            let reason = format!(
                "cumulative loss {loss} at or past limit {}",
                self.config.loss_limit()
            );
            self.halt(&reason)?;
            return Err(GovernorError::TradingHalted { reason });
        }

        info!(cumulative_loss = %loss, "preflight passed");
        Ok(())
    }

    /// Per-game gate, checked before evaluation each cycle.
    ///
    /// # Errors
    ///
    /// [`GovernorError::TradingHalted`] once the halt latch is set;
    /// [`GovernorError::Ledger`] on read failure.
    pub fn check_game(&self, game_key: &GameKey) -> Result<Option<Refusal>, GovernorError> {
        if let TradingState::Halted { reason, .. } = &*self.state.read() {
            return Err(GovernorError::TradingHalted {
                reason: reason.clone(),
            });
        }

        let trades = self.ledger.trades()?;
        let open = trades
            .iter()
            .filter(|trade| {
                !trade.dry_run
                    && trade.game_key == *game_key
                    && trade.outcome == OutcomeKind::BothFilled
            })
            .count() as u32;
        if open >= self.config.max_positions_per_game {
            return Ok(Some(Refusal::PerGameCap { open }));
        }

        let last_attempt = trades
            .iter()
            .rev()
            .find(|trade| !trade.dry_run && trade.game_key == *game_key)
            .map(|trade| trade.timestamp);
        if let Some(at) = last_attempt {
            let elapsed = (chrono::Utc::now() - at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed < self.config.cooldown {
                return Ok(Some(Refusal::Cooldown {
                    remaining: self.config.cooldown - elapsed,
                }));
            }
        }

        Ok(None)
    }

    /// Settles the accounting after one recorded cycle. Returns the state
    /// the loop should observe; a halt here is already persisted.
    ///
    /// # Errors
    ///
    /// [`GovernorError::Ledger`] when the halt cannot be persisted — the
    /// caller must stop trading in that case too.
    pub fn after_cycle(&self, record: &TradeRecord) -> Result<TradingState, GovernorError> {
        if record.dry_run {
            return Ok(self.state.read().clone());
        }

        if record.naked {
            // Unbounded-risk position: nothing else may trade until an
            // operator resolves it.
            return self.halt(&format!(
                "compensation failed on {}, naked position {}",
                record.game_key, record.id
            ));
        }

        if record.locked_profit < Decimal::ZERO {
            let mut loss = self.cumulative_loss.write();
            *loss += -record.locked_profit;
            let total = *loss;
            drop(loss);
            warn!(
                cycle_loss = %-record.locked_profit,
                cumulative_loss = %total,
                limit = %self.config.loss_limit(),
                "realized loss recorded"
            );
            if total >= self.config.loss_limit() {
                return self.halt(&format!(
                    "cumulative loss {total} at or past limit {}",
                    self.config.loss_limit()
                ));
            }
        }

        Ok(self.state.read().clone())
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.state.read().is_halted()
    }

    #[must_use]
    pub fn cumulative_loss(&self) -> Decimal {
        *self.cumulative_loss.read()
    }

    /// Latches and persists the halt.
    fn halt(&self, reason: &str) -> Result<TradingState, GovernorError> {
        error!(reason, "trading halted");
        let halted = TradingState::halted(reason);
        self.state_store.save(&halted)?;
        *self.state.write() = halted.clone();
        Ok(halted)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sportsarb_core::types::{MarketType, Sport};
    use tempfile::TempDir;

    fn key() -> GameKey {
        GameKey::new(Sport::Nfl, "buf", "den", MarketType::Moneyline)
    }

    fn record(outcome: OutcomeKind, locked_profit: Decimal) -> TradeRecord {
        TradeRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            game_key: key(),
            outcome,
            legs: Vec::new(),
            compensation: None,
            both_legs_filled: outcome == OutcomeKind::BothFilled,
            success: outcome == OutcomeKind::BothFilled,
            naked: outcome == OutcomeKind::CompensationFailed,
            locked_profit,
            dry_run: false,
        }
    }

    fn governor(dir: &TempDir, config: GovernorConfig) -> SafetyGovernor {
        SafetyGovernor::new(
            config,
            TradeLedger::new(dir.path().join("trades.jsonl")),
            TradingStateStore::new(dir.path().join("state.json")),
        )
    }

    fn ledger(dir: &TempDir) -> TradeLedger {
        TradeLedger::new(dir.path().join("trades.jsonl"))
    }

    // ==================== Preflight ====================

    #[test]
    fn preflight_passes_on_a_clean_ledger() {
        let dir = TempDir::new().unwrap();
        assert!(governor(&dir, GovernorConfig::default()).preflight().is_ok());
    }

    #[test]
    fn preflight_refuses_unresolved_naked_position() {
        let dir = TempDir::new().unwrap();
        ledger(&dir)
            .append_trade(&record(OutcomeKind::CompensationFailed, dec!(-0.90)))
            .unwrap();

        let err = governor(&dir, GovernorConfig::default())
            .preflight()
            .unwrap_err();
        assert!(matches!(err, GovernorError::UnresolvedNakedPosition { .. }));
    }

    #[test]
    fn preflight_passes_after_operator_resolution() {
        let dir = TempDir::new().unwrap();
        let naked = record(OutcomeKind::CompensationFailed, dec!(-0.90));
        ledger(&dir).append_trade(&naked).unwrap();
        ledger(&dir)
            .mark_resolved(naked.id, "manually sold on venue")
            .unwrap();

        // Loss from the naked cycle still counts, so keep it under the limit.
        let config = GovernorConfig {
            starting_capital: dec!(100),
            loss_halt_fraction: dec!(0.40),
            ..GovernorConfig::default()
        };
        assert!(governor(&dir, config).preflight().is_ok());
    }

    #[test]
    fn resolution_and_state_reset_allow_restart() {
        let dir = TempDir::new().unwrap();
        let first = governor(&dir, GovernorConfig::default());
        first.preflight().unwrap();

        let naked = record(OutcomeKind::CompensationFailed, dec!(-0.90));
        ledger(&dir).append_trade(&naked).unwrap();
        assert!(first.after_cycle(&naked).unwrap().is_halted());

        // What `resolve-naked` does: resolution marker in the ledger,
        // persisted state back to active. Without the reset the stale
        // halt would still refuse the restart.
        ledger(&dir)
            .mark_resolved(naked.id, "manually sold on venue")
            .unwrap();
        TradingStateStore::new(dir.path().join("state.json"))
            .save(&TradingState::Active)
            .unwrap();

        assert!(governor(&dir, GovernorConfig::default()).preflight().is_ok());
    }

    #[test]
    fn preflight_honors_persisted_halt() {
        let dir = TempDir::new().unwrap();
        TradingStateStore::new(dir.path().join("state.json"))
            .save(&TradingState::halted("previous run halted"))
            .unwrap();

        let err = governor(&dir, GovernorConfig::default())
            .preflight()
            .unwrap_err();
        assert!(matches!(err, GovernorError::TradingHalted { .. }));
    }

    #[test]
    fn preflight_rederives_loss_from_the_ledger() {
        let dir = TempDir::new().unwrap();
        // Losses past 40% of capital, but no state file at all.
        ledger(&dir)
            .append_trade(&record(OutcomeKind::Compensated, dec!(-45)))
            .unwrap();

        let err = governor(&dir, GovernorConfig::default())
            .preflight()
            .unwrap_err();
        assert!(matches!(err, GovernorError::TradingHalted { .. }));
        // And the re-derived halt is persisted for the next restart.
        let persisted = TradingStateStore::new(dir.path().join("state.json"))
            .load()
            .unwrap();
        assert!(persisted.is_halted());
    }

    // ==================== Loss latch ====================

    #[test]
    fn loss_threshold_latches_and_persists() {
        let dir = TempDir::new().unwrap();
        let governor = governor(&dir, GovernorConfig::default());
        governor.preflight().unwrap();

        // 40 dollars of loss on 100 capital at the default 0.40 fraction.
        let state = governor
            .after_cycle(&record(OutcomeKind::Compensated, dec!(-40)))
            .unwrap();
        assert!(state.is_halted());
        assert!(governor.is_halted());

        let persisted = TradingStateStore::new(dir.path().join("state.json"))
            .load()
            .unwrap();
        assert!(persisted.is_halted());
    }

    #[test]
    fn losses_accumulate_across_cycles() {
        let dir = TempDir::new().unwrap();
        let governor = governor(&dir, GovernorConfig::default());
        governor.preflight().unwrap();

        assert!(!governor
            .after_cycle(&record(OutcomeKind::Compensated, dec!(-25)))
            .unwrap()
            .is_halted());
        assert!(governor
            .after_cycle(&record(OutcomeKind::Compensated, dec!(-15)))
            .unwrap()
            .is_halted());
        assert_eq!(governor.cumulative_loss(), dec!(40));
    }

    #[test]
    fn profits_do_not_reduce_the_loss_tally() {
        let dir = TempDir::new().unwrap();
        let governor = governor(&dir, GovernorConfig::default());
        governor.preflight().unwrap();

        governor
            .after_cycle(&record(OutcomeKind::BothFilled, dec!(5)))
            .unwrap();
        governor
            .after_cycle(&record(OutcomeKind::Compensated, dec!(-3)))
            .unwrap();
        assert_eq!(governor.cumulative_loss(), dec!(3));
    }

    #[test]
    fn naked_outcome_halts_immediately() {
        let dir = TempDir::new().unwrap();
        let governor = governor(&dir, GovernorConfig::default());
        governor.preflight().unwrap();

        let state = governor
            .after_cycle(&record(OutcomeKind::CompensationFailed, dec!(-0.90)))
            .unwrap();
        assert!(state.is_halted());
        assert!(governor.check_game(&key()).is_err());
    }

    #[test]
    fn dry_run_records_change_nothing() {
        let dir = TempDir::new().unwrap();
        let governor = governor(&dir, GovernorConfig::default());
        governor.preflight().unwrap();

        let mut dry = record(OutcomeKind::DryRun, dec!(-99));
        dry.dry_run = true;
        assert!(!governor.after_cycle(&dry).unwrap().is_halted());
        assert_eq!(governor.cumulative_loss(), Decimal::ZERO);
    }

    // ==================== Per-game rationing ====================

    #[test]
    fn per_game_cap_refuses_further_attempts() {
        let dir = TempDir::new().unwrap();
        let config = GovernorConfig {
            max_positions_per_game: 1,
            cooldown: Duration::ZERO,
            ..GovernorConfig::default()
        };
        ledger(&dir)
            .append_trade(&record(OutcomeKind::BothFilled, dec!(0.10)))
            .unwrap();

        let governor = governor(&dir, config);
        governor.preflight().unwrap();
        assert!(matches!(
            governor.check_game(&key()).unwrap(),
            Some(Refusal::PerGameCap { open: 1 })
        ));
    }

    #[test]
    fn cooldown_refuses_rapid_reattempts() {
        let dir = TempDir::new().unwrap();
        ledger(&dir)
            .append_trade(&record(OutcomeKind::Leg1Failed, Decimal::ZERO))
            .unwrap();

        let governor = governor(&dir, GovernorConfig::default());
        governor.preflight().unwrap();
        assert!(matches!(
            governor.check_game(&key()).unwrap(),
            Some(Refusal::Cooldown { .. })
        ));
    }

    #[test]
    fn other_games_are_unaffected_by_the_cooldown() {
        let dir = TempDir::new().unwrap();
        ledger(&dir)
            .append_trade(&record(OutcomeKind::Leg1Failed, Decimal::ZERO))
            .unwrap();

        let governor = governor(&dir, GovernorConfig::default());
        governor.preflight().unwrap();
        let other = GameKey::new(Sport::Nba, "bos", "nyk", MarketType::Moneyline);
        assert_eq!(governor.check_game(&other).unwrap(), None);
    }
}
