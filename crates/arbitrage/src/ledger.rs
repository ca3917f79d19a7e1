//! Position ledger: the append-only trade log and the persisted trading
//! state.
//!
//! The ledger is the sole authority on whether a naked position exists, so
//! every append is flushed and fsynced before the caller proceeds — a crash
//! immediately after a cycle must not lose the record of that cycle. Lines
//! are one JSON object each; the file is owned by a single writer.
//!
//! Two entry kinds share the file: trade records written by the
//! coordinator, and resolution markers appended by an operator after
//! manually flattening a naked position. Keeping resolutions in the same
//! append-only stream means the naked-position scan never needs a second
//! source of truth.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use sportsarb_core::types::{GameKey, Side, VenueId};

use crate::venue::{OrderAction, OrderOutcome, TakerOrderRequest};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no trade record with id {0}")]
    UnknownRecord(Uuid),
}

// =============================================================================
// Record schema
// =============================================================================

/// How a coordinator cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Both legs filled size-matched; profit locked.
    BothFilled,
    /// Leg 1 rejected; no position was ever taken.
    Leg1Failed,
    /// Leg 2 failed but the reversing order flattened leg 1 completely.
    Compensated,
    /// Leg 2 failed and the reversing order did not fully flatten leg 1.
    /// An unhedged position is live; operator intervention required.
    CompensationFailed,
    /// Dry run: evaluated and logged, nothing submitted.
    DryRun,
}

impl OutcomeKind {
    /// The hedge exists as planned.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, OutcomeKind::BothFilled)
    }

    /// An unhedged position is live.
    #[must_use]
    pub fn is_naked(self) -> bool {
        matches!(self, OutcomeKind::CompensationFailed)
    }
}

/// One order as it was actually placed and answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegRecord {
    pub venue: VenueId,
    pub side: Side,
    pub action: OrderAction,
    pub limit_price: Decimal,
    pub requested_shares: Decimal,
    pub filled: bool,
    pub filled_shares: Decimal,
    pub avg_price: Option<Decimal>,
    pub error: Option<String>,
}

impl LegRecord {
    /// Pairs a request with its terminal outcome.
    #[must_use]
    pub fn from_outcome(request: &TakerOrderRequest, venue: VenueId, outcome: &OrderOutcome) -> Self {
        Self {
            venue,
            side: request.side,
            action: request.action,
            limit_price: request.limit_price,
            requested_shares: request.shares,
            filled: outcome.is_full_fill(request.shares),
            filled_shares: outcome.filled_shares,
            avg_price: outcome.avg_price,
            error: outcome.error.clone(),
        }
    }

    /// A request that died at the venue boundary before any fill.
    #[must_use]
    pub fn from_error(request: &TakerOrderRequest, venue: VenueId, error: String) -> Self {
        Self {
            venue,
            side: request.side,
            action: request.action,
            limit_price: request.limit_price,
            requested_shares: request.shares,
            filled: false,
            filled_shares: Decimal::ZERO,
            avg_price: None,
            error: Some(error),
        }
    }

    /// Dollars actually paid (buys) or received (sells).
    #[must_use]
    pub fn traded_notional(&self) -> Decimal {
        self.avg_price.unwrap_or(Decimal::ZERO) * self.filled_shares
    }
}

/// One completed coordinator cycle, appended exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub game_key: GameKey,
    pub outcome: OutcomeKind,
    /// The hedge legs in placement order (leg 1 first).
    pub legs: Vec<LegRecord>,
    /// The reversing order, when compensation was attempted.
    pub compensation: Option<LegRecord>,
    pub both_legs_filled: bool,
    pub success: bool,
    /// Authoritative across restarts: true only while an unhedged position
    /// is live and unresolved.
    pub naked: bool,
    /// Realized PnL of the cycle: locked profit on success, negative on
    /// compensation losses, worst-case exposure while naked.
    pub locked_profit: Decimal,
    pub dry_run: bool,
}

/// Operator marker: the naked position in `resolved_id` has been manually
/// flattened outside the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub id: Uuid,
    pub resolved_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub note: String,
}

/// One line of the ledger file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEntry {
    Trade(TradeRecord),
    Resolution(ResolutionRecord),
}

// =============================================================================
// Ledger store
// =============================================================================

/// Append-only JSONL trade ledger.
#[derive(Debug, Clone)]
pub struct TradeLedger {
    path: PathBuf,
}

impl TradeLedger {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one trade record, durable before returning.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] or [`LedgerError::Json`] on failure;
    /// the coordinator must not proceed to another cycle in that case.
    pub fn append_trade(&self, record: &TradeRecord) -> Result<(), LedgerError> {
        self.append(&LedgerEntry::Trade(record.clone()))
    }

    /// Appends an operator resolution for a naked trade record.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UnknownRecord`] when `resolved_id` does not name a
    /// naked trade in this ledger.
    pub fn mark_resolved(&self, resolved_id: Uuid, note: &str) -> Result<(), LedgerError> {
        let known = self
            .trades()?
            .iter()
            .any(|trade| trade.id == resolved_id && trade.naked);
        if !known {
            return Err(LedgerError::UnknownRecord(resolved_id));
        }
        let resolution = ResolutionRecord {
            id: Uuid::new_v4(),
            resolved_id,
            timestamp: Utc::now(),
            note: note.to_string(),
        };
        info!(resolved_id = %resolved_id, note, "naked position marked resolved");
        self.append(&LedgerEntry::Resolution(resolution))
    }

    fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.flush()?;
        // The record is the only evidence of a naked position; it must
        // survive a crash that happens right after this call.
        file.sync_all()?;
        Ok(())
    }

    /// Reads every entry. A missing file is an empty ledger; a corrupt
    /// line (torn write from a crash) ends the read with a warning rather
    /// than failing startup.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] when the file exists but cannot be read.
    pub fn load(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %err,
                        "corrupt ledger line, ignoring remainder"
                    );
                    break;
                }
            }
        }
        Ok(entries)
    }

    /// All trade records, in append order.
    ///
    /// # Errors
    ///
    /// See [`TradeLedger::load`].
    pub fn trades(&self) -> Result<Vec<TradeRecord>, LedgerError> {
        Ok(self
            .load()?
            .into_iter()
            .filter_map(|entry| match entry {
                LedgerEntry::Trade(trade) => Some(trade),
                LedgerEntry::Resolution(_) => None,
            })
            .collect())
    }

    /// The most recently appended trade record, if any.
    ///
    /// # Errors
    ///
    /// See [`TradeLedger::load`].
    pub fn last_trade(&self) -> Result<Option<TradeRecord>, LedgerError> {
        Ok(self.trades()?.pop())
    }

    /// The most recent naked trade with no later resolution marker, if any.
    ///
    /// # Errors
    ///
    /// See [`TradeLedger::load`].
    pub fn unresolved_naked(&self) -> Result<Option<TradeRecord>, LedgerError> {
        let entries = self.load()?;
        let mut open: Vec<TradeRecord> = Vec::new();
        for entry in entries {
            match entry {
                LedgerEntry::Trade(trade) if trade.naked => open.push(trade),
                LedgerEntry::Resolution(resolution) => {
                    open.retain(|trade| trade.id != resolution.resolved_id);
                }
                LedgerEntry::Trade(_) => {}
            }
        }
        Ok(open.pop())
    }

    /// Realized loss across all live (non-dry-run) records: the sum of
    /// negative `locked_profit`, as a positive number.
    ///
    /// # Errors
    ///
    /// See [`TradeLedger::load`].
    pub fn cumulative_loss(&self) -> Result<Decimal, LedgerError> {
        Ok(self
            .trades()?
            .iter()
            .filter(|trade| !trade.dry_run && trade.locked_profit < Decimal::ZERO)
            .map(|trade| -trade.locked_profit)
            .sum())
    }
}

// =============================================================================
// Trading state
// =============================================================================

/// Process-wide trading state, persisted beside the ledger. Never an
/// in-memory-only flag: a halt must survive crash and restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TradingState {
    Active,
    Halted {
        reason: String,
        since: DateTime<Utc>,
    },
}

impl TradingState {
    #[must_use]
    pub fn is_halted(&self) -> bool {
        matches!(self, TradingState::Halted { .. })
    }

    #[must_use]
    pub fn halted(reason: impl Into<String>) -> Self {
        TradingState::Halted {
            reason: reason.into(),
            since: Utc::now(),
        }
    }
}

/// Load/store for the persisted [`TradingState`].
#[derive(Debug, Clone)]
pub struct TradingStateStore {
    path: PathBuf,
}

impl TradingStateStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Missing file means the system has never halted: `Active`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed;
    /// an unreadable halt flag must stop startup, not be assumed away.
    pub fn load(&self) -> Result<TradingState, LedgerError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(TradingState::Active),
            Err(err) => Err(err.into()),
        }
    }

    /// Persists the state, durable before returning.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] or [`LedgerError::Json`] on failure.
    pub fn save(&self, state: &TradingState) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(state)?;
        let mut file = File::create(&self.path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
