//! Application configuration.
//!
//! Every tunable the trading loop recognizes lives here, with defaults
//! matching the conservative live deployment. Loading and merging (TOML file
//! plus `ARB_`-prefixed environment overrides) is in
//! [`crate::config_loader`].

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::VenueId;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub trading: TradingConfig,
    pub venues: VenueRoleConfig,
    pub ledger: LedgerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            trading: TradingConfig::default(),
            venues: VenueRoleConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Validates the whole tree.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first out-of-range field.
    pub fn validate(&self) -> Result<(), String> {
        self.trading.validate()?;
        self.venues.validate()
    }
}

// =============================================================================
// Trading parameters
// =============================================================================

/// Risk and sizing parameters for the trading loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Maximum dollars committed to a single arbitrage attempt (both legs).
    pub max_position_size: Decimal,

    /// Minimum return on cost required to trade (0.005 = 0.5%).
    pub min_profit_threshold: Decimal,

    /// Fraction of visible book depth one trade may consume on either venue.
    pub liquidity_fraction: Decimal,

    /// Time between poll cycles, in seconds.
    #[serde(with = "serde_duration_secs")]
    pub poll_interval: Duration,

    /// Cumulative-loss fraction of starting capital that latches the halt.
    pub loss_halt_fraction: Decimal,

    /// Capital at the start of the session, the base for the loss halt.
    pub starting_capital: Decimal,

    /// Evaluate and log candidates without submitting any live order.
    pub dry_run: bool,

    /// Maximum acceptable quote age at evaluation time, in seconds.
    #[serde(with = "serde_duration_secs")]
    pub quote_freshness: Duration,

    /// Kalshi taker fee as a fraction of traded notional, added to that
    /// leg's cost.
    pub kalshi_taker_fee: Decimal,

    /// Minimum notional per order on the fractional-shares venue.
    pub min_notional: Decimal,

    /// Maximum unsettled attempts held against one game at a time.
    pub max_positions_per_game: u32,

    /// Minimum time between two attempts on the same game key.
    #[serde(with = "serde_duration_secs")]
    pub cooldown: Duration,

    /// Maximum coordinator executions per poll cycle.
    pub max_executions_per_cycle: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            max_position_size: dec!(8.00),
            min_profit_threshold: dec!(0.005),
            liquidity_fraction: dec!(0.07),
            poll_interval: Duration::from_secs(15),
            loss_halt_fraction: dec!(0.40),
            starting_capital: dec!(100),
            dry_run: false,
            quote_freshness: Duration::from_secs(10),
            kalshi_taker_fee: dec!(0.02),
            min_notional: dec!(1.00),
            max_positions_per_game: 3,
            cooldown: Duration::from_secs(3600),
            max_executions_per_cycle: 2,
        }
    }
}

impl TradingConfig {
    /// Smallest sizes and tightest caps, for first live runs.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            max_position_size: dec!(4.00),
            liquidity_fraction: dec!(0.07),
            min_profit_threshold: dec!(0.01),
            ..Self::default()
        }
    }

    /// Larger book share and lower edge bar for tested deployments.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            max_position_size: dec!(25.00),
            liquidity_fraction: dec!(0.30),
            min_profit_threshold: dec!(0.005),
            ..Self::default()
        }
    }

    /// Sets the liquidity fraction.
    #[must_use]
    pub fn with_liquidity_fraction(mut self, fraction: Decimal) -> Self {
        self.liquidity_fraction = fraction;
        self
    }

    /// Sets the minimum profit threshold.
    #[must_use]
    pub fn with_min_profit_threshold(mut self, threshold: Decimal) -> Self {
        self.min_profit_threshold = threshold;
        self
    }

    /// Enables or disables dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Validates ranges.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending field.
    pub fn validate(&self) -> Result<(), String> {
        if self.liquidity_fraction <= Decimal::ZERO || self.liquidity_fraction > Decimal::ONE {
            return Err(format!(
                "liquidity_fraction must be in (0, 1], got {}",
                self.liquidity_fraction
            ));
        }
        if self.loss_halt_fraction <= Decimal::ZERO || self.loss_halt_fraction > Decimal::ONE {
            return Err(format!(
                "loss_halt_fraction must be in (0, 1], got {}",
                self.loss_halt_fraction
            ));
        }
        if self.min_profit_threshold < Decimal::ZERO {
            return Err("min_profit_threshold must be non-negative".to_string());
        }
        if self.starting_capital <= Decimal::ZERO {
            return Err("starting_capital must be positive".to_string());
        }
        if self.max_position_size <= Decimal::ZERO {
            return Err("max_position_size must be positive".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Venue roles
// =============================================================================

/// Which venue takes which leg.
///
/// Leg 1 must be the venue whose taker orders are immediately final
/// (fill-or-kill, no partial ambiguity, no cancel round-trip); leg 2 is
/// placed only after leg 1's terminal result is known. The assignment is an
/// operator decision, not a hardcoded assumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueRoleConfig {
    /// Venue for the first, fill-or-kill leg.
    pub leg1: VenueId,
}

impl Default for VenueRoleConfig {
    fn default() -> Self {
        Self {
            leg1: VenueId::Polymarket,
        }
    }
}

impl VenueRoleConfig {
    /// Venue for the second leg.
    #[must_use]
    pub fn leg2(&self) -> VenueId {
        self.leg1.other()
    }

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

// =============================================================================
// Ledger paths
// =============================================================================

/// Where the trade ledger and trading-state files live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Append-only JSONL trade log.
    pub path: PathBuf,
    /// Persisted trading state (active/halted) beside the ledger.
    pub state_path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/trades.jsonl"),
            state_path: PathBuf::from("data/trading_state.json"),
        }
    }
}

// =============================================================================
// Duration Serde Helper
// =============================================================================

mod serde_duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
