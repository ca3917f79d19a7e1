//! Opportunity evaluation: from paired quotes to an [`ArbitrageCandidate`].
//!
//! For one matched game the evaluator looks at both venues' books for both
//! sides and tries the two viable leg assignments (buy Yes here + No there,
//! and the reverse). A hedge is profitable when the combined ask cost of the
//! two complementary outcomes, fees included, is under the fixed 1.00 payout:
//!
//! ```text
//! Venue A: yes ask 0.45      Venue B: no ask 0.50
//! cost  = 0.45 + 0.50 = 0.95 per share
//! payout = 1.00 at resolution, either way the game goes
//! profit = 0.05 per share, roi = 5.26%
//! ```
//!
//! The system only ever takes liquidity — every price used is a best ask,
//! never a resting order of our own. Evaluation is a pure function of the
//! quotes: the same inputs always produce the same candidate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use sportsarb_core::types::{GameKey, Side, VenueId, VenueQuote};

/// Venue price tick. Both venues quote binary outcomes in whole cents.
pub const PRICE_TICK: Decimal = dec!(0.01);

/// Fixed payout of one share of the winning outcome.
const PAYOUT: Decimal = Decimal::ONE;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum EvaluateError {
    /// The supplied quotes do not describe complementary sides of one game
    /// on two different venues.
    #[error("mismatched quotes: {0}")]
    MismatchedQuotes(String),

    /// A quote is older than the freshness window. Skip the game this
    /// cycle; stale quotes are a primary source of false positives.
    #[error("stale quote from {venue}: {age_ms}ms old")]
    StaleQuote { venue: VenueId, age_ms: i64 },
}

// =============================================================================
// Inputs
// =============================================================================

/// Both sides of one venue's book for one game, captured in the same fetch.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub venue: VenueId,
    pub game_key: GameKey,
    pub yes: VenueQuote,
    pub no: VenueQuote,
}

impl MarketSnapshot {
    /// Bundles two quotes, checking they describe complementary sides of
    /// the same game on the same venue.
    ///
    /// # Errors
    ///
    /// [`EvaluateError::MismatchedQuotes`] when the quotes disagree.
    pub fn new(yes: VenueQuote, no: VenueQuote) -> Result<Self, EvaluateError> {
        if yes.side != Side::Yes || no.side != Side::No {
            return Err(EvaluateError::MismatchedQuotes(
                "snapshot requires one yes and one no quote".to_string(),
            ));
        }
        if yes.venue != no.venue {
            return Err(EvaluateError::MismatchedQuotes(format!(
                "quotes from different venues: {} vs {}",
                yes.venue, no.venue
            )));
        }
        if yes.game_key != no.game_key {
            return Err(EvaluateError::MismatchedQuotes(format!(
                "quotes for different games: {} vs {}",
                yes.game_key, no.game_key
            )));
        }
        Ok(Self {
            venue: yes.venue,
            game_key: yes.game_key.clone(),
            yes,
            no,
        })
    }

    #[must_use]
    pub fn quote(&self, side: Side) -> &VenueQuote {
        match side {
            Side::Yes => &self.yes,
            Side::No => &self.no,
        }
    }
}

// =============================================================================
// Candidate
// =============================================================================

/// One order of the two-venue hedge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub venue: VenueId,
    pub side: Side,
    /// Taker limit: the quoted best ask, truncated to the venue tick.
    pub limit_price: Decimal,
    pub max_shares: Decimal,
}

/// An approved-for-sizing hedge. Immutable; built fresh each cycle and
/// consumed exactly once by the coordinator or discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageCandidate {
    pub id: Uuid,
    pub game_key: GameKey,
    /// The two complementary legs, one per venue.
    pub legs: [Leg; 2],
    /// Total dollars to acquire both legs at `size_shares`, fees included.
    pub expected_cost: Decimal,
    /// Locked profit at resolution if both legs fill at their limits.
    pub expected_profit: Decimal,
    /// `expected_profit / expected_cost`.
    pub roi: Decimal,
    pub size_shares: Decimal,
    pub evaluated_at: DateTime<Utc>,
}

impl ArbitrageCandidate {
    /// The leg placed on `venue`, if any.
    #[must_use]
    pub fn leg_on(&self, venue: VenueId) -> Option<&Leg> {
        self.legs.iter().find(|leg| leg.venue == venue)
    }

    /// Re-derives cost, profit, and roi for a new size, keeping prices.
    /// Used by the liquidity gate after clamping.
    #[must_use]
    pub fn resized(&self, size_shares: Decimal, cost_per_share: Decimal) -> Self {
        let mut resized = self.clone();
        for leg in &mut resized.legs {
            leg.max_shares = size_shares;
        }
        resized.size_shares = size_shares;
        resized.expected_cost = cost_per_share * size_shares;
        resized.expected_profit = (PAYOUT - cost_per_share) * size_shares;
        resized.roi = if resized.expected_cost.is_zero() {
            Decimal::ZERO
        } else {
            resized.expected_profit / resized.expected_cost
        };
        resized
    }

    /// Per-share cost implied by the current size.
    #[must_use]
    pub fn cost_per_share(&self) -> Decimal {
        if self.size_shares.is_zero() {
            Decimal::ZERO
        } else {
            self.expected_cost / self.size_shares
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Evaluation thresholds and cost model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Minimum return on cost (0.005 = 0.5%).
    pub min_profit_threshold: Decimal,
    /// Maximum quote age at evaluation time.
    pub quote_freshness: Duration,
    /// Kalshi taker fee as a fraction of the leg's notional.
    pub kalshi_taker_fee: Decimal,
    /// Maximum dollars committed across both legs.
    pub max_position_size: Decimal,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            min_profit_threshold: dec!(0.005),
            quote_freshness: Duration::from_secs(10),
            kalshi_taker_fee: dec!(0.02),
            max_position_size: dec!(8.00),
        }
    }
}

impl EvaluatorConfig {
    #[must_use]
    pub fn with_min_profit_threshold(mut self, threshold: Decimal) -> Self {
        self.min_profit_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_kalshi_taker_fee(mut self, fee: Decimal) -> Self {
        self.kalshi_taker_fee = fee;
        self
    }

    #[must_use]
    pub fn with_max_position_size(mut self, size: Decimal) -> Self {
        self.max_position_size = size;
        self
    }
}

// =============================================================================
// Evaluator
// =============================================================================

/// Stateless evaluator; all state lives in the quotes it is handed.
#[derive(Debug, Clone)]
pub struct OpportunityEvaluator {
    config: EvaluatorConfig,
}

impl OpportunityEvaluator {
    #[must_use]
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// Evaluates a matched game.
    ///
    /// Tries both leg assignments and keeps the better roi. Returns
    /// `Ok(None)` when no assignment clears the profit threshold at a
    /// tradeable size.
    ///
    /// # Errors
    ///
    /// [`EvaluateError::MismatchedQuotes`] on inconsistent inputs,
    /// [`EvaluateError::StaleQuote`] when any quote is outside the
    /// freshness window.
    pub fn evaluate(
        &self,
        a: &MarketSnapshot,
        b: &MarketSnapshot,
    ) -> Result<Option<ArbitrageCandidate>, EvaluateError> {
        if a.venue == b.venue {
            return Err(EvaluateError::MismatchedQuotes(format!(
                "both snapshots from {}",
                a.venue
            )));
        }
        if a.game_key != b.game_key {
            return Err(EvaluateError::MismatchedQuotes(format!(
                "snapshots for different games: {} vs {}",
                a.game_key, b.game_key
            )));
        }
        let now = Utc::now();
        for quote in [&a.yes, &a.no, &b.yes, &b.no] {
            self.check_freshness(quote, now)?;
        }

        // Buy Yes on A + No on B, and the reverse. Each pairing holds both
        // complementary outcomes, so payout is fixed either way.
        let first = self.price_assignment(a, Side::Yes, b, Side::No);
        let second = self.price_assignment(a, Side::No, b, Side::Yes);
        let best = match (first, second) {
            (Some(x), Some(y)) => Some(if x.roi >= y.roi { x } else { y }),
            (x, y) => x.or(y),
        };

        let Some(pricing) = best else {
            return Ok(None);
        };
        if pricing.roi < self.config.min_profit_threshold {
            debug!(
                game_key = %a.game_key,
                roi = %pricing.roi,
                threshold = %self.config.min_profit_threshold,
                "edge below threshold"
            );
            return Ok(None);
        }

        // Size to capital: whole contracts, the stricter of the two venues'
        // units, applied to both legs so they stay share-matched.
        let size = (self.config.max_position_size / pricing.cost_per_share).floor();
        if size < Decimal::ONE {
            return Ok(None);
        }

        let candidate = ArbitrageCandidate {
            id: Uuid::new_v4(),
            game_key: a.game_key.clone(),
            legs: [
                Leg {
                    venue: pricing.buy_a.venue,
                    side: pricing.buy_a.side,
                    limit_price: pricing.buy_a.price,
                    max_shares: size,
                },
                Leg {
                    venue: pricing.buy_b.venue,
                    side: pricing.buy_b.side,
                    limit_price: pricing.buy_b.price,
                    max_shares: size,
                },
            ],
            expected_cost: pricing.cost_per_share * size,
            expected_profit: (PAYOUT - pricing.cost_per_share) * size,
            roi: pricing.roi,
            size_shares: size,
            evaluated_at: now,
        };
        debug!(
            game_key = %candidate.game_key,
            roi = %candidate.roi,
            size = %candidate.size_shares,
            expected_profit = %candidate.expected_profit,
            "opportunity found"
        );
        Ok(Some(candidate))
    }

    fn check_freshness(&self, quote: &VenueQuote, now: DateTime<Utc>) -> Result<(), EvaluateError> {
        let age = quote.age(now);
        let limit = chrono::Duration::from_std(self.config.quote_freshness)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));
        if age > limit {
            return Err(EvaluateError::StaleQuote {
                venue: quote.venue,
                age_ms: age.num_milliseconds(),
            });
        }
        Ok(())
    }

    /// Prices one leg assignment, or `None` when either side is not
    /// actually buyable (no ask, empty book, or a degenerate price).
    fn price_assignment(
        &self,
        a: &MarketSnapshot,
        side_a: Side,
        b: &MarketSnapshot,
        side_b: Side,
    ) -> Option<AssignmentPricing> {
        let buy_a = self.priced_leg(a, side_a)?;
        let buy_b = self.priced_leg(b, side_b)?;
        let cost_per_share = buy_a.cost + buy_b.cost;
        if cost_per_share >= PAYOUT {
            return None;
        }
        let profit = PAYOUT - cost_per_share;
        Some(AssignmentPricing {
            roi: profit / cost_per_share,
            cost_per_share,
            buy_a,
            buy_b,
        })
    }

    fn priced_leg(&self, snapshot: &MarketSnapshot, side: Side) -> Option<PricedLeg> {
        let quote = snapshot.quote(side);
        let price = quote.best_ask.trunc_with_scale(2);
        if price <= Decimal::ZERO || price >= PAYOUT || quote.ask_depth <= Decimal::ZERO {
            return None;
        }
        // Kalshi charges its taker fee as a fraction of traded notional.
        let fee = match snapshot.venue {
            VenueId::Kalshi => price * self.config.kalshi_taker_fee,
            VenueId::Polymarket => Decimal::ZERO,
        };
        Some(PricedLeg {
            venue: snapshot.venue,
            side,
            price,
            cost: price + fee,
        })
    }
}

struct AssignmentPricing {
    roi: Decimal,
    cost_per_share: Decimal,
    buy_a: PricedLeg,
    buy_b: PricedLeg,
}

struct PricedLeg {
    venue: VenueId,
    side: Side,
    price: Decimal,
    /// Price plus venue taker fee; what the hedge actually pays per share.
    cost: Decimal,
}

// =============================================================================
// Tests
// =============================================================================
