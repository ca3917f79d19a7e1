//! Liquidity gate: caps a candidate's size to a fraction of visible depth.
//!
//! Depth figures are a snapshot that may be stale or shared with other
//! takers by the time the orders land, so one trade is never allowed to
//! consume the whole visible book. The clamp applies independently per
//! venue and the stricter bound wins; a candidate that clamps below the
//! minimum tradeable size on either venue is rejected outright.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use sportsarb_core::types::{VenueId, VenueQuote};

use crate::evaluator::ArbitrageCandidate;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum GateError {
    /// The clamped size is too small to trade on one of the venues.
    /// Non-fatal: the candidate is dropped, nothing was placed.
    #[error("insufficient liquidity on {venue}: {reason}")]
    InsufficientLiquidity { venue: VenueId, reason: String },

    /// The quotes handed in do not match the candidate's legs.
    #[error("quote/candidate mismatch: {0}")]
    MismatchedQuotes(String),
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Fraction of visible ask depth one trade may consume (0.07 = 7%).
    pub liquidity_fraction: Decimal,
    /// Minimum notional per order on the fractional-shares venue.
    pub min_notional: Decimal,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            liquidity_fraction: dec!(0.07),
            min_notional: dec!(1.00),
        }
    }
}

impl GateConfig {
    #[must_use]
    pub fn with_liquidity_fraction(mut self, fraction: Decimal) -> Self {
        self.liquidity_fraction = fraction;
        self
    }
}

// =============================================================================
// Gate
// =============================================================================

/// Minimum tradeable size: one whole contract on the integer venue.
const MIN_TRADE_UNIT: Decimal = Decimal::ONE;

#[derive(Debug, Clone)]
pub struct LiquidityGate {
    config: GateConfig,
}

impl LiquidityGate {
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Clamps the candidate's size against both venues' visible depth.
    ///
    /// `quote_a` and `quote_b` must be the ask-side quotes the candidate's
    /// legs were priced from, one per venue. The returned candidate has its
    /// size, cost, profit, and roi re-derived for the clamped size; prices
    /// are untouched.
    ///
    /// # Errors
    ///
    /// [`GateError::InsufficientLiquidity`] when the clamped size falls
    /// below the minimum tradeable unit or notional on either venue;
    /// [`GateError::MismatchedQuotes`] when the quotes do not correspond to
    /// the candidate's legs.
    pub fn clamp(
        &self,
        candidate: &ArbitrageCandidate,
        quote_a: &VenueQuote,
        quote_b: &VenueQuote,
    ) -> Result<ArbitrageCandidate, GateError> {
        if quote_a.venue == quote_b.venue {
            return Err(GateError::MismatchedQuotes(format!(
                "both quotes from {}",
                quote_a.venue
            )));
        }
        let mut size = candidate.size_shares;
        for quote in [quote_a, quote_b] {
            let leg = candidate.leg_on(quote.venue).ok_or_else(|| {
                GateError::MismatchedQuotes(format!("candidate has no leg on {}", quote.venue))
            })?;
            if leg.side != quote.side || candidate.game_key != quote.game_key {
                return Err(GateError::MismatchedQuotes(format!(
                    "quote for {}/{} does not match leg",
                    quote.venue, quote.side
                )));
            }
            // Whole shares only: both legs stay matched to the integer
            // venue's unit.
            let cap = (quote.ask_depth * self.config.liquidity_fraction).floor();
            size = size.min(cap);
        }

        if size < MIN_TRADE_UNIT {
            let thinner = if quote_a.ask_depth <= quote_b.ask_depth {
                quote_a
            } else {
                quote_b
            };
            return Err(GateError::InsufficientLiquidity {
                venue: thinner.venue,
                reason: format!(
                    "clamped size {size} below minimum unit (depth {}, fraction {})",
                    thinner.ask_depth, self.config.liquidity_fraction
                ),
            });
        }

        for leg in &candidate.legs {
            if leg.venue == VenueId::Polymarket && leg.limit_price * size < self.config.min_notional
            {
                return Err(GateError::InsufficientLiquidity {
                    venue: leg.venue,
                    reason: format!(
                        "notional {} below venue minimum {}",
                        leg.limit_price * size,
                        self.config.min_notional
                    ),
                });
            }
        }

        let clamped = candidate.resized(size, candidate.cost_per_share());
        if clamped.size_shares < candidate.size_shares {
            debug!(
                game_key = %candidate.game_key,
                requested = %candidate.size_shares,
                clamped = %clamped.size_shares,
                "liquidity clamp applied"
            );
        }
        Ok(clamped)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{EvaluatorConfig, MarketSnapshot, OpportunityEvaluator};
    use chrono::Utc;
    use sportsarb_core::types::{GameKey, MarketType, Side, Sport};

    fn key() -> GameKey {
        GameKey::new(Sport::Nfl, "buf", "den", MarketType::Moneyline)
    }

    fn quote(venue: VenueId, side: Side, ask: Decimal, depth: Decimal) -> VenueQuote {
        VenueQuote {
            venue,
            game_key: key(),
            side,
            best_bid: ask - dec!(0.02),
            best_ask: ask,
            bid_depth: depth,
            ask_depth: depth,
            fetched_at: Utc::now(),
        }
    }

    /// Candidate with Kalshi yes at 0.45 and Polymarket no at 0.50, sized to
    /// capital, fee-free so the numbers stay readable.
    fn candidate(max_position: Decimal, kalshi_depth: Decimal, poly_depth: Decimal) -> (ArbitrageCandidate, VenueQuote, VenueQuote) {
        let evaluator = OpportunityEvaluator::new(
            EvaluatorConfig::default()
                .with_kalshi_taker_fee(Decimal::ZERO)
                .with_max_position_size(max_position),
        );
        let kalshi_yes = quote(VenueId::Kalshi, Side::Yes, dec!(0.45), kalshi_depth);
        let poly_no = quote(VenueId::Polymarket, Side::No, dec!(0.50), poly_depth);
        let kalshi = MarketSnapshot::new(
            kalshi_yes.clone(),
            quote(VenueId::Kalshi, Side::No, dec!(0.60), kalshi_depth),
        )
        .unwrap();
        let poly = MarketSnapshot::new(
            quote(VenueId::Polymarket, Side::Yes, dec!(0.60), poly_depth),
            poly_no.clone(),
        )
        .unwrap();
        let candidate = evaluator.evaluate(&kalshi, &poly).unwrap().unwrap();
        (candidate, kalshi_yes, poly_no)
    }

    // ==================== Clamping ====================

    #[test]
    fn seven_percent_of_a_hundred_is_seven() {
        let gate = LiquidityGate::new(GateConfig::default());
        let (candidate, kalshi, poly) = candidate(dec!(100), dec!(100), dec!(500));

        let clamped = gate.clamp(&candidate, &kalshi, &poly).unwrap();
        assert_eq!(clamped.size_shares, dec!(7));
    }

    #[test]
    fn thinner_book_governs() {
        let gate = LiquidityGate::new(GateConfig::default());
        // depths 50 and 30 at 7%: caps 3.5→3 and 2.1→2; the min wins.
        let (candidate, kalshi, poly) = candidate(dec!(100), dec!(50), dec!(30));

        let clamped = gate.clamp(&candidate, &kalshi, &poly).unwrap();
        assert_eq!(clamped.size_shares, dec!(2));
        assert_eq!(clamped.expected_cost, dec!(1.90));
        assert_eq!(clamped.expected_profit, dec!(0.10));
        assert!(clamped.legs.iter().all(|leg| leg.max_shares == dec!(2)));
    }

    #[test]
    fn never_exceeds_depth_fraction_on_either_venue() {
        let gate = LiquidityGate::new(GateConfig::default().with_liquidity_fraction(dec!(0.30)));
        let (candidate, kalshi, poly) = candidate(dec!(1000), dec!(40), dec!(90));

        let clamped = gate.clamp(&candidate, &kalshi, &poly).unwrap();
        assert!(clamped.size_shares <= kalshi.ask_depth * dec!(0.30));
        assert!(clamped.size_shares <= poly.ask_depth * dec!(0.30));
    }

    #[test]
    fn small_candidate_passes_untouched() {
        let gate = LiquidityGate::new(GateConfig::default());
        let (candidate, kalshi, poly) = candidate(dec!(3.00), dec!(1000), dec!(1000));

        let clamped = gate.clamp(&candidate, &kalshi, &poly).unwrap();
        assert_eq!(clamped.size_shares, candidate.size_shares);
        assert_eq!(clamped.expected_cost, candidate.expected_cost);
    }

    // ==================== Rejection ====================

    #[test]
    fn rejects_when_clamp_hits_zero() {
        let gate = LiquidityGate::new(GateConfig::default());
        // 7% of depth 10 is 0.7, floored to 0.
        let (candidate, kalshi, poly) = candidate(dec!(100), dec!(10), dec!(500));

        let err = gate.clamp(&candidate, &kalshi, &poly).unwrap_err();
        assert!(matches!(
            err,
            GateError::InsufficientLiquidity {
                venue: VenueId::Kalshi,
                ..
            }
        ));
    }

    #[test]
    fn rejects_below_polymarket_min_notional() {
        let gate = LiquidityGate::new(GateConfig::default());
        // Clamps to 1 share; the Polymarket leg's notional is 0.50 < $1.
        let (candidate, kalshi, poly) = candidate(dec!(100), dec!(20), dec!(500));

        let err = gate.clamp(&candidate, &kalshi, &poly).unwrap_err();
        assert!(matches!(
            err,
            GateError::InsufficientLiquidity {
                venue: VenueId::Polymarket,
                ..
            }
        ));
    }

    #[test]
    fn rejects_mismatched_quotes() {
        let gate = LiquidityGate::new(GateConfig::default());
        let (candidate, kalshi, _) = candidate(dec!(100), dec!(100), dec!(100));
        // Same venue twice instead of one quote per leg venue.
        let err = gate.clamp(&candidate, &kalshi, &kalshi).unwrap_err();
        assert!(matches!(err, GateError::MismatchedQuotes(_)));
    }
}
