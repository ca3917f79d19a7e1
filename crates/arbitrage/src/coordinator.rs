//! Dual-leg execution coordinator: the core state machine.
//!
//! Two independent venues cannot settle atomically, so the coordinator
//! sequences the two legs to keep the unhedged window bounded and measured:
//!
//! ```text
//! Idle
//!  └─ Leg1Pending   submit leg 1, fill-or-kill
//!      ├─ reject  → Leg1Failed            (terminal, no position)
//!      └─ fill    → Leg2Pending           sized to leg 1's ACTUAL fill
//!          ├─ full fill → BothFilled      (terminal, profit locked)
//!          └─ reject/partial → Compensating
//!              ├─ reversal fills → Compensated          (loss, hedged)
//!              └─ otherwise      → CompensationFailed   (naked, halt)
//! ```
//!
//! Leg 1 goes to the venue whose taker orders are immediately final — a
//! true fill-or-kill with no partial ambiguity and no cancel round-trip —
//! so a failure there costs nothing. The slower venue goes second, where a
//! failure is fixable while holding a precisely known leg-1 position.
//! The legs are strictly sequential: leg 2 is not sized or submitted until
//! leg 1's terminal result is in hand. A rejected leg 1 is never retried
//! inside the cycle; the next poll reevaluates from fresh quotes.
//!
//! Every cycle ends in exactly one [`TradeRecord`], even when the venue
//! call itself fails — an unrecorded state between leg 1 and leg 2 is the
//! single worst failure mode this module exists to rule out.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use sportsarb_core::types::VenueId;

use crate::evaluator::{ArbitrageCandidate, Leg};
use crate::ledger::{LegRecord, OutcomeKind, TradeRecord};
use crate::venue::{TakerOrderRequest, VenueClient};

/// Flattening floor: when no bid is visible the reversal is offered at the
/// venue minimum so anything on the book can take it.
const FLATTEN_FLOOR: Decimal = dec!(0.01);

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The candidate's legs do not line up with the configured venue roles.
    /// Nothing was submitted.
    #[error("candidate {id} has no leg on {venue}")]
    MisroutedCandidate { id: Uuid, venue: VenueId },
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Kalshi taker fee as a fraction of traded notional, for realized PnL.
    pub kalshi_taker_fee: Decimal,
    /// Walk the full state machine in logs without submitting anything.
    pub dry_run: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            kalshi_taker_fee: dec!(0.02),
            dry_run: false,
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Drives one candidate through the state machine. One instance, one cycle
/// at a time; the engine never runs two executions concurrently.
pub struct DualLegCoordinator {
    leg1: Arc<dyn VenueClient>,
    leg2: Arc<dyn VenueClient>,
    config: CoordinatorConfig,
}

impl DualLegCoordinator {
    pub fn new(
        leg1: Arc<dyn VenueClient>,
        leg2: Arc<dyn VenueClient>,
        config: CoordinatorConfig,
    ) -> Self {
        Self { leg1, leg2, config }
    }

    /// Executes one candidate to a terminal, recorded state.
    ///
    /// # Errors
    ///
    /// Only [`ExecutionError::MisroutedCandidate`], raised before any order
    /// is submitted. Once leg 1 is in flight the function always returns a
    /// record; venue failures become leg rejections, never faults.
    pub async fn execute(
        &self,
        candidate: &ArbitrageCandidate,
    ) -> Result<TradeRecord, ExecutionError> {
        let leg1_plan = self.leg_plan(candidate, &self.leg1)?.clone();
        let leg2_plan = self.leg_plan(candidate, &self.leg2)?.clone();

        if self.config.dry_run {
            return Ok(self.dry_run_record(candidate, &leg1_plan, &leg2_plan));
        }

        let started = Instant::now();

        // ---- Leg 1: fill-or-kill on the immediately-final venue ----
        let leg1_request = TakerOrderRequest::buy_fok(
            candidate.game_key.clone(),
            leg1_plan.side,
            leg1_plan.limit_price,
            candidate.size_shares,
        );
        let leg1_record = self.place(&self.leg1, leg1_request).await;
        info!(
            venue = %leg1_record.venue,
            side = %leg1_record.side,
            price = %leg1_record.limit_price,
            requested = %leg1_record.requested_shares,
            filled = %leg1_record.filled_shares,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "leg 1 terminal"
        );

        if leg1_record.filled_shares.is_zero() {
            // No position exists. Terminal; the next poll cycle reevaluates.
            return Ok(finalize(
                candidate,
                OutcomeKind::Leg1Failed,
                vec![leg1_record],
                None,
                Decimal::ZERO,
            ));
        }

        // ---- Leg 2: sized to leg 1's actual fill, not the request ----
        let hedged_shares = leg1_record.filled_shares;
        let leg2_request = TakerOrderRequest::buy(
            candidate.game_key.clone(),
            leg2_plan.side,
            leg2_plan.limit_price,
            hedged_shares,
        );
        let leg2_record = self.place(&self.leg2, leg2_request).await;
        info!(
            venue = %leg2_record.venue,
            side = %leg2_record.side,
            price = %leg2_record.limit_price,
            requested = %leg2_record.requested_shares,
            filled = %leg2_record.filled_shares,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "leg 2 terminal"
        );

        if leg2_record.filled && leg2_record.filled_shares == hedged_shares {
            let profit = self.locked_profit(&leg1_record, &leg2_record, hedged_shares);
            info!(
                game_key = %candidate.game_key,
                shares = %hedged_shares,
                locked_profit = %profit,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "both legs filled"
            );
            return Ok(finalize(
                candidate,
                OutcomeKind::BothFilled,
                vec![leg1_record, leg2_record],
                None,
                profit,
            ));
        }

        // ---- Compensating: flatten leg 1 with a reversing taker sell ----
        warn!(
            game_key = %candidate.game_key,
            naked_shares = %hedged_shares,
            "leg 2 failed, compensating leg 1"
        );
        let compensation = self
            .flatten_leg1(candidate, &leg1_record, hedged_shares)
            .await;
        let flattened = compensation.filled_shares == hedged_shares;
        let pnl = self.compensation_pnl(&leg1_record, &leg2_record, &compensation);

        if flattened {
            info!(
                game_key = %candidate.game_key,
                recovered = %compensation.traded_notional(),
                realized_pnl = %pnl,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "leg 1 flattened"
            );
            Ok(finalize(
                candidate,
                OutcomeKind::Compensated,
                vec![leg1_record, leg2_record],
                Some(compensation),
                pnl,
            ))
        } else {
            error!(
                game_key = %candidate.game_key,
                naked_shares = %(hedged_shares - compensation.filled_shares),
                "compensation failed, naked position live"
            );
            Ok(finalize(
                candidate,
                OutcomeKind::CompensationFailed,
                vec![leg1_record, leg2_record],
                Some(compensation),
                pnl,
            ))
        }
    }

    fn leg_plan<'a>(
        &self,
        candidate: &'a ArbitrageCandidate,
        client: &Arc<dyn VenueClient>,
    ) -> Result<&'a Leg, ExecutionError> {
        candidate
            .leg_on(client.venue())
            .ok_or(ExecutionError::MisroutedCandidate {
                id: candidate.id,
                venue: client.venue(),
            })
    }

    /// Places one order, absorbing venue faults into a rejection record.
    async fn place(
        &self,
        client: &Arc<dyn VenueClient>,
        request: TakerOrderRequest,
    ) -> LegRecord {
        let venue = client.venue();
        match client.place_taker_order(request.clone()).await {
            Ok(outcome) => LegRecord::from_outcome(&request, venue, &outcome),
            Err(err) => {
                warn!(venue = %venue, error = %err, "order failed at venue boundary");
                LegRecord::from_error(&request, venue, err.to_string())
            }
        }
    }

    /// Submits exactly one reversing sell for leg 1's filled size at the
    /// prevailing best bid. Flattening, not profit: slippage is accepted,
    /// and with no visible bid the order goes out at the venue floor.
    async fn flatten_leg1(
        &self,
        candidate: &ArbitrageCandidate,
        leg1: &LegRecord,
        shares: Decimal,
    ) -> LegRecord {
        let price = match self.leg1.fetch_quote(&candidate.game_key, leg1.side).await {
            Ok(quote) if quote.best_bid > Decimal::ZERO => quote.best_bid,
            Ok(_) => FLATTEN_FLOOR,
            Err(err) => {
                warn!(venue = %leg1.venue, error = %err, "no quote for reversal, using floor");
                FLATTEN_FLOOR
            }
        };
        let request =
            TakerOrderRequest::sell(candidate.game_key.clone(), leg1.side, price, shares);
        self.place(&self.leg1, request).await
    }

    /// Realized PnL when both legs filled size-matched, from actual fill
    /// prices rather than the evaluated limits.
    fn locked_profit(&self, leg1: &LegRecord, leg2: &LegRecord, shares: Decimal) -> Decimal {
        let cost = leg1.traded_notional() + leg2.traded_notional() + self.fees(leg1, leg2);
        shares - cost
    }

    /// Realized PnL of a compensation cycle: whatever the reversal
    /// recovered, minus everything both legs paid. Any shares the partial
    /// leg 2 or a failed reversal left behind are valued at zero — the
    /// record must never flatter an open exposure.
    fn compensation_pnl(
        &self,
        leg1: &LegRecord,
        leg2: &LegRecord,
        compensation: &LegRecord,
    ) -> Decimal {
        compensation.traded_notional()
            - leg1.traded_notional()
            - leg2.traded_notional()
            - self.fees(leg1, leg2)
    }

    fn fees(&self, leg1: &LegRecord, leg2: &LegRecord) -> Decimal {
        [leg1, leg2]
            .iter()
            .filter(|leg| leg.venue == VenueId::Kalshi)
            .map(|leg| self.config.kalshi_taker_fee * leg.traded_notional())
            .sum()
    }

    fn dry_run_record(
        &self,
        candidate: &ArbitrageCandidate,
        leg1: &Leg,
        leg2: &Leg,
    ) -> TradeRecord {
        info!(
            game_key = %candidate.game_key,
            size = %candidate.size_shares,
            expected_profit = %candidate.expected_profit,
            roi = %candidate.roi,
            "dry run: would execute"
        );
        let planned = |leg: &Leg| LegRecord {
            venue: leg.venue,
            side: leg.side,
            action: crate::venue::OrderAction::Buy,
            limit_price: leg.limit_price,
            requested_shares: candidate.size_shares,
            filled: false,
            filled_shares: Decimal::ZERO,
            avg_price: None,
            error: None,
        };
        TradeRecord {
            id: candidate.id,
            timestamp: chrono::Utc::now(),
            game_key: candidate.game_key.clone(),
            outcome: OutcomeKind::DryRun,
            legs: vec![planned(leg1), planned(leg2)],
            compensation: None,
            both_legs_filled: false,
            success: true,
            naked: false,
            locked_profit: Decimal::ZERO,
            dry_run: true,
        }
    }
}

fn finalize(
    candidate: &ArbitrageCandidate,
    outcome: OutcomeKind,
    legs: Vec<LegRecord>,
    compensation: Option<LegRecord>,
    locked_profit: Decimal,
) -> TradeRecord {
    TradeRecord {
        id: candidate.id,
        timestamp: chrono::Utc::now(),
        game_key: candidate.game_key.clone(),
        outcome,
        legs,
        compensation,
        both_legs_filled: outcome.is_success(),
        success: outcome.is_success(),
        naked: outcome.is_naked(),
        locked_profit,
        dry_run: false,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sportsarb_core::types::{GameKey, MarketType, Side, Sport, VenueQuote};

    use crate::venue::{OrderAction, PaperVenue};

    fn key() -> GameKey {
        GameKey::new(Sport::Nfl, "buf", "den", MarketType::Moneyline)
    }

    /// Polymarket no @ 0.50 (leg 1) + Kalshi yes @ 0.45 (leg 2), 2 shares.
    fn candidate() -> ArbitrageCandidate {
        let size = dec!(2);
        ArbitrageCandidate {
            id: Uuid::new_v4(),
            game_key: key(),
            legs: [
                Leg {
                    venue: VenueId::Polymarket,
                    side: Side::No,
                    limit_price: dec!(0.50),
                    max_shares: size,
                },
                Leg {
                    venue: VenueId::Kalshi,
                    side: Side::Yes,
                    limit_price: dec!(0.45),
                    max_shares: size,
                },
            ],
            expected_cost: dec!(1.90),
            expected_profit: dec!(0.10),
            roi: dec!(0.0526),
            size_shares: size,
            evaluated_at: Utc::now(),
        }
    }

    fn coordinator(
        leg1: Arc<PaperVenue>,
        leg2: Arc<PaperVenue>,
        fee: Decimal,
    ) -> DualLegCoordinator {
        DualLegCoordinator::new(
            leg1,
            leg2,
            CoordinatorConfig {
                kalshi_taker_fee: fee,
                dry_run: false,
            },
        )
    }

    fn bid_quote(venue: VenueId, side: Side, bid: Decimal) -> VenueQuote {
        VenueQuote {
            venue,
            game_key: key(),
            side,
            best_bid: bid,
            best_ask: bid + dec!(0.02),
            bid_depth: dec!(100),
            ask_depth: dec!(100),
            fetched_at: Utc::now(),
        }
    }

    // ==================== Happy path ====================

    #[tokio::test]
    async fn both_legs_fill_locks_profit() {
        let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
        let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
        poly.push_fill(dec!(2), dec!(0.50));
        kalshi.push_fill(dec!(2), dec!(0.45));

        let record = coordinator(poly.clone(), kalshi.clone(), Decimal::ZERO)
            .execute(&candidate())
            .await
            .unwrap();

        assert_eq!(record.outcome, OutcomeKind::BothFilled);
        assert!(record.both_legs_filled);
        assert!(record.success);
        assert!(!record.naked);
        // 2 shares pay 2.00, cost 2*(0.50+0.45) = 1.90.
        assert_eq!(record.locked_profit, dec!(0.10));
        assert_eq!(poly.order_count(), 1);
        assert_eq!(kalshi.order_count(), 1);
    }

    #[tokio::test]
    async fn leg_one_is_fok_and_leg_two_is_not() {
        let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
        let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
        poly.push_fill(dec!(2), dec!(0.50));
        kalshi.push_fill(dec!(2), dec!(0.45));

        coordinator(poly.clone(), kalshi.clone(), Decimal::ZERO)
            .execute(&candidate())
            .await
            .unwrap();

        assert!(poly.orders()[0].fill_or_kill);
        assert!(!kalshi.orders()[0].fill_or_kill);
        assert_eq!(kalshi.orders()[0].action, OrderAction::Buy);
    }

    #[tokio::test]
    async fn locked_profit_uses_actual_fill_prices_and_fees() {
        let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
        let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
        // Leg 2 fills a cent better than its limit.
        poly.push_fill(dec!(2), dec!(0.50));
        kalshi.push_fill(dec!(2), dec!(0.44));

        let record = coordinator(poly, kalshi, dec!(0.02))
            .execute(&candidate())
            .await
            .unwrap();

        // 2.00 payout − 2*(0.50+0.44) − 2% of the 0.88 Kalshi notional = 0.1024.
        assert_eq!(record.locked_profit, dec!(0.1024));
    }

    // ==================== Leg 1 failure ====================

    #[tokio::test]
    async fn leg_one_reject_never_touches_leg_two() {
        let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
        let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
        poly.push_reject("FOK could not fill");

        let record = coordinator(poly.clone(), kalshi.clone(), Decimal::ZERO)
            .execute(&candidate())
            .await
            .unwrap();

        assert_eq!(record.outcome, OutcomeKind::Leg1Failed);
        assert!(!record.both_legs_filled);
        assert!(!record.success);
        assert!(!record.naked);
        assert_eq!(record.locked_profit, Decimal::ZERO);
        // One leg-1 attempt, nothing else: no retry, no leg 2.
        assert_eq!(poly.order_count(), 1);
        assert_eq!(kalshi.order_count(), 0);
    }

    #[tokio::test]
    async fn leg_one_transport_failure_is_a_rejection_not_a_fault() {
        let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
        let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
        poly.push_transport_error("connection reset");

        let record = coordinator(poly, kalshi.clone(), Decimal::ZERO)
            .execute(&candidate())
            .await
            .unwrap();

        assert_eq!(record.outcome, OutcomeKind::Leg1Failed);
        assert!(record.legs[0].error.is_some());
        assert_eq!(kalshi.order_count(), 0);
    }

    // ==================== Leg 2 sizing ====================

    #[tokio::test]
    async fn leg_two_is_sized_to_leg_one_actual_fill() {
        let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
        let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
        // Venue variant that reports a partial on the first leg.
        poly.push_partial(dec!(1), dec!(0.50));
        kalshi.push_fill(dec!(1), dec!(0.45));

        let record = coordinator(poly, kalshi.clone(), Decimal::ZERO)
            .execute(&candidate())
            .await
            .unwrap();

        assert_eq!(kalshi.orders()[0].shares, dec!(1));
        assert_eq!(record.outcome, OutcomeKind::BothFilled);
        assert_eq!(record.locked_profit, dec!(0.05));
    }

    // ==================== Compensation ====================

    #[tokio::test]
    async fn leg_two_reject_triggers_exactly_one_reversal() {
        let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
        let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
        poly.set_quote(bid_quote(VenueId::Polymarket, Side::No, dec!(0.48)));
        poly.push_fill(dec!(2), dec!(0.50));
        kalshi.push_reject("insufficient balance");
        poly.push_fill(dec!(2), dec!(0.48)); // the reversal

        let record = coordinator(poly.clone(), kalshi, Decimal::ZERO)
            .execute(&candidate())
            .await
            .unwrap();

        assert_eq!(record.outcome, OutcomeKind::Compensated);
        assert!(!record.naked);
        assert!(!record.success);
        assert!(!record.both_legs_filled);
        // Entry 1.00 back out at 0.96: four cents of slippage, no hedge.
        assert_eq!(record.locked_profit, dec!(-0.04));

        let orders = poly.orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1].action, OrderAction::Sell);
        assert_eq!(orders[1].shares, dec!(2));
        assert_eq!(orders[1].side, Side::No);
        assert_eq!(orders[1].limit_price, dec!(0.48));
    }

    #[tokio::test]
    async fn reversal_is_sized_to_actual_fill_not_request() {
        let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
        let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
        poly.set_quote(bid_quote(VenueId::Polymarket, Side::No, dec!(0.48)));
        // Leg 1 fills 1 of the requested 2.
        poly.push_partial(dec!(1), dec!(0.50));
        kalshi.push_reject("no liquidity");
        poly.push_fill(dec!(1), dec!(0.48));

        let record = coordinator(poly.clone(), kalshi, Decimal::ZERO)
            .execute(&candidate())
            .await
            .unwrap();

        assert_eq!(record.outcome, OutcomeKind::Compensated);
        assert_eq!(poly.orders()[1].shares, dec!(1));
    }

    #[tokio::test]
    async fn failed_reversal_is_a_naked_position() {
        let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
        let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
        poly.set_quote(bid_quote(VenueId::Polymarket, Side::No, dec!(0.48)));
        poly.push_fill(dec!(2), dec!(0.50));
        kalshi.push_reject("halted market");
        poly.push_reject("no bids"); // reversal dies too

        let record = coordinator(poly, kalshi, Decimal::ZERO)
            .execute(&candidate())
            .await
            .unwrap();

        assert_eq!(record.outcome, OutcomeKind::CompensationFailed);
        assert!(record.naked);
        assert!(!record.success);
        assert!(!record.both_legs_filled);
        // Worst case: the whole entry is marked against PnL.
        assert_eq!(record.locked_profit, dec!(-1.00));
    }

    #[tokio::test]
    async fn partial_reversal_is_still_naked() {
        let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
        let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
        poly.set_quote(bid_quote(VenueId::Polymarket, Side::No, dec!(0.48)));
        poly.push_fill(dec!(2), dec!(0.50));
        kalshi.push_reject("rejected");
        poly.push_partial(dec!(1), dec!(0.48));

        let record = coordinator(poly, kalshi, Decimal::ZERO)
            .execute(&candidate())
            .await
            .unwrap();

        assert_eq!(record.outcome, OutcomeKind::CompensationFailed);
        assert!(record.naked);
    }

    #[tokio::test]
    async fn reversal_falls_back_to_floor_without_a_quote() {
        let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
        let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
        // No quote installed: fetch fails, reversal must still go out.
        poly.push_fill(dec!(2), dec!(0.50));
        kalshi.push_reject("rejected");
        poly.push_fill(dec!(2), dec!(0.01));

        let record = coordinator(poly.clone(), kalshi, Decimal::ZERO)
            .execute(&candidate())
            .await
            .unwrap();

        assert_eq!(record.outcome, OutcomeKind::Compensated);
        assert_eq!(poly.orders()[1].limit_price, dec!(0.01));
    }

    // ==================== Dry run ====================

    #[tokio::test]
    async fn dry_run_places_no_orders() {
        let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
        let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
        let coordinator = DualLegCoordinator::new(
            poly.clone(),
            kalshi.clone(),
            CoordinatorConfig {
                kalshi_taker_fee: dec!(0.02),
                dry_run: true,
            },
        );

        let record = coordinator.execute(&candidate()).await.unwrap();
        assert_eq!(record.outcome, OutcomeKind::DryRun);
        assert!(record.dry_run);
        assert_eq!(poly.order_count(), 0);
        assert_eq!(kalshi.order_count(), 0);
    }

    // ==================== Routing ====================

    #[tokio::test]
    async fn misrouted_candidate_is_refused_before_any_order() {
        let poly = Arc::new(PaperVenue::new(VenueId::Polymarket));
        let kalshi = Arc::new(PaperVenue::new(VenueId::Kalshi));
        let coordinator = coordinator(poly.clone(), kalshi.clone(), Decimal::ZERO);

        // Candidate with both legs on one venue: the leg-2 role has no leg.
        let mut bad = candidate();
        bad.legs[1].venue = VenueId::Polymarket;

        let err = coordinator.execute(&bad).await.unwrap_err();
        assert!(matches!(err, ExecutionError::MisroutedCandidate { .. }));
        assert_eq!(poly.order_count(), 0);
        assert_eq!(kalshi.order_count(), 0);
    }
}
