//! Venue abstraction: the narrow interface the coordinator needs.
//!
//! Live connectivity (auth, signing, HTTP/WS transport) lives behind this
//! trait and is out of scope here. Everything the core needs from a venue is
//! an orderbook snapshot, a taker order, and a balance figure. There is no
//! cancel call on purpose: every order in this design is immediate taker,
//! so there is never a resting order to cancel — rollback always means a
//! reversing trade.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use uuid::Uuid;

use sportsarb_core::types::{GameKey, Side, VenueId, VenueQuote};

// =============================================================================
// Errors
// =============================================================================

/// Venue-boundary failure. The coordinator absorbs these at the
/// leg-placement boundary and treats them as a leg rejection; they never
/// propagate mid-coordination.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("transport failure on {venue}: {message}")]
    Transport { venue: VenueId, message: String },

    #[error("{venue} lists no market for {game_key}")]
    UnknownMarket { venue: VenueId, game_key: GameKey },
}

// =============================================================================
// Orders
// =============================================================================

/// Buy opens a position, sell flattens one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderAction {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderAction::Buy => write!(f, "buy"),
            OrderAction::Sell => write!(f, "sell"),
        }
    }
}

/// A taker order: crosses the spread at up to `limit_price`, never rests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakerOrderRequest {
    pub game_key: GameKey,
    pub side: Side,
    pub action: OrderAction,
    pub limit_price: Decimal,
    pub shares: Decimal,
    /// Fill entirely at or better than the limit, or reject with no
    /// partial fill and no residual order.
    pub fill_or_kill: bool,
}

impl TakerOrderRequest {
    /// Fill-or-kill buy, the shape of every leg-1 order.
    #[must_use]
    pub fn buy_fok(game_key: GameKey, side: Side, limit_price: Decimal, shares: Decimal) -> Self {
        Self {
            game_key,
            side,
            action: OrderAction::Buy,
            limit_price,
            shares,
            fill_or_kill: true,
        }
    }

    /// Plain taker buy, the shape of the leg-2 order.
    #[must_use]
    pub fn buy(game_key: GameKey, side: Side, limit_price: Decimal, shares: Decimal) -> Self {
        Self {
            fill_or_kill: false,
            ..Self::buy_fok(game_key, side, limit_price, shares)
        }
    }

    /// Taker sell used to flatten a naked leg. Takes whatever fills.
    #[must_use]
    pub fn sell(game_key: GameKey, side: Side, limit_price: Decimal, shares: Decimal) -> Self {
        Self {
            game_key,
            side,
            action: OrderAction::Sell,
            limit_price,
            shares,
            fill_or_kill: false,
        }
    }

    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.limit_price * self.shares
    }
}

/// Terminal result of a taker order. Taker orders have no pending state:
/// by the time the venue answers, the order has either traded or died.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub order_id: String,
    pub filled_shares: Decimal,
    /// Volume-weighted fill price when any shares traded.
    pub avg_price: Option<Decimal>,
    pub error: Option<String>,
}

impl OrderOutcome {
    #[must_use]
    pub fn filled(order_id: impl Into<String>, shares: Decimal, price: Decimal) -> Self {
        Self {
            order_id: order_id.into(),
            filled_shares: shares,
            avg_price: Some(price),
            error: None,
        }
    }

    #[must_use]
    pub fn rejected(order_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            filled_shares: Decimal::ZERO,
            avg_price: None,
            error: Some(reason.into()),
        }
    }

    /// No shares traded at all.
    #[must_use]
    pub fn is_reject(&self) -> bool {
        self.filled_shares.is_zero()
    }

    /// Every requested share traded.
    #[must_use]
    pub fn is_full_fill(&self, requested: Decimal) -> bool {
        self.filled_shares == requested
    }
}

// =============================================================================
// Trait
// =============================================================================

/// One venue's trading surface.
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn venue(&self) -> VenueId;

    /// Top-of-book for one side, stamped with fetch time.
    async fn fetch_quote(&self, game_key: &GameKey, side: Side) -> Result<VenueQuote, VenueError>;

    /// Submits a taker order and waits for its terminal result.
    async fn place_taker_order(
        &self,
        request: TakerOrderRequest,
    ) -> Result<OrderOutcome, VenueError>;

    /// Available balance in dollars.
    async fn balance(&self) -> Result<Decimal, VenueError>;
}

// =============================================================================
// Paper venue
// =============================================================================

/// Scripted in-memory venue for tests and rehearsals.
///
/// Order outcomes are played back in push order; quotes are served from a
/// settable book. Every order request is logged so tests can assert exactly
/// what was submitted, in what order.
pub struct PaperVenue {
    venue: VenueId,
    quotes: Mutex<HashMap<(GameKey, Side), VenueQuote>>,
    script: Mutex<VecDeque<Result<OrderOutcome, VenueError>>>,
    orders: Mutex<Vec<TakerOrderRequest>>,
    balance: Mutex<Decimal>,
}

impl PaperVenue {
    #[must_use]
    pub fn new(venue: VenueId) -> Self {
        Self {
            venue,
            quotes: Mutex::new(HashMap::new()),
            script: Mutex::new(VecDeque::new()),
            orders: Mutex::new(Vec::new()),
            balance: Mutex::new(Decimal::new(1000, 0)),
        }
    }

    #[must_use]
    pub fn with_balance(self, balance: Decimal) -> Self {
        *self.balance.lock() = balance;
        self
    }

    /// Installs or replaces the book for one side.
    pub fn set_quote(&self, quote: VenueQuote) {
        self.quotes
            .lock()
            .insert((quote.game_key.clone(), quote.side), quote);
    }

    /// Next order fills completely at `price`.
    pub fn push_fill(&self, shares: Decimal, price: Decimal) {
        self.push_outcome(Ok(OrderOutcome::filled(
            Uuid::new_v4().to_string(),
            shares,
            price,
        )));
    }

    /// Next order partially fills. Only meaningful for non-FOK orders.
    pub fn push_partial(&self, filled_shares: Decimal, price: Decimal) {
        self.push_outcome(Ok(OrderOutcome {
            order_id: Uuid::new_v4().to_string(),
            filled_shares,
            avg_price: Some(price),
            error: None,
        }));
    }

    /// Next order is rejected with no fill.
    pub fn push_reject(&self, reason: &str) {
        self.push_outcome(Ok(OrderOutcome::rejected(
            Uuid::new_v4().to_string(),
            reason,
        )));
    }

    /// Next order fails at the transport layer.
    pub fn push_transport_error(&self, message: &str) {
        self.push_outcome(Err(VenueError::Transport {
            venue: self.venue,
            message: message.to_string(),
        }));
    }

    fn push_outcome(&self, outcome: Result<OrderOutcome, VenueError>) {
        self.script.lock().push_back(outcome);
    }

    /// Every order placed so far, in submission order.
    #[must_use]
    pub fn orders(&self) -> Vec<TakerOrderRequest> {
        self.orders.lock().clone()
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.lock().len()
    }
}

#[async_trait]
impl VenueClient for PaperVenue {
    fn venue(&self) -> VenueId {
        self.venue
    }

    async fn fetch_quote(&self, game_key: &GameKey, side: Side) -> Result<VenueQuote, VenueError> {
        let mut quote = self
            .quotes
            .lock()
            .get(&(game_key.clone(), side))
            .cloned()
            .ok_or_else(|| VenueError::UnknownMarket {
                venue: self.venue,
                game_key: game_key.clone(),
            })?;
        quote.fetched_at = Utc::now();
        Ok(quote)
    }

    async fn place_taker_order(
        &self,
        request: TakerOrderRequest,
    ) -> Result<OrderOutcome, VenueError> {
        self.orders.lock().push(request.clone());
        self.script.lock().pop_front().unwrap_or_else(|| {
            Ok(OrderOutcome::rejected(
                Uuid::new_v4().to_string(),
                "paper venue: no scripted outcome",
            ))
        })
    }

    async fn balance(&self) -> Result<Decimal, VenueError> {
        Ok(*self.balance.lock())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sportsarb_core::types::{MarketType, Sport};

    fn key() -> GameKey {
        GameKey::new(Sport::Nfl, "buf", "den", MarketType::Moneyline)
    }

    #[tokio::test]
    async fn plays_back_script_in_order() {
        let venue = PaperVenue::new(VenueId::Polymarket);
        venue.push_fill(dec!(2), dec!(0.45));
        venue.push_reject("insufficient liquidity");

        let first = venue
            .place_taker_order(TakerOrderRequest::buy_fok(
                key(),
                Side::Yes,
                dec!(0.45),
                dec!(2),
            ))
            .await
            .unwrap();
        assert!(first.is_full_fill(dec!(2)));

        let second = venue
            .place_taker_order(TakerOrderRequest::buy_fok(
                key(),
                Side::Yes,
                dec!(0.45),
                dec!(2),
            ))
            .await
            .unwrap();
        assert!(second.is_reject());
        assert_eq!(venue.order_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_rejects_instead_of_filling() {
        let venue = PaperVenue::new(VenueId::Kalshi);
        let outcome = venue
            .place_taker_order(TakerOrderRequest::buy_fok(
                key(),
                Side::No,
                dec!(0.50),
                dec!(1),
            ))
            .await
            .unwrap();
        assert!(outcome.is_reject());
    }

    #[tokio::test]
    async fn quotes_are_restamped_on_fetch() {
        let venue = PaperVenue::new(VenueId::Kalshi);
        venue.set_quote(VenueQuote {
            venue: VenueId::Kalshi,
            game_key: key(),
            side: Side::Yes,
            best_bid: dec!(0.43),
            best_ask: dec!(0.45),
            bid_depth: dec!(50),
            ask_depth: dec!(50),
            fetched_at: Utc::now() - chrono::Duration::hours(1),
        });

        let quote = venue.fetch_quote(&key(), Side::Yes).await.unwrap();
        assert!(quote.age(Utc::now()) < chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn unknown_market_is_an_error() {
        let venue = PaperVenue::new(VenueId::Kalshi);
        assert!(venue.fetch_quote(&key(), Side::Yes).await.is_err());
    }
}
