//! Domain types shared across the arbitrage workspace.
//!
//! The central type is [`GameKey`]: a venue-independent identity for one
//! tradeable market on one real-world game. Both venues' native identifiers
//! must normalize to byte-equal `GameKey`s before any cross-venue comparison
//! is allowed, because every downstream safety argument rests on the two
//! legs referencing the same event.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Venues
// =============================================================================

/// Trading venue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueId {
    /// Kalshi (CFTC-regulated event exchange, integer contracts, taker fee).
    Kalshi,
    /// Polymarket (CLOB, fractional shares, minimum notional per order).
    Polymarket,
}

impl VenueId {
    /// The other venue of the pair.
    #[must_use]
    pub fn other(&self) -> Self {
        match self {
            VenueId::Kalshi => VenueId::Polymarket,
            VenueId::Polymarket => VenueId::Kalshi,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueId::Kalshi => "kalshi",
            VenueId::Polymarket => "polymarket",
        }
    }
}

impl std::fmt::Display for VenueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Game identity
// =============================================================================

/// Sport league the game belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Nfl,
    Nba,
    /// College basketball (Kalshi series `CBB`, Polymarket slug prefix `cbb`).
    Cbb,
}

impl Sport {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::Nfl => "nfl",
            Sport::Nba => "nba",
            Sport::Cbb => "cbb",
        }
    }

    /// Parses a lowercase league token as it appears in slugs and tickers.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "nfl" => Some(Sport::Nfl),
            "nba" => Some(Sport::Nba),
            "cbb" | "ncaab" => Some(Sport::Cbb),
            _ => None,
        }
    }
}

impl std::fmt::Display for Sport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Market type within a game.
///
/// Spread and total carry their line, because a 3.5-point spread and a
/// 7.5-point spread on the same game are different markets that must never
/// be hedged against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MarketType {
    /// Which team wins outright.
    Moneyline,
    /// Does participant A cover the line.
    Spread {
        #[serde(with = "rust_decimal::serde::str")]
        line: Decimal,
    },
    /// Does the combined score exceed the line.
    Total {
        #[serde(with = "rust_decimal::serde::str")]
        line: Decimal,
    },
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketType::Moneyline => write!(f, "moneyline"),
            MarketType::Spread { line } => write!(f, "spread({line})"),
            MarketType::Total { line } => write!(f, "total({line})"),
        }
    }
}

/// Canonical, venue-independent identity of one market on one game.
///
/// Participants are canonical short codes held in alphabetical order, so the
/// same game produces the same key regardless of which venue listed which
/// team first. The key's canonical claim (what [`Side::Yes`] asserts) is:
/// moneyline — participant A wins; spread — participant A covers;
/// total — the game goes over the line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameKey {
    pub sport: Sport,
    /// First participant code, alphabetically.
    pub participant_a: String,
    /// Second participant code, alphabetically.
    pub participant_b: String,
    pub market: MarketType,
}

impl GameKey {
    /// Builds a key, sorting the two participant codes so ordering at the
    /// call site never matters.
    #[must_use]
    pub fn new(
        sport: Sport,
        first: impl Into<String>,
        second: impl Into<String>,
        market: MarketType,
    ) -> Self {
        let (mut a, mut b) = (first.into(), second.into());
        if a > b {
            std::mem::swap(&mut a, &mut b);
        }
        Self {
            sport,
            participant_a: a,
            participant_b: b,
            market,
        }
    }

    /// True if `code` is one of this game's participants.
    #[must_use]
    pub fn has_participant(&self, code: &str) -> bool {
        self.participant_a == code || self.participant_b == code
    }

    /// The side asserting that `code` wins/covers, if `code` is a
    /// participant and the market is participant-directional.
    #[must_use]
    pub fn side_for(&self, code: &str) -> Option<Side> {
        match self.market {
            MarketType::Total { .. } => None,
            _ if self.participant_a == code => Some(Side::Yes),
            _ if self.participant_b == code => Some(Side::No),
            _ => None,
        }
    }
}

impl std::fmt::Display for GameKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.sport, self.participant_a, self.participant_b, self.market
        )
    }
}

// =============================================================================
// Sides
// =============================================================================

/// One of the two complementary outcomes of a game key's canonical claim.
///
/// Exactly one of Yes/No pays out 1.00 at resolution; holding both locks a
/// fixed payout, which is what the whole strategy trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// The complementary side.
    #[must_use]
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Quotes
// =============================================================================

/// Top-of-book snapshot for one side on one venue.
///
/// Ephemeral: rebuilt every poll cycle, never persisted. `fetched_at` feeds
/// the evaluator's staleness check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueQuote {
    pub venue: VenueId,
    pub game_key: GameKey,
    pub side: Side,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    /// Shares visible at the best bid.
    pub bid_depth: Decimal,
    /// Shares visible at the best ask.
    pub ask_depth: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl VenueQuote {
    /// Age of this quote relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.fetched_at
    }
}

// =============================================================================
// Tests
// =============================================================================
