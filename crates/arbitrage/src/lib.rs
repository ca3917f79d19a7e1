//! Cross-venue sports arbitrage: matching, evaluation, and dual-leg
//! execution between Kalshi and Polymarket.
//!
//! The pipeline runs strictly in sequence per matched game:
//!
//! ```text
//!   normalizer ──► evaluator ──► gate ──► governor ──► coordinator
//!       │              │           │          │             │
//!   GameKey        candidate    clamped    approval    TradeRecord
//!                                                          │
//!                                                       ledger
//! ```
//!
//! Everything downstream of evaluation is built around one promise: a
//! cycle never ends with an unhedged position the ledger does not know
//! about. The coordinator reaches a terminal outcome for every execution,
//! the ledger makes that outcome durable before the next cycle, and the
//! governor refuses to trade over a ledger that still holds an unresolved
//! naked record.

pub mod coordinator;
pub mod engine;
pub mod evaluator;
pub mod gate;
pub mod governor;
pub mod ledger;
pub mod normalizer;
pub mod venue;

pub use coordinator::{CoordinatorConfig, DualLegCoordinator, ExecutionError};
pub use engine::{CycleSummary, Discovery, StaticDiscovery, TradingEngine};
pub use evaluator::{
    ArbitrageCandidate, EvaluateError, EvaluatorConfig, Leg, MarketSnapshot, OpportunityEvaluator,
};
pub use gate::{GateConfig, GateError, LiquidityGate};
pub use governor::{GovernorConfig, GovernorError, Refusal, SafetyGovernor};
pub use ledger::{
    LedgerEntry, LedgerError, LegRecord, OutcomeKind, ResolutionRecord, TradeLedger, TradeRecord,
    TradingState, TradingStateStore,
};
pub use normalizer::{AliasTable, MarketNormalizer, NormalizeError, NormalizedMarket};
pub use venue::{OrderAction, OrderOutcome, PaperVenue, TakerOrderRequest, VenueClient, VenueError};
