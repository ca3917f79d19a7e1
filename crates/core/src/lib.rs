pub mod config;
pub mod config_loader;
pub mod types;

pub use config::{AppConfig, LedgerConfig, TradingConfig, VenueRoleConfig};
pub use config_loader::ConfigLoader;
pub use types::{GameKey, MarketType, Side, Sport, VenueId, VenueQuote};
