pub mod binance;
pub mod error;
pub mod exchange;
pub mod filters;
pub mod simulated;

pub use binance::{BinanceClient, BinanceConfig};
pub use error::{ExchangeError, ExchangeResult};
pub use exchange::{Balance, Exchange, Fill, OrderReport};
pub use filters::FilterCache;
pub use simulated::{SimulatedCall, SimulatedExchange};
