// Signal detection module
pub mod band_reentry;

pub use band_reentry::{BandReentryConfig, BandReentryStrategy};

use crate::models::Candle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entry signal with the band context needed for sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub symbol: String,
    /// Close of the trigger candle
    pub entry_price: f64,
    pub band_mean: f64,
    pub band_std_dev: f64,
    /// Take-profit target before tick rounding
    pub take_profit_reference: f64,
    pub candle_time: DateTime<Utc>,
}

/// Base trait for entry strategies
///
/// Implementations are stateless: every call recomputes from the candles it is
/// given, so repeated polling inside one candle yields the same answer.
pub trait Strategy: Send + Sync {
    /// Evaluate closed candles (oldest first) and return an entry signal if one fires
    fn detect(&self, candles: &[Candle]) -> Option<EntrySignal>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}
