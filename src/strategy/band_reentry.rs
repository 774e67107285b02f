use crate::indicators::{calculate_bollinger_series, Band};
use crate::models::Candle;
use crate::strategy::{EntrySignal, Strategy};
use serde::{Deserialize, Serialize};

/// Bollinger band re-entry strategy
///
/// Looks at the three most recent closed candles C3 (oldest), C2, C1 (newest),
/// each judged against the band computed at its own index:
/// - C3 closed below its lower band (capitulation)
/// - C2 closed back above its lower band, as a green candle
///
/// C1 is the entry trigger. The take-profit reference sits half a standard
/// deviation under the mean of the C1-aligned band.
#[derive(Debug, Clone)]
pub struct BandReentryStrategy {
    config: BandReentryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandReentryConfig {
    /// Rolling window length
    pub period: usize,

    /// Band width in standard deviations
    pub k: f64,

    /// Standard deviations below the mean for the take-profit reference
    pub tp_std_factor: f64,
}

impl Default for BandReentryConfig {
    fn default() -> Self {
        Self {
            period: 20,
            k: 2.0,
            tp_std_factor: 0.5,
        }
    }
}

impl BandReentryStrategy {
    pub fn new(config: BandReentryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BandReentryConfig {
        &self.config
    }
}

impl Default for BandReentryStrategy {
    fn default() -> Self {
        Self::new(BandReentryConfig::default())
    }
}

/// "Closed outside, closed back inside" check on C3 and C2 with their own bands
pub fn is_reentry(c3: &Candle, band3: &Band, c2: &Candle, band2: &Band) -> bool {
    c3.close < band3.lower && c2.close > band2.lower && c2.close > c2.open
}

impl Strategy for BandReentryStrategy {
    fn detect(&self, candles: &[Candle]) -> Option<EntrySignal> {
        if candles.len() < self.min_candles_required() {
            tracing::debug!(
                "Need at least {} candles for band re-entry, got {}",
                self.min_candles_required(),
                candles.len()
            );
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let bands = calculate_bollinger_series(&closes, self.config.period, self.config.k);

        let n = candles.len();
        let (c3, c2, c1) = (&candles[n - 3], &candles[n - 2], &candles[n - 1]);
        let (band3, band2, band1) = match (bands[n - 3], bands[n - 2], bands[n - 1]) {
            (Some(b3), Some(b2), Some(b1)) => (b3, b2, b1),
            _ => return None,
        };

        tracing::debug!(
            symbol = %c1.symbol,
            "Band check: C3 close {:.6} vs lower {:.6} | C2 open {:.6} close {:.6} vs lower {:.6}",
            c3.close,
            band3.lower,
            c2.open,
            c2.close,
            band2.lower
        );

        if !is_reentry(c3, &band3, c2, &band2) {
            return None;
        }

        let take_profit_reference = band1.mean - self.config.tp_std_factor * band1.std_dev;

        tracing::info!(
            "🎯 BAND RE-ENTRY {}: entry ${:.6}, mean ${:.6}, σ {:.6}, TP ref ${:.6}",
            c1.symbol,
            c1.close,
            band1.mean,
            band1.std_dev,
            take_profit_reference
        );

        Some(EntrySignal {
            symbol: c1.symbol.clone(),
            entry_price: c1.close,
            band_mean: band1.mean,
            band_std_dev: band1.std_dev,
            take_profit_reference,
            candle_time: c1.close_time,
        })
    }

    fn name(&self) -> &str {
        "Band Re-entry"
    }

    fn min_candles_required(&self) -> usize {
        self.config.period + 3
    }
}
