// Order sizing and take-profit ladder
//
// All arithmetic is in Decimal so every quantity and price leaving this module
// is an exact multiple of the exchange step / tick size.

use crate::models::SymbolFilter;
use crate::strategy::EntrySignal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Currency capital is held in
    pub quote_asset: String,

    /// Fraction of free capital committed per trade when the asset has no entry
    pub default_allocation: Decimal,

    /// Per base asset allocation fractions
    pub allocations: HashMap<String, Decimal>,

    /// Exchange minimum order value in quote currency
    pub min_notional: Decimal,

    /// Minimum (tp1 - entry) / entry for a trade to be worth taking
    pub min_profit_margin: Decimal,

    /// Share of the settled quantity sold at TP1
    pub tp1_fraction: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            default_allocation: dec!(0.10),
            allocations: HashMap::new(),
            min_notional: dec!(11),
            min_profit_margin: dec!(0.003),
            tp1_fraction: dec!(0.40),
        }
    }
}

/// Order ready for submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizedOrder {
    pub symbol: String,
    pub base_asset: String,
    /// Reference price the quantity was sized at
    pub entry_price: Decimal,
    pub quantity: Decimal,
    /// Quote amount budgeted for the trade
    pub investment: Decimal,
    /// Band target, floored to tick
    pub take_profit_1_price: Decimal,
    /// Band mean, floored to tick
    pub take_profit_2_price: Decimal,
}

impl SizedOrder {
    pub fn notional(&self) -> Decimal {
        self.quantity * self.entry_price
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    InsufficientCapital { capital: Decimal, required: Decimal },
    ZeroQuantity,
    MarginTooThin { margin: Decimal },
    InvalidPrice,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::InsufficientCapital { capital, required } => {
                write!(f, "capital {} below required {}", capital, required)
            }
            DropReason::ZeroQuantity => write!(f, "quantity rounds to zero"),
            DropReason::MarginTooThin { margin } => {
                write!(f, "profit margin {}% below minimum", (margin * dec!(100)).round_dp(3))
            }
            DropReason::InvalidPrice => write!(f, "non-positive or unrepresentable price"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizeDecision {
    Sized(SizedOrder),
    Dropped(DropReason),
}

/// One leg of the take-profit ladder
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LadderLeg {
    pub quantity: Decimal,
    pub price: Decimal,
}

/// Quantities and prices for the TP orders of one trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Ladder {
    pub tp1: LadderLeg,
    pub tp2: Option<LadderLeg>,
}

/// Largest multiple of `step` not above `value`
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).floor() * step).normalize()
}

/// Render `value` with the precision implied by `step`, trailing zeros stripped
pub fn format_to_step(value: Decimal, step: Decimal) -> String {
    let places = step.normalize().scale();
    value.round_dp(places).normalize().to_string()
}

pub struct OrderSizer {
    config: SizingConfig,
}

impl OrderSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    pub fn allocation_for(&self, base_asset: &str) -> Decimal {
        self.config
            .allocations
            .get(base_asset)
            .copied()
            .unwrap_or(self.config.default_allocation)
    }

    /// Size an entry for `signal` from free quote `capital`
    pub fn size(&self, signal: &EntrySignal, capital: Decimal, filter: &SymbolFilter) -> SizeDecision {
        let (price, tp1_raw, tp2_raw) = match (
            Decimal::from_f64(signal.entry_price),
            Decimal::from_f64(signal.take_profit_reference),
            Decimal::from_f64(signal.band_mean),
        ) {
            (Some(p), Some(t1), Some(t2)) if p > Decimal::ZERO => (p, t1, t2),
            _ => return SizeDecision::Dropped(DropReason::InvalidPrice),
        };

        let min_notional = self.config.min_notional;
        let mut investment = capital * self.allocation_for(&filter.base_asset);
        if investment < min_notional {
            if capital < min_notional {
                return SizeDecision::Dropped(DropReason::InsufficientCapital {
                    capital,
                    required: min_notional,
                });
            }
            tracing::debug!(
                "{}: investment {} below min notional, rounding up to {}",
                signal.symbol,
                investment,
                min_notional
            );
            investment = min_notional;
        }

        let mut quantity = floor_to_step(investment / price, filter.step_size);
        if quantity * price < min_notional {
            let bumped = quantity + filter.step_size;
            if bumped * price > capital {
                return SizeDecision::Dropped(DropReason::InsufficientCapital {
                    capital,
                    required: bumped * price,
                });
            }
            quantity = bumped.normalize();
        }

        if quantity <= Decimal::ZERO {
            return SizeDecision::Dropped(DropReason::ZeroQuantity);
        }

        let take_profit_1_price = floor_to_step(tp1_raw, filter.tick_size);
        let take_profit_2_price = floor_to_step(tp2_raw, filter.tick_size);

        let margin = (take_profit_1_price - price) / price;
        if margin < self.config.min_profit_margin {
            return SizeDecision::Dropped(DropReason::MarginTooThin { margin });
        }

        SizeDecision::Sized(SizedOrder {
            symbol: signal.symbol.clone(),
            base_asset: filter.base_asset.clone(),
            entry_price: price,
            quantity,
            investment,
            take_profit_1_price,
            take_profit_2_price,
        })
    }

    /// Split a settled quantity into the TP1 / TP2 ladder
    ///
    /// TP1 takes `tp1_fraction` at the band target and TP2 the remainder at the
    /// band mean. Collapses to a single full-quantity TP1 when TP2 is not above
    /// TP1 or either leg would be empty or under the minimum notional.
    pub fn ladder(&self, settled_qty: Decimal, tp1_price: Decimal, tp2_price: Decimal, step: Decimal) -> Ladder {
        let single = Ladder {
            tp1: LadderLeg {
                quantity: settled_qty,
                price: tp1_price,
            },
            tp2: None,
        };

        if tp2_price <= tp1_price {
            return single;
        }

        let tp1_qty = floor_to_step(settled_qty * self.config.tp1_fraction, step);
        let tp2_qty = (settled_qty - tp1_qty).normalize();
        let min_notional = self.config.min_notional;

        if tp1_qty <= Decimal::ZERO
            || tp2_qty <= Decimal::ZERO
            || tp1_qty * tp1_price < min_notional
            || tp2_qty * tp2_price < min_notional
        {
            return single;
        }

        Ladder {
            tp1: LadderLeg {
                quantity: tp1_qty,
                price: tp1_price,
            },
            tp2: Some(LadderLeg {
                quantity: tp2_qty,
                price: tp2_price,
            }),
        }
    }
}

/// Base asset from a symbol, using the quote asset suffix
pub fn base_asset(symbol: &str, quote_asset: &str) -> String {
    symbol
        .strip_suffix(quote_asset)
        .filter(|base| !base.is_empty())
        .unwrap_or(symbol)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn btc_filter() -> SymbolFilter {
        SymbolFilter {
            symbol: "BTCUSDT".to_string(),
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
            tick_size: dec!(0.01),
            step_size: dec!(0.00001),
        }
    }

    fn signal(entry: f64, tp: f64, mean: f64) -> EntrySignal {
        EntrySignal {
            symbol: "BTCUSDT".to_string(),
            entry_price: entry,
            band_mean: mean,
            band_std_dev: 1.0,
            take_profit_reference: tp,
            candle_time: Utc::now(),
        }
    }

    fn is_multiple(value: Decimal, step: Decimal) -> bool {
        (value % step).is_zero()
    }

    #[test]
    fn test_reference_sizing_scenario() {
        let sizer = OrderSizer::new(SizingConfig::default());
        let decision = sizer.size(&signal(50000.0, 51000.0, 52000.0), dec!(1000), &btc_filter());

        match decision {
            SizeDecision::Sized(order) => {
                assert_eq!(order.investment, dec!(100));
                assert_eq!(order.quantity, dec!(0.002));
                assert_eq!(format_to_step(order.quantity, dec!(0.00001)), "0.002");
                assert_eq!(order.take_profit_1_price, dec!(51000));
            }
            other => panic!("Expected sized order, got {:?}", other),
        }
    }

    #[test]
    fn test_outputs_are_step_and_tick_multiples_within_capital() {
        let sizer = OrderSizer::new(SizingConfig::default());
        let filter = btc_filter();
        let prices = [
            (123.456789, 130.987654),
            (0.98765, 1.2345678),
            (27123.4567, 28001.9999),
            (64999.99, 66000.123),
        ];

        for capital in [dec!(11), dec!(57.3), dec!(1000), dec!(98765.4321)] {
            for (entry, tp) in prices {
                if let SizeDecision::Sized(order) = sizer.size(&signal(entry, tp, tp * 1.01), capital, &filter) {
                    assert!(is_multiple(order.quantity, filter.step_size), "{:?}", order);
                    assert!(is_multiple(order.take_profit_1_price, filter.tick_size), "{:?}", order);
                    assert!(is_multiple(order.take_profit_2_price, filter.tick_size), "{:?}", order);
                    assert!(order.notional() <= capital, "{:?} exceeds {}", order, capital);
                }
            }
        }
    }

    #[test]
    fn test_small_capital_rounds_up_to_min_notional() {
        let sizer = OrderSizer::new(SizingConfig::default());
        let filter = SymbolFilter {
            symbol: "ADAUSDT".to_string(),
            base_asset: "ADA".to_string(),
            quote_asset: "USDT".to_string(),
            tick_size: dec!(0.0001),
            step_size: dec!(0.1),
        };

        // 10% of 50 is 5, under the 11 minimum
        match sizer.size(&signal(0.5, 0.52, 0.53), dec!(50), &filter) {
            SizeDecision::Sized(order) => {
                assert_eq!(order.investment, dec!(11));
                assert_eq!(order.quantity, dec!(22));
            }
            other => panic!("Expected sized order, got {:?}", other),
        }
    }

    #[test]
    fn test_flooring_below_min_notional_adds_one_step() {
        let sizer = OrderSizer::new(SizingConfig::default());
        let filter = SymbolFilter {
            symbol: "ETHUSDT".to_string(),
            base_asset: "ETH".to_string(),
            quote_asset: "USDT".to_string(),
            tick_size: dec!(0.01),
            step_size: dec!(0.001),
        };

        // 11 / 3000 floors to 0.003 (9 USDT), one more step makes 12
        match sizer.size(&signal(3000.0, 3100.0, 3150.0), dec!(20), &filter) {
            SizeDecision::Sized(order) => assert_eq!(order.quantity, dec!(0.004)),
            other => panic!("Expected sized order, got {:?}", other),
        }

        // Same trade with only 11.5 available cannot afford the extra step
        assert!(matches!(
            sizer.size(&signal(3000.0, 3100.0, 3150.0), dec!(11.5), &filter),
            SizeDecision::Dropped(DropReason::InsufficientCapital { .. })
        ));
    }

    #[test]
    fn test_capital_below_min_notional_drops() {
        let sizer = OrderSizer::new(SizingConfig::default());
        assert!(matches!(
            sizer.size(&signal(50000.0, 51000.0, 52000.0), dec!(10), &btc_filter()),
            SizeDecision::Dropped(DropReason::InsufficientCapital { .. })
        ));
    }

    #[test]
    fn test_thin_margin_drops() {
        let sizer = OrderSizer::new(SizingConfig::default());
        // 0.2% above entry
        assert!(matches!(
            sizer.size(&signal(50000.0, 50100.0, 50500.0), dec!(1000), &btc_filter()),
            SizeDecision::Dropped(DropReason::MarginTooThin { .. })
        ));
    }

    #[test]
    fn test_per_asset_allocation_overrides_default() {
        let mut config = SizingConfig::default();
        config.allocations.insert("BTC".to_string(), dec!(0.25));
        let sizer = OrderSizer::new(config);

        assert_eq!(sizer.allocation_for("BTC"), dec!(0.25));
        assert_eq!(sizer.allocation_for("ETH"), dec!(0.10));
    }

    #[test]
    fn test_ladder_splits_forty_sixty() {
        let sizer = OrderSizer::new(SizingConfig::default());
        let ladder = sizer.ladder(dec!(0.005), dec!(51000), dec!(52000), dec!(0.00001));

        assert_eq!(ladder.tp1.quantity, dec!(0.002));
        let tp2 = ladder.tp2.expect("two legs");
        assert_eq!(tp2.quantity, dec!(0.003));
        assert_eq!(ladder.tp1.quantity + tp2.quantity, dec!(0.005));
    }

    #[test]
    fn test_ladder_collapses_when_legs_too_small() {
        let sizer = OrderSizer::new(SizingConfig::default());
        let inverted = sizer.ladder(dec!(0.002), dec!(52000), dec!(51000), dec!(0.00001));
        assert_eq!(inverted.tp2, None);
        assert_eq!(inverted.tp1.quantity, dec!(0.002));

        // 0.0004 BTC total: TP1 leg is worth about 8 USDT
        let tiny = sizer.ladder(dec!(0.0004), dec!(51000), dec!(52000), dec!(0.00001));
        assert_eq!(tiny.tp2, None);
        assert_eq!(tiny.tp1.quantity, dec!(0.0004));
    }

    #[test]
    fn test_floor_and_format_helpers() {
        assert_eq!(floor_to_step(dec!(0.0019999), dec!(0.00001)), dec!(0.00199));
        assert_eq!(floor_to_step(dec!(105.678), dec!(0.01)), dec!(105.67));
        assert_eq!(format_to_step(dec!(0.00200), dec!(0.00001000)), "0.002");
        assert_eq!(format_to_step(dec!(12), dec!(1.0)), "12");
        assert_eq!(base_asset("BTCUSDT", "USDT"), "BTC");
        assert_eq!(base_asset("USDT", "USDT"), "USDT");
    }
}
