use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OHLCV candlestick for one closed interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Error returned when a persisted enum value is not recognised
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

/// Generates `as_str`, `Display` and `FromStr` for a text-backed enum.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant(other.to_string())),
                }
            }
        }
    };
}

// ============================================================================
// Trade
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Open,
    Closed,
}

text_enum!(TradeStatus { Open => "open", Closed => "closed" });

/// Resolution state of one take-profit slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TpStatus {
    Pending,
    Filled,
    Cancelled,
}

text_enum!(TpStatus { Pending => "pending", Filled => "filled", Cancelled => "cancelled" });

impl TpStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, TpStatus::Filled | TpStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitType {
    TakeProfit,
    EntryRejected,
    RepairMarketSell,
    Emergency,
}

text_enum!(ExitType {
    TakeProfit => "take_profit",
    EntryRejected => "entry_rejected",
    RepairMarketSell => "repair_market_sell",
    Emergency => "emergency",
});

/// Take-profit slot of the two-stage ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TpSlot {
    Tp1,
    Tp2,
}

impl TpSlot {
    pub const ALL: [TpSlot; 2] = [TpSlot::Tp1, TpSlot::Tp2];

    pub fn role(&self) -> OrderRole {
        match self {
            TpSlot::Tp1 => OrderRole::Tp1,
            TpSlot::Tp2 => OrderRole::Tp2,
        }
    }
}

impl fmt::Display for TpSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.role().as_str())
    }
}

/// A position opened from a signal and exited through the TP ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub symbol: String,
    pub status: TradeStatus,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub investment: Decimal,
    pub take_profit_1_price: Option<Decimal>,
    pub take_profit_2_price: Option<Decimal>,
    pub tp1_status: TpStatus,
    pub tp2_status: TpStatus,
    pub tp1_executed_qty: Option<Decimal>,
    pub tp2_executed_qty: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub profit_loss: Option<Decimal>,
    pub profit_loss_percent: Option<Decimal>,
    pub exit_type: Option<ExitType>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    pub fn tp_price(&self, slot: TpSlot) -> Option<Decimal> {
        match slot {
            TpSlot::Tp1 => self.take_profit_1_price,
            TpSlot::Tp2 => self.take_profit_2_price,
        }
    }

    pub fn tp_status(&self, slot: TpSlot) -> TpStatus {
        match slot {
            TpSlot::Tp1 => self.tp1_status,
            TpSlot::Tp2 => self.tp2_status,
        }
    }

    pub fn set_tp_status(&mut self, slot: TpSlot, status: TpStatus) {
        match slot {
            TpSlot::Tp1 => self.tp1_status = status,
            TpSlot::Tp2 => self.tp2_status = status,
        }
    }

    pub fn tp_executed_qty(&self, slot: TpSlot) -> Option<Decimal> {
        match slot {
            TpSlot::Tp1 => self.tp1_executed_qty,
            TpSlot::Tp2 => self.tp2_executed_qty,
        }
    }

    pub fn set_tp_executed_qty(&mut self, slot: TpSlot, qty: Decimal) {
        match slot {
            TpSlot::Tp1 => self.tp1_executed_qty = Some(qty),
            TpSlot::Tp2 => self.tp2_executed_qty = Some(qty),
        }
    }

    /// A slot is configured when the trade planned a target price for it
    pub fn is_configured(&self, slot: TpSlot) -> bool {
        self.tp_price(slot).is_some()
    }

    pub fn configured_slots(&self) -> Vec<TpSlot> {
        TpSlot::ALL
            .into_iter()
            .filter(|slot| self.is_configured(*slot))
            .collect()
    }

    pub fn unresolved_slots(&self) -> Vec<TpSlot> {
        self.configured_slots()
            .into_iter()
            .filter(|slot| !self.tp_status(*slot).is_resolved())
            .collect()
    }

    pub fn all_slots_resolved(&self) -> bool {
        self.unresolved_slots().is_empty()
    }
}

/// Trade row before the store assigns an id
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub symbol: String,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub investment: Decimal,
    pub take_profit_1_price: Option<Decimal>,
    pub take_profit_2_price: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
}

// ============================================================================
// Order
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

text_enum!(OrderSide { Buy => "BUY", Sell => "SELL" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    TakeProfitLimit,
}

text_enum!(OrderType {
    Market => "MARKET",
    Limit => "LIMIT",
    TakeProfitLimit => "TAKE_PROFIT_LIMIT",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderRole {
    Entry,
    Tp1,
    Tp2,
}

text_enum!(OrderRole { Entry => "entry", Tp1 => "tp1", Tp2 => "tp2" });

impl OrderRole {
    pub fn slot(&self) -> Option<TpSlot> {
        match self {
            OrderRole::Entry => None,
            OrderRole::Tp1 => Some(TpSlot::Tp1),
            OrderRole::Tp2 => Some(TpSlot::Tp2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
}

text_enum!(OrderStatus {
    New => "NEW",
    PartiallyFilled => "PARTIALLY_FILLED",
    Filled => "FILLED",
    Cancelled => "CANCELLED",
});

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

/// Exchange order linked to a trade through the association table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub trade_id: i64,
    pub remote_order_id: i64,
    pub remote_client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub role: OrderRole,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub quantity: Decimal,
    pub executed_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub raw_response: serde_json::Value,
}

impl Order {
    /// Price the order was meant to execute at: stop trigger first, then limit
    pub fn target_price(&self) -> Option<Decimal> {
        self.stop_price.or(self.price)
    }

    /// Executed price, falling back to the target when the exchange gave no average
    pub fn fill_price(&self) -> Option<Decimal> {
        self.avg_fill_price.or_else(|| self.target_price())
    }
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub remote_order_id: i64,
    pub remote_client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub role: OrderRole,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub quantity: Decimal,
    pub executed_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub status: OrderStatus,
    pub raw_response: serde_json::Value,
}

// ============================================================================
// Wallet snapshots
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    BeforeTrade,
    AfterTrade,
    Manual,
}

text_enum!(SnapshotType {
    BeforeTrade => "before_trade",
    AfterTrade => "after_trade",
    Manual => "manual",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub id: i64,
    pub balance: Decimal,
    pub snapshot_type: SnapshotType,
    pub related_trade_id: Option<i64>,
    pub previous_balance: Option<Decimal>,
    pub growth_percent: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWalletSnapshot {
    pub balance: Decimal,
    pub snapshot_type: SnapshotType,
    pub related_trade_id: Option<i64>,
    pub previous_balance: Option<Decimal>,
    pub growth_percent: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Trade event log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeEvent {
    Opened,
    EntryFilled,
    EntryFailed,
    TakeProfitPlaced,
    TakeProfitFailed,
    TakeProfitFilled,
    FillValidationFailed,
    OrderSynced,
    Closed,
    Repaired,
    Liquidated,
    Error,
}

text_enum!(TradeEvent {
    Opened => "opened",
    EntryFilled => "entry_filled",
    EntryFailed => "entry_failed",
    TakeProfitPlaced => "take_profit_placed",
    TakeProfitFailed => "take_profit_failed",
    TakeProfitFilled => "take_profit_filled",
    FillValidationFailed => "fill_validation_failed",
    OrderSynced => "order_synced",
    Closed => "closed",
    Repaired => "repaired",
    Liquidated => "liquidated",
    Error => "error",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub id: i64,
    pub trade_id: i64,
    pub event: TradeEvent,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTradeLog {
    pub trade_id: i64,
    pub event: TradeEvent,
    pub message: String,
    pub details: serde_json::Value,
}

impl NewTradeLog {
    pub fn new(trade_id: i64, event: TradeEvent, message: impl Into<String>) -> Self {
        Self {
            trade_id,
            event,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

// ============================================================================
// Exchange metadata
// ============================================================================

/// Exchange trading rules for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFilter {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub tick_size: Decimal,
    pub step_size: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn open_trade() -> Trade {
        Trade {
            id: 1,
            symbol: "BTCUSDT".to_string(),
            status: TradeStatus::Open,
            entry_price: dec!(100),
            quantity: dec!(1),
            investment: dec!(100),
            take_profit_1_price: Some(dec!(101)),
            take_profit_2_price: None,
            tp1_status: TpStatus::Pending,
            tp2_status: TpStatus::Pending,
            tp1_executed_qty: None,
            tp2_executed_qty: None,
            exit_price: None,
            profit_loss: None,
            profit_loss_percent: None,
            exit_type: None,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    #[test]
    fn test_enum_text_round_trip_through_from_str() {
        assert_eq!("PARTIALLY_FILLED".parse::<OrderStatus>(), Ok(OrderStatus::PartiallyFilled));
        assert_eq!(OrderRole::Tp2.as_str(), "tp2");
        assert!("bogus".parse::<TpStatus>().is_err());
    }

    #[test]
    fn test_unconfigured_slot_does_not_block_resolution() {
        let mut trade = open_trade();
        assert_eq!(trade.configured_slots(), vec![TpSlot::Tp1]);
        assert!(!trade.all_slots_resolved());

        trade.set_tp_status(TpSlot::Tp1, TpStatus::Filled);
        assert!(trade.all_slots_resolved());
    }

    #[test]
    fn test_target_price_prefers_stop_price() {
        let order = Order {
            id: 1,
            trade_id: 1,
            remote_order_id: 42,
            remote_client_order_id: "c".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::TakeProfitLimit,
            role: OrderRole::Tp1,
            price: Some(dec!(104)),
            stop_price: Some(dec!(105)),
            quantity: dec!(1),
            executed_qty: dec!(0),
            avg_fill_price: None,
            status: OrderStatus::New,
            created_at: Utc::now(),
            raw_response: serde_json::Value::Null,
        };

        assert_eq!(order.target_price(), Some(dec!(105)));
        assert_eq!(order.fill_price(), Some(dec!(105)));
    }
}
