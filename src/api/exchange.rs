use crate::api::error::ExchangeResult;
use crate::models::{Candle, OrderSide, OrderStatus, OrderType, SymbolFilter};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Free and locked amount of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn zero(asset: &str) -> Self {
        Self {
            asset: asset.to_string(),
            free: Decimal::ZERO,
            locked: Decimal::ZERO,
        }
    }

    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// One execution of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
}

/// Exchange view of an order, as returned by placement, lookup and cancel
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReport {
    pub remote_order_id: i64,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub cumulative_quote_qty: Decimal,
    pub fills: Vec<Fill>,
    pub raw: serde_json::Value,
}

impl OrderReport {
    /// Volume-weighted execution price, if anything executed
    pub fn avg_price(&self) -> Option<Decimal> {
        if self.executed_qty > Decimal::ZERO && self.cumulative_quote_qty > Decimal::ZERO {
            return Some(self.cumulative_quote_qty / self.executed_qty);
        }

        let filled: Decimal = self.fills.iter().map(|f| f.qty).sum();
        if filled > Decimal::ZERO {
            let notional: Decimal = self.fills.iter().map(|f| f.qty * f.price).sum();
            return Some(notional / filled);
        }

        None
    }

    /// Total commission charged in `asset`
    pub fn commission_in(&self, asset: &str) -> Decimal {
        self.fills
            .iter()
            .filter(|f| f.commission_asset == asset)
            .map(|f| f.commission)
            .sum()
    }
}

/// Spot exchange REST boundary
///
/// One implementation per venue; the engine only ever sees this trait so a
/// single client can be injected from the composition root.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// All non-zero account balances
    async fn balances(&self) -> ExchangeResult<Vec<Balance>>;

    /// Balance of one asset (zero when the account holds none)
    async fn balance(&self, asset: &str) -> ExchangeResult<Balance> {
        let balances = self.balances().await?;
        Ok(balances
            .into_iter()
            .find(|b| b.asset == asset)
            .unwrap_or_else(|| Balance::zero(asset)))
    }

    /// Tick size / step size rules for a symbol
    async fn symbol_filter(&self, symbol: &str) -> ExchangeResult<SymbolFilter>;

    /// Candle history, oldest first
    async fn candles(&self, symbol: &str, interval: &str, limit: u16) -> ExchangeResult<Vec<Candle>>;

    /// Last traded price
    async fn ticker_price(&self, symbol: &str) -> ExchangeResult<Decimal>;

    async fn market_buy(
        &self,
        symbol: &str,
        quantity: Decimal,
        client_order_id: &str,
    ) -> ExchangeResult<OrderReport>;

    async fn market_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        client_order_id: &str,
    ) -> ExchangeResult<OrderReport>;

    /// Take-profit limit sell that triggers at `stop_price`
    async fn take_profit_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        stop_price: Decimal,
        client_order_id: &str,
    ) -> ExchangeResult<OrderReport>;

    async fn order_status(&self, symbol: &str, remote_order_id: i64) -> ExchangeResult<OrderReport>;

    async fn cancel_order(&self, symbol: &str, remote_order_id: i64) -> ExchangeResult<OrderReport>;
}
