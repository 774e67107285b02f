//! In-process exchange double used by engine tests and dry runs.
//!
//! Market orders fill immediately at the configured ticker price. Take-profit
//! orders rest as NEW with their quantity locked until a test fills, cancels,
//! or purges them.

use crate::api::error::{ExchangeError, ExchangeResult};
use crate::api::exchange::{Balance, Exchange, Fill, OrderReport};
use crate::models::{Candle, OrderSide, OrderStatus, OrderType, SymbolFilter};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Exchange call that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimulatedCall {
    Balances,
    SymbolFilter,
    Candles,
    Ticker,
    MarketBuy,
    MarketSell,
    TakeProfitSell,
    OrderStatus,
    CancelOrder,
}

#[derive(Default)]
struct SimulatedState {
    balances: HashMap<String, Balance>,
    filters: HashMap<String, SymbolFilter>,
    prices: HashMap<String, Decimal>,
    candles: HashMap<String, Vec<Candle>>,
    orders: HashMap<i64, OrderReport>,
    failures: HashMap<SimulatedCall, VecDeque<Option<ExchangeError>>>,
    placed: Vec<OrderReport>,
    next_order_id: i64,
}

impl SimulatedState {
    fn balance_mut(&mut self, asset: &str) -> &mut Balance {
        self.balances
            .entry(asset.to_string())
            .or_insert_with(|| Balance::zero(asset))
    }

    fn take_failure(&mut self, call: SimulatedCall) -> ExchangeResult<()> {
        match self.failures.get_mut(&call).and_then(|queue| queue.pop_front()) {
            Some(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    fn base_asset(&self, symbol: &str) -> ExchangeResult<String> {
        self.filters
            .get(symbol)
            .map(|f| f.base_asset.clone())
            .ok_or_else(|| ExchangeError::Fatal {
                code: -1121,
                message: format!("Invalid symbol {}", symbol),
            })
    }

    fn price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.prices.get(symbol).copied().ok_or_else(|| ExchangeError::Fatal {
            code: -1121,
            message: format!("No price for {}", symbol),
        })
    }

    fn record(&mut self, report: OrderReport) -> OrderReport {
        self.orders.insert(report.remote_order_id, report.clone());
        self.placed.push(report.clone());
        report
    }

    fn next_id(&mut self) -> i64 {
        self.next_order_id += 1;
        self.next_order_id
    }
}

fn insufficient_balance() -> ExchangeError {
    ExchangeError::Fatal {
        code: -2010,
        message: "Account has insufficient balance for requested action.".to_string(),
    }
}

fn unknown_order() -> ExchangeError {
    ExchangeError::NotFound("Unknown order sent.".to_string())
}

pub struct SimulatedExchange {
    quote_asset: String,
    commission_rate: Decimal,
    state: Mutex<SimulatedState>,
}

impl SimulatedExchange {
    pub fn new(quote_asset: &str) -> Self {
        Self {
            quote_asset: quote_asset.to_string(),
            commission_rate: Decimal::ZERO,
            state: Mutex::new(SimulatedState {
                next_order_id: 1000,
                ..Default::default()
            }),
        }
    }

    /// Charge `rate` of every market buy in the base asset
    pub fn with_commission(mut self, rate: Decimal) -> Self {
        self.commission_rate = rate;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn list_symbol(&self, symbol: &str, base_asset: &str, tick_size: Decimal, step_size: Decimal) {
        self.lock().filters.insert(
            symbol.to_string(),
            SymbolFilter {
                symbol: symbol.to_string(),
                base_asset: base_asset.to_string(),
                quote_asset: self.quote_asset.clone(),
                tick_size,
                step_size,
            },
        );
    }

    pub fn set_balance(&self, asset: &str, free: Decimal, locked: Decimal) {
        let mut state = self.lock();
        let balance = state.balance_mut(asset);
        balance.free = free;
        balance.locked = locked;
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.lock().prices.insert(symbol.to_string(), price);
    }

    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.lock().candles.insert(symbol.to_string(), candles);
    }

    /// Make the next call of `call` fail with `err`
    pub fn fail_next(&self, call: SimulatedCall, err: ExchangeError) {
        self.fail_after(call, 0, err);
    }

    /// Let `successes` calls of `call` through, then fail the next one with `err`
    pub fn fail_after(&self, call: SimulatedCall, successes: usize, err: ExchangeError) {
        let mut state = self.lock();
        let queue = state.failures.entry(call).or_default();
        queue.extend(std::iter::repeat_with(|| None).take(successes));
        queue.push_back(Some(err));
    }

    /// Fill a resting sell at its stop price, releasing the locked base and
    /// crediting the quote
    pub fn fill_order(&self, remote_order_id: i64) -> ExchangeResult<OrderReport> {
        let mut state = self.lock();
        let order = state.orders.get(&remote_order_id).cloned().ok_or_else(unknown_order)?;
        if order.status.is_terminal() {
            return Ok(order);
        }

        let price = order.stop_price.or(order.price).unwrap_or(Decimal::ZERO);
        let remaining = order.orig_qty - order.executed_qty;
        let base = state.base_asset(&order.symbol)?;
        state.balance_mut(&base).locked -= remaining;
        let quote = self.quote_asset.clone();
        state.balance_mut(&quote).free += remaining * price;

        let updated = state
            .orders
            .get_mut(&remote_order_id)
            .ok_or_else(unknown_order)?;
        updated.status = OrderStatus::Filled;
        updated.executed_qty = updated.orig_qty;
        updated.cumulative_quote_qty = updated.orig_qty * price;
        updated.fills.push(Fill {
            price,
            qty: remaining,
            commission: Decimal::ZERO,
            commission_asset: quote,
        });
        Ok(updated.clone())
    }

    /// Overwrite the reported status without touching balances
    pub fn set_order_status(&self, remote_order_id: i64, status: OrderStatus) {
        if let Some(order) = self.lock().orders.get_mut(&remote_order_id) {
            order.status = status;
        }
    }

    /// Drop an order so lookups and cancels answer "unknown order"
    pub fn purge_order(&self, remote_order_id: i64) {
        self.lock().orders.remove(&remote_order_id);
    }

    /// Every order accepted so far, in submission order
    pub fn placed_orders(&self) -> Vec<OrderReport> {
        self.lock().placed.clone()
    }

    pub fn open_order_ids(&self, symbol: &str) -> Vec<i64> {
        let state = self.lock();
        let mut ids: Vec<i64> = state
            .orders
            .values()
            .filter(|o| o.symbol == symbol && !o.status.is_terminal())
            .map(|o| o.remote_order_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn market_report(
        &self,
        state: &mut SimulatedState,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
        commission_asset: &str,
        client_order_id: &str,
    ) -> OrderReport {
        let id = state.next_id();
        let report = OrderReport {
            remote_order_id: id,
            client_order_id: client_order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            status: OrderStatus::Filled,
            price: None,
            stop_price: None,
            orig_qty: quantity,
            executed_qty: quantity,
            cumulative_quote_qty: quantity * price,
            fills: vec![Fill {
                price,
                qty: quantity,
                commission,
                commission_asset: commission_asset.to_string(),
            }],
            raw: serde_json::json!({
                "orderId": id,
                "clientOrderId": client_order_id,
                "status": "FILLED",
            }),
        };
        state.record(report)
    }
}

#[async_trait]
impl Exchange for SimulatedExchange {
    async fn balances(&self) -> ExchangeResult<Vec<Balance>> {
        let mut state = self.lock();
        state.take_failure(SimulatedCall::Balances)?;
        let mut balances: Vec<Balance> = state
            .balances
            .values()
            .filter(|b| b.total() > Decimal::ZERO)
            .cloned()
            .collect();
        balances.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(balances)
    }

    async fn symbol_filter(&self, symbol: &str) -> ExchangeResult<SymbolFilter> {
        let mut state = self.lock();
        state.take_failure(SimulatedCall::SymbolFilter)?;
        state
            .filters
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("Symbol {} not listed", symbol)))
    }

    async fn candles(&self, symbol: &str, _interval: &str, limit: u16) -> ExchangeResult<Vec<Candle>> {
        let mut state = self.lock();
        state.take_failure(SimulatedCall::Candles)?;
        let candles = state.candles.get(symbol).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(limit as usize);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn ticker_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let mut state = self.lock();
        state.take_failure(SimulatedCall::Ticker)?;
        state.price(symbol)
    }

    async fn market_buy(
        &self,
        symbol: &str,
        quantity: Decimal,
        client_order_id: &str,
    ) -> ExchangeResult<OrderReport> {
        let mut state = self.lock();
        state.take_failure(SimulatedCall::MarketBuy)?;
        let price = state.price(symbol)?;
        let base = state.base_asset(symbol)?;
        let cost = quantity * price;

        let quote = state.balance_mut(&self.quote_asset);
        if quote.free < cost {
            return Err(insufficient_balance());
        }
        quote.free -= cost;

        let commission = quantity * self.commission_rate;
        state.balance_mut(&base).free += quantity - commission;

        Ok(self.market_report(
            &mut state,
            symbol,
            OrderSide::Buy,
            quantity,
            price,
            commission,
            &base,
            client_order_id,
        ))
    }

    async fn market_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        client_order_id: &str,
    ) -> ExchangeResult<OrderReport> {
        let mut state = self.lock();
        state.take_failure(SimulatedCall::MarketSell)?;
        let price = state.price(symbol)?;
        let base = state.base_asset(symbol)?;

        let held = state.balance_mut(&base);
        if held.free < quantity {
            return Err(insufficient_balance());
        }
        held.free -= quantity;
        state.balance_mut(&self.quote_asset).free += quantity * price;

        let quote = self.quote_asset.clone();
        Ok(self.market_report(
            &mut state,
            symbol,
            OrderSide::Sell,
            quantity,
            price,
            Decimal::ZERO,
            &quote,
            client_order_id,
        ))
    }

    async fn take_profit_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        stop_price: Decimal,
        client_order_id: &str,
    ) -> ExchangeResult<OrderReport> {
        let mut state = self.lock();
        state.take_failure(SimulatedCall::TakeProfitSell)?;
        let base = state.base_asset(symbol)?;

        let held = state.balance_mut(&base);
        if held.free < quantity {
            return Err(insufficient_balance());
        }
        held.free -= quantity;
        held.locked += quantity;

        let id = state.next_id();
        let report = OrderReport {
            remote_order_id: id,
            client_order_id: client_order_id.to_string(),
            symbol: symbol.to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::TakeProfitLimit,
            status: OrderStatus::New,
            price: Some(stop_price),
            stop_price: Some(stop_price),
            orig_qty: quantity,
            executed_qty: Decimal::ZERO,
            cumulative_quote_qty: Decimal::ZERO,
            fills: Vec::new(),
            raw: serde_json::json!({
                "orderId": id,
                "clientOrderId": client_order_id,
                "status": "NEW",
            }),
        };
        Ok(state.record(report))
    }

    async fn order_status(&self, _symbol: &str, remote_order_id: i64) -> ExchangeResult<OrderReport> {
        let mut state = self.lock();
        state.take_failure(SimulatedCall::OrderStatus)?;
        state.orders.get(&remote_order_id).cloned().ok_or_else(unknown_order)
    }

    async fn cancel_order(&self, _symbol: &str, remote_order_id: i64) -> ExchangeResult<OrderReport> {
        let mut state = self.lock();
        state.take_failure(SimulatedCall::CancelOrder)?;
        let order = state.orders.get(&remote_order_id).cloned().ok_or_else(unknown_order)?;
        if order.status.is_terminal() {
            return Err(unknown_order());
        }

        let base = state.base_asset(&order.symbol)?;
        let remaining = order.orig_qty - order.executed_qty;
        let held = state.balance_mut(&base);
        held.locked -= remaining;
        held.free += remaining;

        let cancelled = state.orders.get_mut(&remote_order_id).ok_or_else(unknown_order)?;
        cancelled.status = OrderStatus::Cancelled;
        Ok(cancelled.clone())
    }
}
