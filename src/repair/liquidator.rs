use crate::api::{Exchange, ExchangeError, FilterCache};
use crate::cache::{CacheInvalidator, TRADE_TABLES};
use crate::db::TradeStore;
use crate::execution::lifecycle::{close_flat, close_trade, order_for_role, settle, Settlement};
use crate::execution::{client_order_id, EngineResult};
use crate::models::{ExitType, NewTradeLog, Order, OrderRole, OrderStatus, TpSlot, TpStatus, Trade, TradeEvent};
use crate::notify::{Notification, Notifier};
use crate::repair::{BatchReport, Target};
use crate::sizing::floor_to_step;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Force-closes open trades: settle order state, sell holdings, close rows
pub struct EmergencyLiquidator {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn TradeStore>,
    filters: FilterCache,
    cache: Arc<dyn CacheInvalidator>,
    notifier: Arc<dyn Notifier>,
}

/// Price realized by the per-symbol sale
#[derive(Debug, Clone, Copy)]
struct Sale {
    quantity: Decimal,
    price: Decimal,
}

impl EmergencyLiquidator {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn TradeStore>,
        filters: FilterCache,
        cache: Arc<dyn CacheInvalidator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            exchange,
            store,
            filters,
            cache,
            notifier,
        }
    }

    pub async fn liquidate(&self, target: &Target, dry_run: bool) -> EngineResult<BatchReport> {
        let mut report = BatchReport::default();

        let trades: Vec<Trade> = self
            .store
            .open_trades()
            .await?
            .into_iter()
            .filter(|t| target.matches(t))
            .collect();

        if trades.is_empty() {
            tracing::info!("No open trades match {}", target);
            return Ok(report);
        }

        tracing::warn!("🚨 Emergency liquidation of {} trade(s) ({})", trades.len(), target);

        let mut by_symbol: BTreeMap<String, Vec<Trade>> = BTreeMap::new();
        for trade in trades {
            by_symbol.entry(trade.symbol.clone()).or_default().push(trade);
        }

        // Phase 1: bring every linked order to a terminal state. A symbol with an
        // order still live is held back whole: its base is not sold and none of
        // its trades close until a later run settles that order.
        let mut orders: HashMap<i64, Vec<Order>> = HashMap::new();
        let mut held_back: BTreeSet<String> = BTreeSet::new();
        for (symbol, trades) in &by_symbol {
            let mut settled_here: Vec<(&Trade, Vec<Order>)> = Vec::new();
            for trade in trades {
                match self.settle_orders(trade, dry_run, &mut report).await {
                    Ok(settled) => {
                        let live: Vec<String> = settled
                            .iter()
                            .filter(|o| !o.status.is_terminal())
                            .map(|o| o.remote_order_id.to_string())
                            .collect();
                        if !live.is_empty() {
                            report.error(format!(
                                "trade {} ({}) left open: order {} still live",
                                trade.id,
                                trade.symbol,
                                live.join(", ")
                            ));
                            held_back.insert(symbol.clone());
                        }
                        settled_here.push((trade, settled));
                    }
                    Err(e) => {
                        report.error(format!("trade {} ({}): order settlement failed: {}", trade.id, trade.symbol, e));
                        held_back.insert(symbol.clone());
                    }
                }
            }

            if !held_back.contains(symbol) {
                for (trade, settled) in settled_here {
                    orders.insert(trade.id, settled);
                }
                continue;
            }

            // Keep the order progress made so far; the trades stay open
            if !dry_run {
                for (trade, settled) in &settled_here {
                    if let Err(e) = self.store.commit_trade(trade, settled).await {
                        report.error(format!("trade {} ({}): order sync failed: {}", trade.id, trade.symbol, e));
                    }
                }
            }
        }

        // Phase 2: sell whatever the account holds of each symbol
        let mut sales: HashMap<String, Sale> = HashMap::new();
        for symbol in by_symbol.keys().filter(|s| !held_back.contains(*s)) {
            match self.sell_holdings(symbol, dry_run).await {
                Ok(Some(sale)) => {
                    report.success(format!(
                        "{}{}: sold {} @ {}",
                        dry_prefix(dry_run),
                        symbol,
                        sale.quantity,
                        sale.price
                    ));
                    sales.insert(symbol.clone(), sale);
                }
                Ok(None) => tracing::info!("{}: nothing to sell", symbol),
                Err(e) => report.error(format!("{}: sell failed: {}", symbol, e)),
            }
        }

        // Phase 3: close every trade
        for (symbol, trades) in &by_symbol {
            let sale = sales.get(symbol).copied();
            for trade in trades {
                let Some(trade_orders) = orders.get(&trade.id) else {
                    continue;
                };

                let mut trade = trade.clone();
                let settlement = close_emergency(&mut trade, trade_orders, sale);
                let summary = format!(
                    "trade {} ({}): closed @ {} with P&L {}",
                    trade.id,
                    trade.symbol,
                    trade.exit_price.unwrap_or_default(),
                    trade.profit_loss.unwrap_or_default()
                );

                if dry_run {
                    report.success(format!("[dry-run] {}", summary));
                    continue;
                }

                if let Err(e) = self.store.commit_trade(&trade, trade_orders).await {
                    report.error(format!("trade {} ({}): close failed: {}", trade.id, trade.symbol, e));
                    continue;
                }

                self.log(
                    trade.id,
                    &summary,
                    json!({
                        "sale_price": sale.map(|s| s.price),
                        "settlement": settlement,
                    }),
                )
                .await;
                self.notifier.notify(Notification::new(
                    trade.id,
                    &trade.symbol,
                    TradeEvent::Liquidated,
                    summary.clone(),
                ));
                report.success(summary);
            }
        }

        if !dry_run {
            self.cache.invalidate_tables(&TRADE_TABLES).await;
        }

        Ok(report)
    }

    /// Reconcile each non-terminal order against the exchange, cancelling live ones
    async fn settle_orders(&self, trade: &Trade, dry_run: bool, report: &mut BatchReport) -> EngineResult<Vec<Order>> {
        let mut orders = self.store.orders_by_trade(trade.id).await?;

        for order in orders.iter_mut().filter(|o| !o.status.is_terminal()) {
            let live = match self.exchange.order_status(&order.symbol, order.remote_order_id).await {
                Ok(live) => Some(live),
                Err(ExchangeError::NotFound(_)) => None,
                Err(e) => {
                    report.error(format!(
                        "trade {}: {} order {} status unavailable: {}",
                        trade.id, order.role, order.remote_order_id, e
                    ));
                    continue;
                }
            };

            match live {
                Some(live) if live.status == OrderStatus::Filled => {
                    order.executed_qty = live.executed_qty;
                    order.avg_fill_price = live.avg_price().or(order.avg_fill_price);
                    order.status = OrderStatus::Filled;
                }
                None => order.status = OrderStatus::Cancelled,
                Some(live) if live.status == OrderStatus::Cancelled => order.status = OrderStatus::Cancelled,
                Some(_) if dry_run => {
                    report.success(format!(
                        "[dry-run] trade {}: would cancel {} order {}",
                        trade.id, order.role, order.remote_order_id
                    ));
                    order.status = OrderStatus::Cancelled;
                }
                Some(_) => match self.exchange.cancel_order(&order.symbol, order.remote_order_id).await {
                    Ok(_) => {
                        order.status = OrderStatus::Cancelled;
                        report.success(format!(
                            "trade {}: cancelled {} order {}",
                            trade.id, order.role, order.remote_order_id
                        ));
                    }
                    Err(ExchangeError::NotFound(_)) => {
                        // Gone between the status read and the cancel: treat as filled at target
                        tracing::warn!(
                            trade_id = trade.id,
                            "Order {} vanished during cancel, assuming concurrent fill",
                            order.remote_order_id
                        );
                        order.status = OrderStatus::Filled;
                        order.executed_qty = order.quantity;
                        order.avg_fill_price = order.target_price();
                    }
                    Err(e) => report.error(format!(
                        "trade {}: cancel of {} order {} failed: {}",
                        trade.id, order.role, order.remote_order_id, e
                    )),
                },
            }
        }

        Ok(orders)
    }

    /// Market-sell the free base balance of `symbol`; `None` when there is nothing to sell
    async fn sell_holdings(&self, symbol: &str, dry_run: bool) -> EngineResult<Option<Sale>> {
        let filter = self.filters.get(self.exchange.as_ref(), symbol).await?;
        let held = self.exchange.balance(&filter.base_asset).await?;
        // A dry run cancels nothing, so count what the cancels would release
        let available = if dry_run { held.total() } else { held.free };
        let quantity = floor_to_step(available, filter.step_size);
        if quantity <= Decimal::ZERO {
            return Ok(None);
        }

        if dry_run {
            let price = self.exchange.ticker_price(symbol).await?;
            return Ok(Some(Sale { quantity, price }));
        }

        let client_id = client_order_id(0, "liquidate");
        let report = self.exchange.market_sell(symbol, quantity, &client_id).await?;
        let price = match report.avg_price() {
            Some(price) => price,
            None => self.exchange.ticker_price(symbol).await?,
        };
        tracing::info!(
            order_id = report.remote_order_id,
            "💸 Liquidated {} {} @ {}",
            report.executed_qty,
            symbol,
            price
        );

        Ok(Some(Sale {
            quantity: report.executed_qty,
            price,
        }))
    }

    async fn log(&self, trade_id: i64, message: &str, details: serde_json::Value) {
        let entry = NewTradeLog::new(trade_id, TradeEvent::Liquidated, message).with_details(details);
        if let Err(e) = self.store.append_log(entry).await {
            tracing::error!(trade_id, "Failed to append trade log: {}", e);
        }
    }
}

fn dry_prefix(dry_run: bool) -> &'static str {
    if dry_run {
        "[dry-run] "
    } else {
        ""
    }
}

/// Close with `Emergency`, pricing the unsold remainder by the sale, a filled
/// take-profit, or the entry price, in that order
fn close_emergency(trade: &mut Trade, orders: &[Order], sale: Option<Sale>) -> Option<Settlement> {
    let now = Utc::now();
    let entered = orders
        .iter()
        .any(|o| o.role == OrderRole::Entry && o.executed_qty > Decimal::ZERO);
    if !entered {
        close_flat(trade, ExitType::Emergency, now);
        return None;
    }

    let mut fills = Vec::new();
    let mut sold = Decimal::ZERO;
    for slot in TpSlot::ALL {
        let filled = order_for_role(orders, slot.role()).filter(|o| o.status == OrderStatus::Filled);
        match filled {
            Some(order) if trade.is_configured(slot) => {
                let qty = order.executed_qty;
                if let Some(price) = order.fill_price() {
                    fills.push((qty, price));
                    sold += qty;
                }
                trade.set_tp_status(slot, TpStatus::Filled);
                trade.set_tp_executed_qty(slot, qty);
            }
            _ => {
                if trade.is_configured(slot) && !trade.tp_status(slot).is_resolved() {
                    trade.set_tp_status(slot, TpStatus::Cancelled);
                }
            }
        }
    }

    let exit_price = sale
        .map(|s| s.price)
        .or_else(|| fills.last().map(|(_, price)| *price))
        .unwrap_or(trade.entry_price);

    let remaining = (trade.quantity - sold).max(Decimal::ZERO);
    if remaining > Decimal::ZERO {
        fills.push((remaining, exit_price));
    }

    let settlement = settle(trade.investment, &fills, exit_price);
    close_trade(trade, ExitType::Emergency, &settlement, now);
    Some(settlement)
}
