use crate::api::{Exchange, ExchangeError, OrderReport};
use crate::cache::{CacheInvalidator, TRADE_TABLES};
use crate::db::TradeStore;
use crate::execution::lifecycle::{close_trade, order_for_role, settle, slot_fills, stage};
use crate::execution::EngineResult;
use crate::models::{
    ExitType, NewTradeLog, Order, OrderRole, OrderStatus, TpStatus, Trade, TradeEvent,
};
use crate::notify::{Notification, Notifier};
use crate::wallet::{wallet_balance, WalletLedger};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub quote_asset: String,
    /// Market may sit this fraction below an order's target and still confirm it
    pub fill_tolerance: Decimal,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            fill_tolerance: dec!(0.001),
        }
    }
}

/// Outcome of one pass over the open trades
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub filled_slots: usize,
    pub validation_failures: usize,
    pub not_found: usize,
    pub synced_orders: usize,
    pub closed: Vec<i64>,
    pub errors: Vec<(i64, String)>,
}

/// Lowest market price that still confirms a fill at `target`
pub fn validation_threshold(target: Decimal, tolerance: Decimal) -> Decimal {
    target * (Decimal::ONE - tolerance)
}

/// Fail-closed check of an exchange-reported fill against the live market
pub fn fill_is_plausible(target: Decimal, market: Decimal, tolerance: Decimal) -> bool {
    market >= validation_threshold(target, tolerance)
}

/// Copy live exchange fields onto a local order; true when something changed
fn apply_report(order: &mut Order, report: &OrderReport) -> bool {
    let avg = report.avg_price().or(order.avg_fill_price);
    let changed = order.status != report.status
        || order.executed_qty != report.executed_qty
        || order.avg_fill_price != avg;

    if changed {
        order.status = report.status;
        order.executed_qty = report.executed_qty;
        order.avg_fill_price = avg;
        order.raw_response = report.raw.clone();
    }
    changed
}

/// Polls the exchange for every open trade and advances the TP ladder
///
/// Each trade is isolated: an error is recorded in the sweep report and the
/// sweep moves on. A second sweep with no exchange change writes nothing.
pub struct Reconciler {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn TradeStore>,
    ledger: Arc<WalletLedger>,
    cache: Arc<dyn CacheInvalidator>,
    notifier: Arc<dyn Notifier>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn TradeStore>,
        ledger: Arc<WalletLedger>,
        cache: Arc<dyn CacheInvalidator>,
        notifier: Arc<dyn Notifier>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            exchange,
            store,
            ledger,
            cache,
            notifier,
            config,
        }
    }

    async fn log(&self, trade_id: i64, event: TradeEvent, message: String, details: serde_json::Value) {
        let entry = NewTradeLog::new(trade_id, event, message).with_details(details);
        if let Err(e) = self.store.append_log(entry).await {
            tracing::error!(trade_id, "Failed to append trade log: {}", e);
        }
    }

    pub async fn run_sweep(&self) -> EngineResult<SweepReport> {
        let trades = self.store.open_trades().await?;
        let mut report = SweepReport::default();

        for trade in trades {
            report.checked += 1;
            let trade_id = trade.id;
            let symbol = trade.symbol.clone();

            if let Err(e) = self.reconcile_trade(trade, &mut report).await {
                tracing::error!(trade_id, symbol = %symbol, "Reconciliation failed: {}", e);
                self.log(
                    trade_id,
                    TradeEvent::Error,
                    format!("Reconciliation failed: {}", e),
                    serde_json::Value::Null,
                )
                .await;
                report.errors.push((trade_id, e.to_string()));
            }
        }

        if report.checked > 0 {
            tracing::info!(
                "🔄 Reconciled {} open trade(s): {} fill(s), {} closed, {} unverified, {} error(s)",
                report.checked,
                report.filled_slots,
                report.closed.len(),
                report.validation_failures,
                report.errors.len()
            );
        }

        Ok(report)
    }

    /// Reconcile one trade by id; closed trades are left untouched
    pub async fn reconcile_trade_by_id(&self, trade_id: i64) -> EngineResult<SweepReport> {
        let trade = self.store.get_trade(trade_id).await?;
        let mut report = SweepReport::default();
        if trade.is_open() {
            report.checked = 1;
            self.reconcile_trade(trade, &mut report).await?;
        }
        Ok(report)
    }

    async fn reconcile_trade(&self, mut trade: Trade, report: &mut SweepReport) -> EngineResult<()> {
        let mut orders = self.store.orders_by_trade(trade.id).await?;
        let mut dirty_orders: Vec<usize> = Vec::new();
        let mut trade_changed = false;
        let mut market: Option<Decimal> = None;
        // Appended only once the rows they describe are committed
        let mut pending_logs: Vec<NewTradeLog> = Vec::new();

        for slot in trade.unresolved_slots() {
            let idx = match order_for_role(&orders, slot.role())
                .and_then(|found| orders.iter().position(|o| o.id == found.id))
            {
                Some(idx) => idx,
                None => continue,
            };

            match orders[idx].status {
                // Confirmed earlier (sync or repair) but the trade row lagged
                OrderStatus::Filled => {
                    trade.set_tp_status(slot, TpStatus::Filled);
                    trade.set_tp_executed_qty(slot, orders[idx].executed_qty);
                    trade_changed = true;
                    report.filled_slots += 1;
                    continue;
                }
                // Left for orphan repair
                OrderStatus::Cancelled => continue,
                OrderStatus::New | OrderStatus::PartiallyFilled => {}
            }

            let live = match self
                .exchange
                .order_status(&trade.symbol, orders[idx].remote_order_id)
                .await
            {
                Ok(live) => live,
                Err(ExchangeError::NotFound(msg)) => {
                    tracing::debug!(
                        trade_id = trade.id,
                        order_id = orders[idx].remote_order_id,
                        "{} order not found on exchange: {}",
                        slot,
                        msg
                    );
                    report.not_found += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if live.status != OrderStatus::Filled {
                if apply_report(&mut orders[idx], &live) {
                    dirty_orders.push(idx);
                    report.synced_orders += 1;
                    if live.status == OrderStatus::Cancelled {
                        tracing::warn!(
                            trade_id = trade.id,
                            order_id = live.remote_order_id,
                            "⚠️  {} was cancelled on the exchange, slot left for repair",
                            slot
                        );
                    }
                    pending_logs.push(
                        NewTradeLog::new(
                            trade.id,
                            TradeEvent::OrderSynced,
                            format!("{} now {} ({} executed)", slot, live.status, live.executed_qty),
                        )
                        .with_details(json!({ "remote_order_id": live.remote_order_id })),
                    );
                }
                continue;
            }

            let target = match orders[idx].target_price() {
                Some(target) => target,
                None => {
                    tracing::warn!(trade_id = trade.id, "{} order has no target price", slot);
                    continue;
                }
            };

            let price = match market {
                Some(price) => price,
                None => {
                    let price = self.exchange.ticker_price(&trade.symbol).await?;
                    market = Some(price);
                    price
                }
            };

            if !fill_is_plausible(target, price, self.config.fill_tolerance) {
                report.validation_failures += 1;
                tracing::warn!(
                    trade_id = trade.id,
                    order_id = live.remote_order_id,
                    "⚠️  {} reported FILLED at {} but market is {} (threshold {}), not trusting it",
                    slot,
                    target,
                    price,
                    validation_threshold(target, self.config.fill_tolerance)
                );
                self.log(
                    trade.id,
                    TradeEvent::FillValidationFailed,
                    format!("{} fill at {} not confirmed by market {}", slot, target, price),
                    json!({ "target": target, "market": price }),
                )
                .await;
                continue;
            }

            apply_report(&mut orders[idx], &live);
            if orders[idx].avg_fill_price.is_none() {
                orders[idx].avg_fill_price = Some(target);
            }
            dirty_orders.push(idx);

            trade.set_tp_status(slot, TpStatus::Filled);
            trade.set_tp_executed_qty(slot, live.executed_qty);
            trade_changed = true;
            report.filled_slots += 1;

            tracing::info!(
                trade_id = trade.id,
                order_id = live.remote_order_id,
                "✅ {} filled: {} @ {}",
                slot,
                live.executed_qty,
                orders[idx].avg_fill_price.unwrap_or(target)
            );
            pending_logs.push(
                NewTradeLog::new(
                    trade.id,
                    TradeEvent::TakeProfitFilled,
                    format!("{} filled: {} @ {}", slot, live.executed_qty, orders[idx].avg_fill_price.unwrap_or(target)),
                )
                .with_details(json!({ "remote_order_id": live.remote_order_id, "market": price })),
            );
        }

        // Non-terminal entry orders are kept in sync too
        for idx in 0..orders.len() {
            if orders[idx].role != OrderRole::Entry || orders[idx].status.is_terminal() {
                continue;
            }
            match self
                .exchange
                .order_status(&trade.symbol, orders[idx].remote_order_id)
                .await
            {
                Ok(live) => {
                    if apply_report(&mut orders[idx], &live) {
                        dirty_orders.push(idx);
                        report.synced_orders += 1;
                    }
                }
                Err(ExchangeError::NotFound(_)) => report.not_found += 1,
                Err(e) => return Err(e.into()),
            }
        }

        if !trade_changed && dirty_orders.is_empty() {
            return Ok(());
        }

        dirty_orders.sort_unstable();
        dirty_orders.dedup();
        let changed: Vec<Order> = dirty_orders.iter().map(|&i| orders[i].clone()).collect();

        let closing = trade_changed && trade.all_slots_resolved();
        if closing {
            let fills = slot_fills(&trade, &orders);
            let settlement = settle(trade.investment, &fills, trade.entry_price);
            close_trade(&mut trade, ExitType::TakeProfit, &settlement, Utc::now());
        }

        self.store.commit_trade(&trade, &changed).await?;
        self.cache.invalidate_tables(&TRADE_TABLES).await;
        for entry in pending_logs {
            if let Err(e) = self.store.append_log(entry).await {
                tracing::error!(trade_id = trade.id, "Failed to append trade log: {}", e);
            }
        }

        if closing {
            report.closed.push(trade.id);
            self.on_closed(&trade).await;
        } else if trade_changed {
            tracing::info!(trade_id = trade.id, "Trade {} now {}", trade.id, stage(&trade, &orders));
        }

        Ok(())
    }

    async fn on_closed(&self, trade: &Trade) {
        let profit = trade.profit_loss.unwrap_or_default();
        let percent = trade.profit_loss_percent.unwrap_or_default();
        let exit = trade.exit_price.unwrap_or_default();

        tracing::info!(
            trade_id = trade.id,
            symbol = %trade.symbol,
            "💰 Trade closed @ {}: P&L {} ({}%)",
            exit,
            profit,
            percent
        );
        self.log(
            trade.id,
            TradeEvent::Closed,
            format!("Closed @ {} with P&L {} ({}%)", exit, profit, percent),
            json!({ "exit_price": exit, "profit_loss": profit, "profit_loss_percent": percent }),
        )
        .await;

        match wallet_balance(self.exchange.as_ref(), &self.config.quote_asset).await {
            Ok(balance) => {
                if let Err(e) = self.ledger.snapshot_after_trade(trade.id, balance).await {
                    tracing::warn!(trade_id = trade.id, "After-trade snapshot failed: {}", e);
                }
            }
            Err(e) => tracing::warn!(trade_id = trade.id, "Balance for snapshot unavailable: {}", e),
        }

        self.notifier.notify(Notification::new(
            trade.id,
            &trade.symbol,
            TradeEvent::Closed,
            format!("Closed @ {}: P&L {} ({}%)", exit, profit, percent),
        ));
    }

    /// Sweep on a fixed interval until the task is dropped
    pub async fn run_forever(&self, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_sweep().await {
                tracing::error!("Reconciliation sweep failed: {}", e);
            }
        }
    }
}
