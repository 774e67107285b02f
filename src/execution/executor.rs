use crate::api::{Exchange, ExchangeError, OrderReport};
use crate::cache::{CacheInvalidator, TRADE_TABLES};
use crate::db::TradeStore;
use crate::execution::lifecycle::close_flat;
use crate::execution::{client_order_id, EngineResult};
use crate::models::{
    ExitType, NewOrder, NewTrade, NewTradeLog, Order, OrderRole, SymbolFilter, Trade, TradeEvent,
};
use crate::notify::{Notification, Notifier};
use crate::sizing::{floor_to_step, Ladder, OrderSizer, SizedOrder};
use crate::wallet::{wallet_balance, WalletLedger};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;

/// What happened to a sized signal
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Entry filled and every take-profit leg is resting on the exchange
    Protected {
        trade: Trade,
        entry: Order,
        take_profits: Vec<Order>,
    },
    /// Entry filled but at least one take-profit leg was not placed
    Orphaned {
        trade: Trade,
        entry: Order,
        take_profits: Vec<Order>,
        failures: Vec<String>,
    },
    /// Exchange refused the entry; trade closed flat
    EntryRejected { trade: Trade, reason: String },
    /// Entry outcome unknown after a transient failure; trade left open
    EntryPending { trade: Trade, reason: String },
}

impl ExecutionOutcome {
    pub fn trade(&self) -> &Trade {
        match self {
            ExecutionOutcome::Protected { trade, .. }
            | ExecutionOutcome::Orphaned { trade, .. }
            | ExecutionOutcome::EntryRejected { trade, .. }
            | ExecutionOutcome::EntryPending { trade, .. } => trade,
        }
    }
}

pub(crate) fn order_row(report: &OrderReport, role: OrderRole) -> NewOrder {
    NewOrder {
        remote_order_id: report.remote_order_id,
        remote_client_order_id: report.client_order_id.clone(),
        symbol: report.symbol.clone(),
        side: report.side,
        order_type: report.order_type,
        role,
        price: report.price,
        stop_price: report.stop_price,
        quantity: report.orig_qty,
        executed_qty: report.executed_qty,
        avg_fill_price: report.avg_price(),
        status: report.status,
        raw_response: report.raw.clone(),
    }
}

/// Turns a sized signal into a trade with an entry and its take-profit ladder
///
/// The trade row is written before any exchange call. Take-profit failures are
/// logged against the trade and left for orphan repair; nothing is retried here.
pub struct TradeExecutor {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn TradeStore>,
    ledger: Arc<WalletLedger>,
    sizer: Arc<OrderSizer>,
    cache: Arc<dyn CacheInvalidator>,
    notifier: Arc<dyn Notifier>,
}

impl TradeExecutor {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn TradeStore>,
        ledger: Arc<WalletLedger>,
        sizer: Arc<OrderSizer>,
        cache: Arc<dyn CacheInvalidator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            exchange,
            store,
            ledger,
            sizer,
            cache,
            notifier,
        }
    }

    async fn log(&self, trade: &Trade, event: TradeEvent, message: String, details: serde_json::Value) {
        let entry = NewTradeLog::new(trade.id, event, message).with_details(details);
        if let Err(e) = self.store.append_log(entry).await {
            tracing::error!(trade_id = trade.id, "Failed to append trade log: {}", e);
        }
    }

    pub async fn execute(&self, sized: &SizedOrder, filter: &SymbolFilter) -> EngineResult<ExecutionOutcome> {
        let mut trade = self
            .store
            .insert_trade(NewTrade {
                symbol: sized.symbol.clone(),
                entry_price: sized.entry_price,
                quantity: sized.quantity,
                investment: sized.investment,
                take_profit_1_price: Some(sized.take_profit_1_price),
                take_profit_2_price: Some(sized.take_profit_2_price),
                opened_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            trade_id = trade.id,
            symbol = %trade.symbol,
            "📝 Trade opened: {} @ {} (budget {})",
            sized.quantity,
            sized.entry_price,
            sized.investment
        );
        self.log(
            &trade,
            TradeEvent::Opened,
            format!("Signal sized to {} @ {}", sized.quantity, sized.entry_price),
            serde_json::to_value(sized).unwrap_or_default(),
        )
        .await;

        match wallet_balance(self.exchange.as_ref(), &filter.quote_asset).await {
            Ok(balance) => {
                if let Err(e) = self.ledger.snapshot_before_trade(trade.id, balance).await {
                    tracing::warn!(trade_id = trade.id, "Before-trade snapshot failed: {}", e);
                }
            }
            Err(e) => tracing::warn!(trade_id = trade.id, "Balance for snapshot unavailable: {}", e),
        }

        let entry_id = client_order_id(trade.id, OrderRole::Entry.as_str());
        let report = match self.exchange.market_buy(&sized.symbol, sized.quantity, &entry_id).await {
            Ok(report) if report.executed_qty > Decimal::ZERO => report,
            Ok(report) => {
                let reason = format!("Entry order {} executed nothing ({})", report.remote_order_id, report.status);
                return self.reject_entry(trade, reason).await;
            }
            Err(e @ ExchangeError::Transient(_)) => {
                let reason = e.to_string();
                tracing::warn!(
                    trade_id = trade.id,
                    "⚠️  Entry outcome unknown for {}: {}",
                    trade.symbol,
                    reason
                );
                self.log(
                    &trade,
                    TradeEvent::EntryFailed,
                    format!("Transient entry failure: {}", reason),
                    json!({ "client_order_id": entry_id }),
                )
                .await;
                return Ok(ExecutionOutcome::EntryPending { trade, reason });
            }
            Err(e) => return self.reject_entry(trade, e.to_string()).await,
        };

        // Position figures come from the fill, not from the sizing estimate
        let commission = report.commission_in(&filter.base_asset);
        let settled = floor_to_step(report.executed_qty - commission, filter.step_size);
        trade.entry_price = report.avg_price().unwrap_or(sized.entry_price);
        trade.investment = if report.cumulative_quote_qty > Decimal::ZERO {
            report.cumulative_quote_qty
        } else {
            report.executed_qty * trade.entry_price
        };
        trade.quantity = settled;

        let entry = self.store.insert_order(trade.id, order_row(&report, OrderRole::Entry)).await?;
        tracing::info!(
            trade_id = trade.id,
            order_id = report.remote_order_id,
            "✅ Entry filled: {} {} @ {} (settled {})",
            report.executed_qty,
            trade.symbol,
            trade.entry_price,
            settled
        );
        self.log(
            &trade,
            TradeEvent::EntryFilled,
            format!("Bought {} @ {}, settled {}", report.executed_qty, trade.entry_price, settled),
            json!({
                "remote_order_id": report.remote_order_id,
                "executed_qty": report.executed_qty,
                "commission": commission,
                "cumulative_quote_qty": report.cumulative_quote_qty,
            }),
        )
        .await;

        let ladder: Ladder = self.sizer.ladder(
            settled,
            sized.take_profit_1_price,
            sized.take_profit_2_price,
            filter.step_size,
        );
        trade.take_profit_1_price = Some(ladder.tp1.price);
        trade.take_profit_2_price = ladder.tp2.map(|leg| leg.price);
        self.store.save_trade(&trade).await?;

        let mut legs = vec![(OrderRole::Tp1, ladder.tp1)];
        if let Some(tp2) = ladder.tp2 {
            legs.push((OrderRole::Tp2, tp2));
        }

        let mut take_profits = Vec::new();
        let mut failures = Vec::new();

        for (role, leg) in legs {
            let client_id = client_order_id(trade.id, role.as_str());
            match self
                .exchange
                .take_profit_sell(&trade.symbol, leg.quantity, leg.price, &client_id)
                .await
            {
                Ok(report) => {
                    let order = self.store.insert_order(trade.id, order_row(&report, role)).await?;
                    tracing::info!(
                        trade_id = trade.id,
                        order_id = report.remote_order_id,
                        "🎯 {} placed: {} @ {}",
                        role,
                        leg.quantity,
                        leg.price
                    );
                    self.log(
                        &trade,
                        TradeEvent::TakeProfitPlaced,
                        format!("{} placed: {} @ {}", role, leg.quantity, leg.price),
                        json!({ "remote_order_id": report.remote_order_id }),
                    )
                    .await;
                    take_profits.push(order);
                }
                Err(e) => {
                    tracing::error!(
                        trade_id = trade.id,
                        "❌ {} placement failed for {}: {}",
                        role,
                        trade.symbol,
                        e
                    );
                    self.log(
                        &trade,
                        TradeEvent::TakeProfitFailed,
                        format!("{} placement failed: {}", role, e),
                        json!({ "quantity": leg.quantity, "price": leg.price }),
                    )
                    .await;
                    failures.push(format!("{}: {}", role, e));
                }
            }
        }

        self.cache.invalidate_tables(&TRADE_TABLES).await;

        if failures.is_empty() {
            self.notifier.notify(Notification::new(
                trade.id,
                &trade.symbol,
                TradeEvent::EntryFilled,
                format!(
                    "Bought {} {} @ {} with {} take-profit order(s)",
                    trade.quantity,
                    trade.symbol,
                    trade.entry_price,
                    take_profits.len()
                ),
            ));
            Ok(ExecutionOutcome::Protected {
                trade,
                entry,
                take_profits,
            })
        } else {
            tracing::warn!(
                trade_id = trade.id,
                "⚠️  Trade {} is orphaned ({} leg(s) missing), run orphan repair",
                trade.id,
                failures.len()
            );
            self.notifier.notify(Notification::new(
                trade.id,
                &trade.symbol,
                TradeEvent::TakeProfitFailed,
                format!("Orphaned trade: {}", failures.join("; ")),
            ));
            Ok(ExecutionOutcome::Orphaned {
                trade,
                entry,
                take_profits,
                failures,
            })
        }
    }

    async fn reject_entry(&self, mut trade: Trade, reason: String) -> EngineResult<ExecutionOutcome> {
        tracing::error!(
            trade_id = trade.id,
            "❌ Entry rejected for {}: {}",
            trade.symbol,
            reason
        );

        close_flat(&mut trade, ExitType::EntryRejected, Utc::now());
        self.store.save_trade(&trade).await?;
        self.log(
            &trade,
            TradeEvent::EntryFailed,
            format!("Entry rejected: {}", reason),
            serde_json::Value::Null,
        )
        .await;
        self.cache.invalidate_tables(&TRADE_TABLES).await;
        self.notifier.notify(Notification::new(
            trade.id,
            &trade.symbol,
            TradeEvent::EntryFailed,
            format!("Entry rejected: {}", reason),
        ));

        Ok(ExecutionOutcome::EntryRejected { trade, reason })
    }
}
