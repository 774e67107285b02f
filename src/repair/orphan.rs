use crate::api::{Exchange, FilterCache};
use crate::cache::{CacheInvalidator, TRADE_TABLES};
use crate::db::TradeStore;
use crate::execution::lifecycle::{close_trade, order_for_role, settle, slot_fills, slot_present, stage, TradeStage};
use crate::execution::executor::order_row;
use crate::execution::{client_order_id, EngineError, EngineResult};
use crate::models::{ExitType, NewTradeLog, Order, OrderRole, TpSlot, TpStatus, Trade, TradeEvent};
use crate::notify::{Notification, Notifier};
use crate::repair::{BatchReport, Target};
use crate::sizing::floor_to_step;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrphanClass {
    /// Entry and every required take-profit present
    Ok,
    /// Entry only, no take-profit order at all
    OrphanTotal,
    /// Some take-profit present, another planned but missing
    OrphanPartial,
    /// No filled entry order on record
    NoEntry,
}

impl fmt::Display for OrphanClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrphanClass::Ok => "ok",
            OrphanClass::OrphanTotal => "orphan-total",
            OrphanClass::OrphanPartial => "orphan-partial",
            OrphanClass::NoEntry => "no-entry",
        };
        f.write_str(s)
    }
}

/// Class plus the unresolved slots that have no live or filled order
pub fn classify(trade: &Trade, orders: &[Order]) -> (OrphanClass, Vec<TpSlot>) {
    let has_entry = orders
        .iter()
        .any(|o| o.role == OrderRole::Entry && o.executed_qty > Decimal::ZERO);
    if !has_entry {
        return (OrphanClass::NoEntry, Vec::new());
    }

    let missing: Vec<TpSlot> = trade
        .unresolved_slots()
        .into_iter()
        .filter(|slot| !slot_present(orders, *slot))
        .collect();

    if missing.is_empty() {
        return (OrphanClass::Ok, missing);
    }

    let any_present = trade
        .configured_slots()
        .into_iter()
        .any(|slot| trade.tp_status(slot) == TpStatus::Filled || slot_present(orders, slot));

    if any_present {
        (OrphanClass::OrphanPartial, missing)
    } else {
        (OrphanClass::OrphanTotal, missing)
    }
}

#[derive(Debug, Clone)]
pub struct TradeClassification {
    pub trade: Trade,
    pub orders: Vec<Order>,
    pub class: OrphanClass,
    pub missing: Vec<TpSlot>,
    pub stage: TradeStage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RepairAction {
    PlaceTakeProfit {
        slot: TpSlot,
        quantity: Decimal,
        price: Decimal,
    },
    /// Market already beyond the target: sell instead of resting a limit
    MarketSell {
        slots: Vec<(TpSlot, Decimal)>,
        quantity: Decimal,
        market: Decimal,
    },
}

impl fmt::Display for RepairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairAction::PlaceTakeProfit { slot, quantity, price } => {
                write!(f, "place {} take-profit {} @ {}", slot, quantity, price)
            }
            RepairAction::MarketSell { slots, quantity, market } => {
                let names: Vec<String> = slots.iter().map(|(s, _)| s.to_string()).collect();
                write!(
                    f,
                    "market-sell {} @ ~{} for {} (target already crossed)",
                    quantity,
                    market,
                    names.join("+")
                )
            }
        }
    }
}

/// Detects trades missing take-profit orders and recreates or replaces them
pub struct OrphanRepair {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn TradeStore>,
    filters: FilterCache,
    cache: Arc<dyn CacheInvalidator>,
    notifier: Arc<dyn Notifier>,
    tp1_fraction: Decimal,
}

impl OrphanRepair {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn TradeStore>,
        filters: FilterCache,
        cache: Arc<dyn CacheInvalidator>,
        notifier: Arc<dyn Notifier>,
        tp1_fraction: Decimal,
    ) -> Self {
        Self {
            exchange,
            store,
            filters,
            cache,
            notifier,
            tp1_fraction,
        }
    }

    pub async fn classify_open(&self, target: &Target) -> EngineResult<Vec<TradeClassification>> {
        let mut out = Vec::new();
        for trade in self.store.open_trades().await? {
            if !target.matches(&trade) {
                continue;
            }
            let orders = self.store.orders_by_trade(trade.id).await?;
            let (class, missing) = classify(&trade, &orders);
            let trade_stage = stage(&trade, &orders);
            out.push(TradeClassification {
                trade,
                orders,
                class,
                missing,
                stage: trade_stage,
            });
        }
        Ok(out)
    }

    /// Quantity the ladder intended for `slot`
    fn planned_qty(&self, trade: &Trade, orders: &[Order], slot: TpSlot, step: Decimal) -> Decimal {
        if let Some(previous) = order_for_role(orders, slot.role()) {
            return previous.quantity;
        }

        if !trade.is_configured(TpSlot::Tp2) {
            return trade.quantity;
        }

        let tp1 = floor_to_step(trade.quantity * self.tp1_fraction, step);
        match slot {
            TpSlot::Tp1 => tp1,
            TpSlot::Tp2 => trade.quantity - tp1,
        }
    }

    /// Decide what to submit for one orphan; reads the exchange but never writes
    pub async fn plan(&self, c: &TradeClassification) -> EngineResult<Vec<RepairAction>> {
        if c.missing.is_empty() {
            return Ok(Vec::new());
        }

        let trade = &c.trade;
        let filter = self.filters.get(self.exchange.as_ref(), &trade.symbol).await?;
        let held = self.exchange.balance(&filter.base_asset).await?.total();
        let market = self.exchange.ticker_price(&trade.symbol).await?;
        let step = filter.step_size;

        let mut remaining = held;
        let mut legs = Vec::new();
        for slot in &c.missing {
            let planned = self.planned_qty(trade, &c.orders, *slot, step);
            let qty = floor_to_step(planned.min(remaining), step);
            remaining -= qty;
            if qty > Decimal::ZERO {
                if let Some(price) = trade.tp_price(*slot) {
                    legs.push((*slot, qty, price));
                }
            }
        }

        if legs.is_empty() {
            return Ok(Vec::new());
        }

        if c.class == OrphanClass::OrphanTotal {
            let lowest = legs.iter().map(|(_, _, p)| *p).min().unwrap_or(Decimal::MAX);
            if market >= lowest {
                let quantity: Decimal = legs.iter().map(|(_, q, _)| *q).sum();
                return Ok(vec![RepairAction::MarketSell {
                    slots: legs.iter().map(|(s, q, _)| (*s, *q)).collect(),
                    quantity,
                    market,
                }]);
            }
        }

        Ok(legs
            .into_iter()
            .map(|(slot, quantity, price)| {
                if market >= price {
                    RepairAction::MarketSell {
                        slots: vec![(slot, quantity)],
                        quantity,
                        market,
                    }
                } else {
                    RepairAction::PlaceTakeProfit { slot, quantity, price }
                }
            })
            .collect())
    }

    /// Classify targets and repair orphans; with `dry_run` only report the plan
    pub async fn repair(&self, target: &Target, dry_run: bool) -> EngineResult<BatchReport> {
        let mut report = BatchReport::default();
        let mut mutated = false;

        for c in self.classify_open(target).await? {
            let label = format!("trade {} ({})", c.trade.id, c.trade.symbol);
            match c.class {
                OrphanClass::Ok => continue,
                OrphanClass::NoEntry => {
                    report.error(format!(
                        "{}: no filled entry order on record, inspect manually or liquidate",
                        label
                    ));
                    continue;
                }
                OrphanClass::OrphanTotal | OrphanClass::OrphanPartial => {}
            }

            let actions = match self.plan(&c).await {
                Ok(actions) => actions,
                Err(e) => {
                    report.error(format!("{}: planning failed: {}", label, e));
                    continue;
                }
            };

            if actions.is_empty() {
                report.error(format!("{}: {} but no base balance left to cover it", label, c.class));
                continue;
            }

            for action in actions {
                if dry_run {
                    report.success(format!("[dry-run] {} ({}): would {}", label, c.class, action));
                    continue;
                }

                match self.apply(c.trade.id, &action).await {
                    Ok(message) => {
                        mutated = true;
                        self.notifier.notify(Notification::new(
                            c.trade.id,
                            &c.trade.symbol,
                            TradeEvent::Repaired,
                            message.clone(),
                        ));
                        report.success(format!("{}: {}", label, message));
                    }
                    Err(e) => report.error(format!("{}: {} failed: {}", label, action, e)),
                }
            }
        }

        if mutated {
            self.cache.invalidate_tables(&TRADE_TABLES).await;
        }

        Ok(report)
    }

    async fn apply(&self, trade_id: i64, action: &RepairAction) -> EngineResult<String> {
        // Fresh read right before submitting; another process may have repaired it
        let mut trade = self.store.get_trade(trade_id).await?;
        if !trade.is_open() {
            return Err(EngineError::Rejected(format!(
                "concurrent repair detected: trade {} already closed",
                trade_id
            )));
        }
        let orders = self.store.orders_by_trade(trade_id).await?;
        let slots: Vec<TpSlot> = match action {
            RepairAction::PlaceTakeProfit { slot, .. } => vec![*slot],
            RepairAction::MarketSell { slots, .. } => slots.iter().map(|(s, _)| *s).collect(),
        };
        if let Some(slot) = slots
            .iter()
            .find(|s| slot_present(&orders, **s) || trade.tp_status(**s).is_resolved())
        {
            return Err(EngineError::Rejected(format!(
                "concurrent repair detected: {} of trade {} appeared since classification",
                slot, trade_id
            )));
        }

        match action {
            RepairAction::PlaceTakeProfit { slot, quantity, price } => {
                let role = slot.role();
                let client_id = client_order_id(trade_id, role.as_str());
                let report = self
                    .exchange
                    .take_profit_sell(&trade.symbol, *quantity, *price, &client_id)
                    .await?;
                self.store.insert_order(trade_id, order_row(&report, role)).await?;

                let message = format!("placed {} {} @ {}", slot, quantity, price);
                self.log(trade_id, &message, json!({ "remote_order_id": report.remote_order_id }))
                    .await;
                Ok(message)
            }
            RepairAction::MarketSell {
                slots,
                quantity,
                market,
            } => {
                let first = slots
                    .first()
                    .map(|(s, _)| *s)
                    .ok_or_else(|| EngineError::Rejected("market sell without slots".to_string()))?;
                let client_id = client_order_id(trade_id, "repair");
                let report = self.exchange.market_sell(&trade.symbol, *quantity, &client_id).await?;
                let realized = report.avg_price().unwrap_or(*market);

                let mut row = order_row(&report, first.role());
                row.avg_fill_price = Some(realized);
                self.store.insert_order(trade_id, row).await?;

                // Slots resolved before this sale keep their own fills
                let mut fills = slot_fills(&trade, &orders);

                // Share the sale across slots; the last one absorbs any shortfall
                let mut left = report.executed_qty;
                for (i, (slot, planned)) in slots.iter().enumerate() {
                    let share = if i + 1 == slots.len() { left } else { (*planned).min(left) };
                    left -= share;
                    trade.set_tp_status(*slot, TpStatus::Filled);
                    trade.set_tp_executed_qty(*slot, share);
                }
                fills.push((report.executed_qty, realized));

                let mut message = format!("market-sold {} @ {}", report.executed_qty, realized);
                if trade.all_slots_resolved() {
                    let settlement = settle(trade.investment, &fills, realized);
                    close_trade(&mut trade, ExitType::RepairMarketSell, &settlement, Utc::now());
                    message.push_str(&format!(
                        ", trade closed with P&L {} ({}%)",
                        settlement.profit_loss, settlement.profit_loss_percent
                    ));
                }

                self.store.commit_trade(&trade, &[]).await?;
                self.log(
                    trade_id,
                    &message,
                    json!({ "remote_order_id": report.remote_order_id, "realized": realized }),
                )
                .await;
                Ok(message)
            }
        }
    }

    async fn log(&self, trade_id: i64, message: &str, details: serde_json::Value) {
        let entry = NewTradeLog::new(trade_id, TradeEvent::Repaired, message).with_details(details);
        if let Err(e) = self.store.append_log(entry).await {
            tracing::error!(trade_id, "Failed to append trade log: {}", e);
        }
    }
}
