use crate::models::{ExitType, Order, OrderRole, OrderStatus, TpSlot, TpStatus, Trade, TradeStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::fmt;

/// Where a trade sits in its exit ladder
///
/// Derived from persisted state only; the executor never advances it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TradeStage {
    /// Entry done (or pending) with no live take-profit order
    Opened,
    Tp1Pending,
    Tp1Filled,
    Tp2Pending,
    Tp2Filled,
    Closed,
}

impl fmt::Display for TradeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeStage::Opened => "opened",
            TradeStage::Tp1Pending => "tp1-pending",
            TradeStage::Tp1Filled => "tp1-filled",
            TradeStage::Tp2Pending => "tp2-pending",
            TradeStage::Tp2Filled => "tp2-filled",
            TradeStage::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Most relevant order for a role: the latest filled one, else the latest one
pub fn order_for_role(orders: &[Order], role: OrderRole) -> Option<&Order> {
    orders
        .iter()
        .rev()
        .filter(|o| o.role == role)
        .find(|o| o.status == OrderStatus::Filled)
        .or_else(|| orders.iter().rev().find(|o| o.role == role))
}

/// A take-profit slot counts as present when it has a filled or live order
pub fn slot_present(orders: &[Order], slot: TpSlot) -> bool {
    order_for_role(orders, slot.role())
        .map(|o| o.status != OrderStatus::Cancelled)
        .unwrap_or(false)
}

pub fn stage(trade: &Trade, orders: &[Order]) -> TradeStage {
    if trade.status == TradeStatus::Closed {
        return TradeStage::Closed;
    }

    let tp1_filled = trade.tp1_status == TpStatus::Filled;
    let tp2_planned = trade.is_configured(TpSlot::Tp2);

    if !tp1_filled {
        if slot_present(orders, TpSlot::Tp1) {
            return TradeStage::Tp1Pending;
        }
        return TradeStage::Opened;
    }

    if !tp2_planned {
        return TradeStage::Tp1Filled;
    }

    match trade.tp2_status {
        TpStatus::Filled => TradeStage::Tp2Filled,
        _ if slot_present(orders, TpSlot::Tp2) => TradeStage::Tp2Pending,
        _ => TradeStage::Tp1Filled,
    }
}

/// Exit figures for a trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Settlement {
    pub sold_qty: Decimal,
    pub revenue: Decimal,
    pub exit_price: Decimal,
    pub profit_loss: Decimal,
    pub profit_loss_percent: Decimal,
}

/// Aggregate `(quantity, price)` fills against the invested amount
///
/// Exit price is the quantity-weighted average. With nothing sold the exit
/// price falls back to `fallback_price` and the whole investment is the loss.
pub fn settle(investment: Decimal, fills: &[(Decimal, Decimal)], fallback_price: Decimal) -> Settlement {
    let sold_qty: Decimal = fills.iter().map(|(q, _)| *q).sum();
    let revenue: Decimal = fills.iter().map(|(q, p)| q * p).sum();

    let exit_price = if sold_qty > Decimal::ZERO {
        (revenue / sold_qty).round_dp(8)
    } else {
        fallback_price
    };

    let profit_loss = revenue - investment;
    let profit_loss_percent = if investment > Decimal::ZERO {
        (profit_loss / investment * dec!(100)).round_dp(4)
    } else {
        Decimal::ZERO
    };

    Settlement {
        sold_qty,
        revenue,
        exit_price,
        profit_loss,
        profit_loss_percent,
    }
}

/// `(quantity, price)` of every filled take-profit slot
pub fn slot_fills(trade: &Trade, orders: &[Order]) -> Vec<(Decimal, Decimal)> {
    TpSlot::ALL
        .into_iter()
        .filter(|slot| trade.tp_status(*slot) == TpStatus::Filled)
        .filter_map(|slot| {
            let order = order_for_role(orders, slot.role())?;
            let qty = trade.tp_executed_qty(slot).unwrap_or(order.executed_qty);
            let price = order.fill_price()?;
            Some((qty, price))
        })
        .collect()
}

/// Mark a trade closed with the given figures
pub fn close_trade(trade: &mut Trade, exit_type: ExitType, settlement: &Settlement, now: DateTime<Utc>) {
    trade.status = TradeStatus::Closed;
    trade.exit_price = Some(settlement.exit_price);
    trade.profit_loss = Some(settlement.profit_loss);
    trade.profit_loss_percent = Some(settlement.profit_loss_percent);
    trade.exit_type = Some(exit_type);
    trade.closed_at = Some(now);
}

/// Close a trade that never held a position: exit at the reference price, zero P&L
pub fn close_flat(trade: &mut Trade, exit_type: ExitType, now: DateTime<Utc>) {
    for slot in trade.unresolved_slots() {
        trade.set_tp_status(slot, TpStatus::Cancelled);
    }
    let settlement = Settlement {
        sold_qty: Decimal::ZERO,
        revenue: Decimal::ZERO,
        exit_price: trade.entry_price,
        profit_loss: Decimal::ZERO,
        profit_loss_percent: Decimal::ZERO,
    };
    close_trade(trade, exit_type, &settlement, now);
}
