// Operator tools for inconsistent or unwanted open positions
pub mod liquidator;
pub mod orphan;

pub use liquidator::EmergencyLiquidator;
pub use orphan::{classify, OrphanClass, OrphanRepair, RepairAction, TradeClassification};

use crate::models::Trade;
use serde::Serialize;
use std::fmt;

/// Which open trades a tool acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Symbol(String),
    TradeId(i64),
}

impl Target {
    pub fn matches(&self, trade: &Trade) -> bool {
        match self {
            Target::All => true,
            Target::Symbol(symbol) => trade.symbol.eq_ignore_ascii_case(symbol),
            Target::TradeId(id) => trade.id == *id,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => write!(f, "all open trades"),
            Target::Symbol(symbol) => write!(f, "symbol {}", symbol),
            Target::TradeId(id) => write!(f, "trade {}", id),
        }
    }
}

/// Parallel success / error lists; one failure never aborts the batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub successes: Vec<String>,
    pub errors: Vec<String>,
}

impl BatchReport {
    pub fn success(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("✅ {}", message);
        self.successes.push(message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("❌ {}", message);
        self.errors.push(message);
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn print(&self) {
        println!("\n=== Successes ({}) ===", self.successes.len());
        for s in &self.successes {
            println!("  ✅ {}", s);
        }
        println!("\n=== Errors ({}) ===", self.errors.len());
        for e in &self.errors {
            println!("  ❌ {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TpStatus, TradeStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_target_matching() {
        let trade = Trade {
            id: 5,
            symbol: "ETHUSDT".to_string(),
            status: TradeStatus::Open,
            entry_price: dec!(3000),
            quantity: dec!(0.01),
            investment: dec!(30),
            take_profit_1_price: Some(dec!(3100)),
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
        };

        assert!(Target::All.matches(&trade));
        assert!(Target::Symbol("ethusdt".to_string()).matches(&trade));
        assert!(!Target::Symbol("BTCUSDT".to_string()).matches(&trade));
        assert!(Target::TradeId(5).matches(&trade));
        assert!(!Target::TradeId(6).matches(&trade));
    }

    #[test]
    fn test_batch_report_collects_both_lists() {
        let mut report = BatchReport::default();
        report.success("sold BTCUSDT");
        report.error("ETHUSDT: insufficient balance");
        report.success("closed trade 3");

        assert_eq!(report.successes.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert!(!report.is_clean());
    }
}
