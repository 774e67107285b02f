// Wallet snapshots around trade boundaries and total growth
use crate::api::{Exchange, ExchangeResult};
use crate::db::{StoreResult, TradeStore};
use crate::models::{NewWalletSnapshot, SnapshotType, WalletSnapshot};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;

/// Growth between the oldest and newest active snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GrowthReport {
    Growth {
        initial: Decimal,
        current: Decimal,
        difference: Decimal,
        growth_percent: Decimal,
    },
    InsufficientData {
        snapshots: i64,
    },
}

/// Quote balance used for snapshots: free plus locked in open orders
pub async fn wallet_balance(exchange: &dyn Exchange, quote_asset: &str) -> ExchangeResult<Decimal> {
    Ok(exchange.balance(quote_asset).await?.total())
}

fn growth_percent(previous: Decimal, current: Decimal) -> Option<Decimal> {
    if previous > Decimal::ZERO {
        Some(((current - previous) / previous * dec!(100)).round_dp(4))
    } else {
        None
    }
}

pub struct WalletLedger {
    store: Arc<dyn TradeStore>,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn TradeStore>) -> Self {
        Self { store }
    }

    pub async fn snapshot_before_trade(&self, trade_id: i64, balance: Decimal) -> StoreResult<WalletSnapshot> {
        self.record(SnapshotType::BeforeTrade, Some(trade_id), balance).await
    }

    pub async fn snapshot_after_trade(&self, trade_id: i64, balance: Decimal) -> StoreResult<WalletSnapshot> {
        self.record(SnapshotType::AfterTrade, Some(trade_id), balance).await
    }

    pub async fn snapshot_manual(&self, balance: Decimal) -> StoreResult<WalletSnapshot> {
        self.record(SnapshotType::Manual, None, balance).await
    }

    async fn record(
        &self,
        snapshot_type: SnapshotType,
        related_trade_id: Option<i64>,
        balance: Decimal,
    ) -> StoreResult<WalletSnapshot> {
        let previous_balance = self.store.latest_snapshot().await?.map(|s| s.balance);
        let growth = previous_balance.and_then(|prev| growth_percent(prev, balance));

        let snapshot = self
            .store
            .insert_snapshot(NewWalletSnapshot {
                balance,
                snapshot_type,
                related_trade_id,
                previous_balance,
                growth_percent: growth,
                timestamp: Utc::now(),
            })
            .await?;

        tracing::info!(
            "💰 Wallet snapshot ({}): {} (growth {})",
            snapshot_type,
            balance,
            growth.map(|g| format!("{}%", g)).unwrap_or_else(|| "n/a".to_string())
        );

        Ok(snapshot)
    }

    /// Growth from the first to the latest snapshot; needs at least two
    pub async fn total_growth(&self) -> StoreResult<GrowthReport> {
        let snapshots = self.store.snapshot_count().await?;
        if snapshots < 2 {
            return Ok(GrowthReport::InsufficientData { snapshots });
        }

        match (self.store.first_snapshot().await?, self.store.latest_snapshot().await?) {
            (Some(first), Some(last)) => Ok(GrowthReport::Growth {
                initial: first.balance,
                current: last.balance,
                difference: last.balance - first.balance,
                growth_percent: growth_percent(first.balance, last.balance).unwrap_or(Decimal::ZERO),
            }),
            _ => Ok(GrowthReport::InsufficientData { snapshots }),
        }
    }
}
