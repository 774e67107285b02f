// Trade execution and reconciliation engine
pub mod executor;
pub mod lifecycle;
pub mod reconciler;

pub use executor::{ExecutionOutcome, TradeExecutor};
pub use lifecycle::{settle, slot_fills, stage, Settlement, TradeStage};
pub use reconciler::{Reconciler, ReconcilerConfig, SweepReport};

use crate::api::ExchangeError;
use crate::db::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Rejected: {0}")]
    Rejected(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Client order id: `spotbot-<trade id>-<tag>-<8 hex chars>`
pub fn client_order_id(trade_id: i64, tag: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("spotbot-{}-{}-{}", trade_id, tag, &suffix[..8])
}
