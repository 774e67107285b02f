// Persistence boundary for trades, orders, trade logs and wallet snapshots
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::models::{
    NewOrder, NewTrade, NewTradeLog, NewWalletSnapshot, Order, Trade, TradeLogEntry,
    WalletSnapshot,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Typed repository over the trade tables
///
/// Reads only ever see active rows. Nothing is physically deleted, and every
/// mutation is scoped by primary key.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn insert_trade(&self, trade: NewTrade) -> StoreResult<Trade>;

    async fn save_trade(&self, trade: &Trade) -> StoreResult<()>;

    async fn get_trade(&self, id: i64) -> StoreResult<Trade>;

    /// Open trades, oldest first
    async fn open_trades(&self) -> StoreResult<Vec<Trade>>;

    /// Insert an order and link it to `trade_id`
    async fn insert_order(&self, trade_id: i64, order: NewOrder) -> StoreResult<Order>;

    async fn save_order(&self, order: &Order) -> StoreResult<()>;

    /// Orders linked to a trade, in creation order
    async fn orders_by_trade(&self, trade_id: i64) -> StoreResult<Vec<Order>>;

    /// Write a trade and its orders in one transaction
    async fn commit_trade(&self, trade: &Trade, orders: &[Order]) -> StoreResult<()>;

    async fn append_log(&self, entry: NewTradeLog) -> StoreResult<TradeLogEntry>;

    async fn trade_logs(&self, trade_id: i64) -> StoreResult<Vec<TradeLogEntry>>;

    async fn insert_snapshot(&self, snapshot: NewWalletSnapshot) -> StoreResult<WalletSnapshot>;

    /// Most recent active snapshot
    async fn latest_snapshot(&self) -> StoreResult<Option<WalletSnapshot>>;

    /// Oldest active snapshot
    async fn first_snapshot(&self) -> StoreResult<Option<WalletSnapshot>>;

    async fn snapshot_count(&self) -> StoreResult<i64>;
}

pub(crate) fn parse_column<T>(column: &str, value: &str) -> StoreResult<T>
where
    T: std::str::FromStr<Err = crate::models::UnknownVariant>,
{
    value
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", column, e)))
}
