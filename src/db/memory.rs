use crate::db::{StoreError, StoreResult, TradeStore};
use crate::models::{
    NewOrder, NewTrade, NewTradeLog, NewWalletSnapshot, Order, TpStatus, Trade, TradeLogEntry,
    TradeStatus, WalletSnapshot,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    trades: BTreeMap<i64, Trade>,
    orders: BTreeMap<i64, Order>,
    logs: Vec<TradeLogEntry>,
    snapshots: Vec<WalletSnapshot>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store for tests and dry runs
///
/// One lock guards every table, so `commit_trade` is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every trade regardless of status
    pub async fn all_trades(&self) -> Vec<Trade> {
        self.tables.lock().await.trades.values().cloned().collect()
    }

    pub async fn all_snapshots(&self) -> Vec<WalletSnapshot> {
        self.tables.lock().await.snapshots.clone()
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn insert_trade(&self, trade: NewTrade) -> StoreResult<Trade> {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        let row = Trade {
            id,
            symbol: trade.symbol,
            status: TradeStatus::Open,
            entry_price: trade.entry_price,
            quantity: trade.quantity,
            investment: trade.investment,
            take_profit_1_price: trade.take_profit_1_price,
            take_profit_2_price: trade.take_profit_2_price,
            tp1_status: TpStatus::Pending,
            tp2_status: TpStatus::Pending,
            tp1_executed_qty: None,
            tp2_executed_qty: None,
            exit_price: None,
            profit_loss: None,
            profit_loss_percent: None,
            exit_type: None,
            opened_at: trade.opened_at,
            closed_at: None,
        };
        tables.trades.insert(id, row.clone());
        Ok(row)
    }

    async fn save_trade(&self, trade: &Trade) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.trades.get_mut(&trade.id) {
            Some(row) => {
                *row = trade.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "trade",
                id: trade.id,
            }),
        }
    }

    async fn get_trade(&self, id: i64) -> StoreResult<Trade> {
        self.tables
            .lock()
            .await
            .trades
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "trade", id })
    }

    async fn open_trades(&self) -> StoreResult<Vec<Trade>> {
        Ok(self
            .tables
            .lock()
            .await
            .trades
            .values()
            .filter(|t| t.is_open())
            .cloned()
            .collect())
    }

    async fn insert_order(&self, trade_id: i64, order: NewOrder) -> StoreResult<Order> {
        let mut tables = self.tables.lock().await;
        if !tables.trades.contains_key(&trade_id) {
            return Err(StoreError::NotFound {
                entity: "trade",
                id: trade_id,
            });
        }

        let id = tables.next_id();
        let row = Order {
            id,
            trade_id,
            remote_order_id: order.remote_order_id,
            remote_client_order_id: order.remote_client_order_id,
            symbol: order.symbol,
            side: order.side,
            order_type: order.order_type,
            role: order.role,
            price: order.price,
            stop_price: order.stop_price,
            quantity: order.quantity,
            executed_qty: order.executed_qty,
            avg_fill_price: order.avg_fill_price,
            status: order.status,
            created_at: Utc::now(),
            raw_response: order.raw_response,
        };
        tables.orders.insert(id, row.clone());
        Ok(row)
    }

    async fn save_order(&self, order: &Order) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.orders.get_mut(&order.id) {
            Some(row) => {
                *row = order.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "order",
                id: order.id,
            }),
        }
    }

    async fn orders_by_trade(&self, trade_id: i64) -> StoreResult<Vec<Order>> {
        Ok(self
            .tables
            .lock()
            .await
            .orders
            .values()
            .filter(|o| o.trade_id == trade_id)
            .cloned()
            .collect())
    }

    async fn commit_trade(&self, trade: &Trade, orders: &[Order]) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.trades.contains_key(&trade.id) {
            return Err(StoreError::NotFound {
                entity: "trade",
                id: trade.id,
            });
        }
        if let Some(missing) = orders.iter().find(|o| !tables.orders.contains_key(&o.id)) {
            return Err(StoreError::NotFound {
                entity: "order",
                id: missing.id,
            });
        }

        tables.trades.insert(trade.id, trade.clone());
        for order in orders {
            tables.orders.insert(order.id, order.clone());
        }
        Ok(())
    }

    async fn append_log(&self, entry: NewTradeLog) -> StoreResult<TradeLogEntry> {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        let row = TradeLogEntry {
            id,
            trade_id: entry.trade_id,
            event: entry.event,
            message: entry.message,
            details: entry.details,
            created_at: Utc::now(),
        };
        tables.logs.push(row.clone());
        Ok(row)
    }

    async fn trade_logs(&self, trade_id: i64) -> StoreResult<Vec<TradeLogEntry>> {
        Ok(self
            .tables
            .lock()
            .await
            .logs
            .iter()
            .filter(|l| l.trade_id == trade_id)
            .cloned()
            .collect())
    }

    async fn insert_snapshot(&self, snapshot: NewWalletSnapshot) -> StoreResult<WalletSnapshot> {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        let row = WalletSnapshot {
            id,
            balance: snapshot.balance,
            snapshot_type: snapshot.snapshot_type,
            related_trade_id: snapshot.related_trade_id,
            previous_balance: snapshot.previous_balance,
            growth_percent: snapshot.growth_percent,
            timestamp: snapshot.timestamp,
        };
        tables.snapshots.push(row.clone());
        Ok(row)
    }

    async fn latest_snapshot(&self) -> StoreResult<Option<WalletSnapshot>> {
        Ok(self
            .tables
            .lock()
            .await
            .snapshots
            .iter()
            .max_by_key(|s| (s.timestamp, s.id))
            .cloned())
    }

    async fn first_snapshot(&self) -> StoreResult<Option<WalletSnapshot>> {
        Ok(self
            .tables
            .lock()
            .await
            .snapshots
            .iter()
            .min_by_key(|s| (s.timestamp, s.id))
            .cloned())
    }

    async fn snapshot_count(&self) -> StoreResult<i64> {
        Ok(self.tables.lock().await.snapshots.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderRole, OrderSide, OrderStatus, OrderType};
    use rust_decimal_macros::dec;

    fn new_trade() -> NewTrade {
        NewTrade {
            symbol: "BTCUSDT".to_string(),
            entry_price: dec!(50000),
            quantity: dec!(0.002),
            investment: dec!(100),
            take_profit_1_price: Some(dec!(51000)),
            take_profit_2_price: None,
            opened_at: Utc::now(),
        }
    }

    fn new_order(role: OrderRole) -> NewOrder {
        NewOrder {
            remote_order_id: 7,
            remote_client_order_id: "c".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            role,
            price: None,
            stop_price: None,
            quantity: dec!(0.002),
            executed_qty: dec!(0.002),
            avg_fill_price: Some(dec!(50000)),
            status: OrderStatus::Filled,
            raw_response: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_orders_are_linked_to_their_trade() {
        let store = MemoryStore::new();
        let a = store.insert_trade(new_trade()).await.unwrap();
        let b = store.insert_trade(new_trade()).await.unwrap();

        store.insert_order(a.id, new_order(OrderRole::Entry)).await.unwrap();
        store.insert_order(b.id, new_order(OrderRole::Entry)).await.unwrap();
        store.insert_order(a.id, new_order(OrderRole::Tp1)).await.unwrap();

        let orders = store.orders_by_trade(a.id).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].role, OrderRole::Entry);
        assert_eq!(orders[1].role, OrderRole::Tp1);
    }

    #[tokio::test]
    async fn test_closed_trades_leave_open_set() {
        let store = MemoryStore::new();
        let mut trade = store.insert_trade(new_trade()).await.unwrap();
        assert_eq!(store.open_trades().await.unwrap().len(), 1);

        trade.status = TradeStatus::Closed;
        store.commit_trade(&trade, &[]).await.unwrap();

        assert!(store.open_trades().await.unwrap().is_empty());
        assert_eq!(store.get_trade(trade.id).await.unwrap().status, TradeStatus::Closed);
    }

    #[tokio::test]
    async fn test_order_for_unknown_trade_is_rejected() {
        let store = MemoryStore::new();
        let err = store.insert_order(99, new_order(OrderRole::Entry)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "trade", id: 99 }));
    }
}
