use crate::db::{parse_column, StoreError, StoreResult, TradeStore};
use crate::models::{
    NewOrder, NewTrade, NewTradeLog, NewWalletSnapshot, Order, Trade, TradeLogEntry,
    WalletSnapshot,
};
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};

const TRADE_COLUMNS: &str = r#"
    id, symbol, status, entry_price, quantity, investment,
    take_profit_1_price, take_profit_2_price, tp1_status, tp2_status,
    tp1_executed_qty, tp2_executed_qty, exit_price, profit_loss,
    profit_loss_percent, exit_type, opened_at, closed_at
"#;

const ORDER_COLUMNS: &str = r#"
    o.id, t.trade_id, o.remote_order_id, o.remote_client_order_id, o.symbol,
    o.side, o.order_type, o.role, o.price, o.stop_price, o.quantity,
    o.executed_qty, o.avg_fill_price, o.status, o.created_at, o.raw_response
"#;

const SNAPSHOT_COLUMNS: &str = r#"
    id, balance, snapshot_type, related_trade_id, previous_balance,
    growth_percent, timestamp
"#;

/// Postgres-backed trade store
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and run pending migrations
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Soft-delete every row (testing only)
    #[cfg(test)]
    pub async fn deactivate_all(&self) -> StoreResult<()> {
        for table in ["trade_logs", "trade_orders", "orders", "wallet_snapshots", "trades"] {
            sqlx::query(&format!("UPDATE {} SET active = FALSE", table))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

fn trade_from_row(row: &PgRow) -> StoreResult<Trade> {
    let status: String = row.get("status");
    let tp1_status: String = row.get("tp1_status");
    let tp2_status: String = row.get("tp2_status");
    let exit_type: Option<String> = row.get("exit_type");

    Ok(Trade {
        id: row.get("id"),
        symbol: row.get("symbol"),
        status: parse_column("trades.status", &status)?,
        entry_price: row.get("entry_price"),
        quantity: row.get("quantity"),
        investment: row.get("investment"),
        take_profit_1_price: row.get("take_profit_1_price"),
        take_profit_2_price: row.get("take_profit_2_price"),
        tp1_status: parse_column("trades.tp1_status", &tp1_status)?,
        tp2_status: parse_column("trades.tp2_status", &tp2_status)?,
        tp1_executed_qty: row.get("tp1_executed_qty"),
        tp2_executed_qty: row.get("tp2_executed_qty"),
        exit_price: row.get("exit_price"),
        profit_loss: row.get("profit_loss"),
        profit_loss_percent: row.get("profit_loss_percent"),
        exit_type: exit_type
            .map(|v| parse_column("trades.exit_type", &v))
            .transpose()?,
        opened_at: row.get("opened_at"),
        closed_at: row.get("closed_at"),
    })
}

fn order_from_row(row: &PgRow) -> StoreResult<Order> {
    let side: String = row.get("side");
    let order_type: String = row.get("order_type");
    let role: String = row.get("role");
    let status: String = row.get("status");

    Ok(Order {
        id: row.get("id"),
        trade_id: row.get("trade_id"),
        remote_order_id: row.get("remote_order_id"),
        remote_client_order_id: row.get("remote_client_order_id"),
        symbol: row.get("symbol"),
        side: parse_column("orders.side", &side)?,
        order_type: parse_column("orders.order_type", &order_type)?,
        role: parse_column("orders.role", &role)?,
        price: row.get("price"),
        stop_price: row.get("stop_price"),
        quantity: row.get("quantity"),
        executed_qty: row.get("executed_qty"),
        avg_fill_price: row.get("avg_fill_price"),
        status: parse_column("orders.status", &status)?,
        created_at: row.get("created_at"),
        raw_response: row.get("raw_response"),
    })
}

fn log_from_row(row: &PgRow) -> StoreResult<TradeLogEntry> {
    let event: String = row.get("event");
    Ok(TradeLogEntry {
        id: row.get("id"),
        trade_id: row.get("trade_id"),
        event: parse_column("trade_logs.event", &event)?,
        message: row.get("message"),
        details: row.get("details"),
        created_at: row.get("created_at"),
    })
}

fn snapshot_from_row(row: &PgRow) -> StoreResult<WalletSnapshot> {
    let snapshot_type: String = row.get("snapshot_type");
    Ok(WalletSnapshot {
        id: row.get("id"),
        balance: row.get("balance"),
        snapshot_type: parse_column("wallet_snapshots.snapshot_type", &snapshot_type)?,
        related_trade_id: row.get("related_trade_id"),
        previous_balance: row.get("previous_balance"),
        growth_percent: row.get("growth_percent"),
        timestamp: row.get("timestamp"),
    })
}

async fn update_trade<'e, E>(executor: E, trade: &Trade) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE trades SET
            status = $2,
            entry_price = $3,
            quantity = $4,
            investment = $5,
            take_profit_1_price = $6,
            take_profit_2_price = $7,
            tp1_status = $8,
            tp2_status = $9,
            tp1_executed_qty = $10,
            tp2_executed_qty = $11,
            exit_price = $12,
            profit_loss = $13,
            profit_loss_percent = $14,
            exit_type = $15,
            closed_at = $16,
            updated_at = NOW()
        WHERE id = $1 AND active = TRUE
        "#,
    )
    .bind(trade.id)
    .bind(trade.status.as_str())
    .bind(trade.entry_price)
    .bind(trade.quantity)
    .bind(trade.investment)
    .bind(trade.take_profit_1_price)
    .bind(trade.take_profit_2_price)
    .bind(trade.tp1_status.as_str())
    .bind(trade.tp2_status.as_str())
    .bind(trade.tp1_executed_qty)
    .bind(trade.tp2_executed_qty)
    .bind(trade.exit_price)
    .bind(trade.profit_loss)
    .bind(trade.profit_loss_percent)
    .bind(trade.exit_type.map(|e| e.as_str()))
    .bind(trade.closed_at)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound {
            entity: "trade",
            id: trade.id,
        });
    }
    Ok(())
}

async fn update_order<'e, E>(executor: E, order: &Order) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE orders SET
            price = $2,
            stop_price = $3,
            quantity = $4,
            executed_qty = $5,
            avg_fill_price = $6,
            status = $7,
            raw_response = $8,
            updated_at = NOW()
        WHERE id = $1 AND active = TRUE
        "#,
    )
    .bind(order.id)
    .bind(order.price)
    .bind(order.stop_price)
    .bind(order.quantity)
    .bind(order.executed_qty)
    .bind(order.avg_fill_price)
    .bind(order.status.as_str())
    .bind(&order.raw_response)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound {
            entity: "order",
            id: order.id,
        });
    }
    Ok(())
}

#[async_trait]
impl TradeStore for PostgresStore {
    async fn insert_trade(&self, trade: NewTrade) -> StoreResult<Trade> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO trades (
                symbol, status, entry_price, quantity, investment,
                take_profit_1_price, take_profit_2_price, opened_at
            )
            VALUES ($1, 'open', $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            TRADE_COLUMNS
        ))
        .bind(&trade.symbol)
        .bind(trade.entry_price)
        .bind(trade.quantity)
        .bind(trade.investment)
        .bind(trade.take_profit_1_price)
        .bind(trade.take_profit_2_price)
        .bind(trade.opened_at)
        .fetch_one(&self.pool)
        .await?;

        let trade = trade_from_row(&row)?;
        tracing::debug!("Inserted trade {} for {}", trade.id, trade.symbol);
        Ok(trade)
    }

    async fn save_trade(&self, trade: &Trade) -> StoreResult<()> {
        update_trade(&self.pool, trade).await
    }

    async fn get_trade(&self, id: i64) -> StoreResult<Trade> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM trades WHERE id = $1 AND active = TRUE",
            TRADE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => trade_from_row(&row),
            None => Err(StoreError::NotFound { entity: "trade", id }),
        }
    }

    async fn open_trades(&self) -> StoreResult<Vec<Trade>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM trades
            WHERE status = 'open' AND active = TRUE
            ORDER BY opened_at ASC, id ASC
            "#,
            TRADE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(trade_from_row).collect()
    }

    async fn insert_order(&self, trade_id: i64, order: NewOrder) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO orders (
                remote_order_id, remote_client_order_id, symbol, side, order_type,
                role, price, stop_price, quantity, executed_qty, avg_fill_price,
                status, raw_response
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(order.remote_order_id)
        .bind(&order.remote_client_order_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.role.as_str())
        .bind(order.price)
        .bind(order.stop_price)
        .bind(order.quantity)
        .bind(order.executed_qty)
        .bind(order.avg_fill_price)
        .bind(order.status.as_str())
        .bind(&order.raw_response)
        .fetch_one(&mut *tx)
        .await?;
        let order_id: i64 = row.get("id");

        sqlx::query("INSERT INTO trade_orders (trade_id, order_id) VALUES ($1, $2)")
            .bind(trade_id)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM orders o
            JOIN trade_orders t ON t.order_id = o.id
            WHERE o.id = $1
            "#,
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        order_from_row(&row)
    }

    async fn save_order(&self, order: &Order) -> StoreResult<()> {
        update_order(&self.pool, order).await
    }

    async fn orders_by_trade(&self, trade_id: i64) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM orders o
            JOIN trade_orders t ON t.order_id = o.id
            WHERE t.trade_id = $1 AND t.active = TRUE AND o.active = TRUE
            ORDER BY o.id ASC
            "#,
            ORDER_COLUMNS
        ))
        .bind(trade_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn commit_trade(&self, trade: &Trade, orders: &[Order]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        update_trade(&mut *tx, trade).await?;
        for order in orders {
            update_order(&mut *tx, order).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn append_log(&self, entry: NewTradeLog) -> StoreResult<TradeLogEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO trade_logs (trade_id, event, message, details)
            VALUES ($1, $2, $3, $4)
            RETURNING id, trade_id, event, message, details, created_at
            "#,
        )
        .bind(entry.trade_id)
        .bind(entry.event.as_str())
        .bind(&entry.message)
        .bind(&entry.details)
        .fetch_one(&self.pool)
        .await?;

        log_from_row(&row)
    }

    async fn trade_logs(&self, trade_id: i64) -> StoreResult<Vec<TradeLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, trade_id, event, message, details, created_at
            FROM trade_logs
            WHERE trade_id = $1 AND active = TRUE
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(trade_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }

    async fn insert_snapshot(&self, snapshot: NewWalletSnapshot) -> StoreResult<WalletSnapshot> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO wallet_snapshots (
                balance, snapshot_type, related_trade_id, previous_balance,
                growth_percent, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            SNAPSHOT_COLUMNS
        ))
        .bind(snapshot.balance)
        .bind(snapshot.snapshot_type.as_str())
        .bind(snapshot.related_trade_id)
        .bind(snapshot.previous_balance)
        .bind(snapshot.growth_percent)
        .bind(snapshot.timestamp)
        .fetch_one(&self.pool)
        .await?;

        snapshot_from_row(&row)
    }

    async fn latest_snapshot(&self) -> StoreResult<Option<WalletSnapshot>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM wallet_snapshots
            WHERE active = TRUE
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
            SNAPSHOT_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn first_snapshot(&self) -> StoreResult<Option<WalletSnapshot>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM wallet_snapshots
            WHERE active = TRUE
            ORDER BY timestamp ASC, id ASC
            LIMIT 1
            "#,
            SNAPSHOT_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn snapshot_count(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM wallet_snapshots WHERE active = TRUE")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("count"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        OrderRole, OrderSide, OrderStatus, OrderType, SnapshotType, TpStatus, TradeEvent,
        TradeStatus,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;

    async fn get_test_db() -> PostgresStore {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/spotbot_test".to_string());

        PostgresStore::connect(&database_url, 2)
            .await
            .expect("Failed to connect to test database")
    }

    fn new_trade() -> NewTrade {
        NewTrade {
            symbol: "BTCUSDT".to_string(),
            entry_price: dec!(50000),
            quantity: dec!(0.002),
            investment: dec!(100),
            take_profit_1_price: Some(dec!(51000)),
            take_profit_2_price: Some(dec!(52000)),
            opened_at: Utc::now(),
        }
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_trade_round_trip_and_close() {
        let db = get_test_db().await;
        db.deactivate_all().await.unwrap();

        let mut trade = db.insert_trade(new_trade()).await.unwrap();
        assert_eq!(trade.status, TradeStatus::Open);
        assert_eq!(trade.tp1_status, TpStatus::Pending);

        let entry = db
            .insert_order(
                trade.id,
                NewOrder {
                    remote_order_id: 1,
                    remote_client_order_id: "spotbot-1-entry-abcd1234".to_string(),
                    symbol: "BTCUSDT".to_string(),
                    side: OrderSide::Buy,
                    order_type: OrderType::Market,
                    role: OrderRole::Entry,
                    price: None,
                    stop_price: None,
                    quantity: dec!(0.002),
                    executed_qty: dec!(0.002),
                    avg_fill_price: Some(dec!(50000)),
                    status: OrderStatus::Filled,
                    raw_response: serde_json::json!({"orderId": 1}),
                },
            )
            .await
            .unwrap();
        assert_eq!(entry.trade_id, trade.id);

        trade.status = TradeStatus::Closed;
        trade.exit_price = Some(dec!(51000));
        trade.closed_at = Some(Utc::now());
        db.commit_trade(&trade, &[entry]).await.unwrap();

        let loaded = db.get_trade(trade.id).await.unwrap();
        assert_eq!(loaded.status, TradeStatus::Closed);
        assert_eq!(loaded.exit_price, Some(dec!(51000)));
        assert!(db.open_trades().await.unwrap().is_empty());
        assert_eq!(db.orders_by_trade(trade.id).await.unwrap().len(), 1);

        db.deactivate_all().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_logs_and_snapshots() {
        let db = get_test_db().await;
        db.deactivate_all().await.unwrap();

        let trade = db.insert_trade(new_trade()).await.unwrap();
        db.append_log(NewTradeLog::new(trade.id, TradeEvent::Opened, "opened"))
            .await
            .unwrap();
        assert_eq!(db.trade_logs(trade.id).await.unwrap().len(), 1);

        for balance in [dec!(1000), dec!(1010)] {
            db.insert_snapshot(NewWalletSnapshot {
                balance,
                snapshot_type: SnapshotType::Manual,
                related_trade_id: None,
                previous_balance: None,
                growth_percent: None,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        }

        assert_eq!(db.snapshot_count().await.unwrap(), 2);
        assert_eq!(db.first_snapshot().await.unwrap().unwrap().balance, dec!(1000));
        assert_eq!(db.latest_snapshot().await.unwrap().unwrap().balance, dec!(1010));

        db.deactivate_all().await.unwrap();
    }
}
