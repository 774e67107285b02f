// Read-cache invalidation after trade/order writes
//
// The cache belongs to whatever serves reads (dashboard, API). This side only
// evicts table-scoped keys after it changes the underlying rows. Failures are
// logged and swallowed: a stale cache never rolls back a committed write.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

/// Tables whose cached views go stale when trade state changes
pub const TRADE_TABLES: [&str; 2] = ["trades", "orders"];

#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Evict every key cached for `tables`
    async fn invalidate_tables(&self, tables: &[&str]);
}

/// Key pattern for one table's cached entries
pub fn table_pattern(table: &str) -> String {
    format!("{}:*", table)
}

/// No cache configured
pub struct NoopCache;

#[async_trait]
impl CacheInvalidator for NoopCache {
    async fn invalidate_tables(&self, _tables: &[&str]) {}
}

/// Redis-backed invalidation via SCAN + DEL
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow::anyhow!("Redis connection timeout after 5 seconds"))??;

        tracing::info!("Connected to Redis cache");

        Ok(Self { conn })
    }

    async fn delete_pattern(&self, pattern: &str) -> redis::RedisResult<usize> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                removed += conn.del::<_, usize>(&keys).await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}

#[async_trait]
impl CacheInvalidator for RedisCache {
    async fn invalidate_tables(&self, tables: &[&str]) {
        for table in tables {
            let pattern = table_pattern(table);
            match self.delete_pattern(&pattern).await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("Evicted {} cache keys matching {}", n, pattern),
                Err(e) => tracing::warn!("Cache invalidation for {} failed: {}", pattern, e),
            }
        }
    }
}
