use crate::api::error::ExchangeResult;
use crate::api::exchange::Exchange;
use crate::models::SymbolFilter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CachedFilter {
    filter: SymbolFilter,
    fetched_at: Instant,
}

/// Process-local cache of symbol tick/step sizes
///
/// Entries live for `ttl` and are refreshed lazily on the next miss.
/// Clones share the same map.
#[derive(Clone)]
pub struct FilterCache {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, CachedFilter>>>,
}

impl FilterCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Cached filter for `symbol`, fetching from the exchange when absent or stale
    pub async fn get(&self, exchange: &dyn Exchange, symbol: &str) -> ExchangeResult<SymbolFilter> {
        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(symbol) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.filter.clone());
                }
            }
        }

        let filter = exchange.symbol_filter(symbol).await?;
        tracing::debug!(
            "Cached filters for {}: tick {} step {}",
            symbol,
            filter.tick_size,
            filter.step_size
        );

        self.entries.write().await.insert(
            symbol.to_string(),
            CachedFilter {
                filter: filter.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(filter)
    }

    pub async fn invalidate(&self, symbol: &str) {
        self.entries.write().await.remove(symbol);
    }
}
