// Shared wiring for the daemon and the operator tools
use crate::api::{BinanceClient, Exchange, FilterCache};
use crate::cache::{CacheInvalidator, NoopCache, RedisCache};
use crate::config::Settings;
use crate::db::{PostgresStore, TradeStore};
use crate::execution::{Reconciler, ReconcilerConfig, TradeExecutor};
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::repair::{EmergencyLiquidator, OrphanRepair};
use crate::scanner::{ScanSettings, SignalScanner};
use crate::sizing::OrderSizer;
use crate::strategy::BandReentryStrategy;
use crate::wallet::WalletLedger;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

/// Long-lived handles every component is built from
pub struct Services {
    pub settings: Settings,
    pub exchange: Arc<dyn Exchange>,
    pub store: Arc<dyn TradeStore>,
    pub cache: Arc<dyn CacheInvalidator>,
    pub notifier: Arc<dyn Notifier>,
    pub filters: FilterCache,
    pub ledger: Arc<WalletLedger>,
    pub sizer: Arc<OrderSizer>,
}

impl Services {
    /// Connect to Binance, Postgres and (optionally) Redis
    ///
    /// Missing credentials and an unreachable database are fatal. Redis is
    /// best-effort: without it cache invalidation is a no-op.
    pub async fn connect(settings: Settings) -> anyhow::Result<Self> {
        if !settings.exchange.has_credentials() {
            anyhow::bail!("Binance API credentials missing (set SPOTBOT__EXCHANGE__API_KEY / BINANCE_API_KEY)");
        }
        let exchange: Arc<dyn Exchange> = Arc::new(
            BinanceClient::new(settings.exchange.clone()).context("Failed to build Binance client")?,
        );

        let store: Arc<dyn TradeStore> = Arc::new(
            PostgresStore::connect(&settings.database.url, settings.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?,
        );

        let cache: Arc<dyn CacheInvalidator> = match &settings.redis.url {
            Some(url) => match RedisCache::new(url).await {
                Ok(cache) => Arc::new(cache),
                Err(e) => {
                    tracing::warn!("Redis unavailable, cache invalidation disabled: {}", e);
                    Arc::new(NoopCache)
                }
            },
            None => Arc::new(NoopCache),
        };

        let notifier: Arc<dyn Notifier> = match &settings.notify.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url).context("Failed to build webhook client")?),
            None => Arc::new(LogNotifier),
        };

        Ok(Self::from_parts(settings, exchange, store, cache, notifier))
    }

    pub fn from_parts(
        settings: Settings,
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn TradeStore>,
        cache: Arc<dyn CacheInvalidator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let filters = FilterCache::new(Duration::from_secs(settings.strategy.filter_ttl_secs));
        let ledger = Arc::new(WalletLedger::new(store.clone()));
        let sizer = Arc::new(OrderSizer::new(settings.sizing.clone()));
        Self {
            settings,
            exchange,
            store,
            cache,
            notifier,
            filters,
            ledger,
            sizer,
        }
    }

    pub fn quote_asset(&self) -> &str {
        &self.settings.sizing.quote_asset
    }

    pub fn executor(&self) -> TradeExecutor {
        TradeExecutor::new(
            self.exchange.clone(),
            self.store.clone(),
            self.ledger.clone(),
            self.sizer.clone(),
            self.cache.clone(),
            self.notifier.clone(),
        )
    }

    pub fn scanner(&self) -> SignalScanner {
        let strategy = &self.settings.strategy;
        SignalScanner::new(
            self.exchange.clone(),
            self.store.clone(),
            Arc::new(BandReentryStrategy::new(strategy.band.clone())),
            self.sizer.clone(),
            self.filters.clone(),
            Arc::new(self.executor()),
            ScanSettings {
                symbols: strategy.symbols.clone(),
                interval: strategy.interval.clone(),
                candle_limit: strategy.candle_limit,
                quote_asset: self.quote_asset().to_string(),
            },
        )
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.exchange.clone(),
            self.store.clone(),
            self.ledger.clone(),
            self.cache.clone(),
            self.notifier.clone(),
            ReconcilerConfig {
                quote_asset: self.quote_asset().to_string(),
                fill_tolerance: self.settings.reconciliation.fill_tolerance,
            },
        )
    }

    pub fn orphan_repair(&self) -> OrphanRepair {
        OrphanRepair::new(
            self.exchange.clone(),
            self.store.clone(),
            self.filters.clone(),
            self.cache.clone(),
            self.notifier.clone(),
            self.settings.sizing.tp1_fraction,
        )
    }

    pub fn liquidator(&self) -> EmergencyLiquidator {
        EmergencyLiquidator::new(
            self.exchange.clone(),
            self.store.clone(),
            self.filters.clone(),
            self.cache.clone(),
            self.notifier.clone(),
        )
    }
}
