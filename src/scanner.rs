// Scheduled signal scan: candles -> detector -> sizer -> executor
use crate::api::{Exchange, FilterCache};
use crate::db::TradeStore;
use crate::execution::{EngineResult, ExecutionOutcome, TradeExecutor};
use crate::models::Candle;
use crate::sizing::{OrderSizer, SizeDecision};
use crate::strategy::Strategy;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub symbols: Vec<String>,
    pub interval: String,
    pub candle_limit: u16,
    pub quote_asset: String,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub scanned: usize,
    /// Symbols skipped because a trade is already open on them
    pub skipped: Vec<String>,
    pub signals: usize,
    pub dropped: Vec<(String, String)>,
    pub opened: Vec<i64>,
    pub errors: Vec<(String, String)>,
}

/// Polls each configured symbol and turns fresh signals into trades
///
/// One open trade per symbol. A signal candle is acted on at most once, so
/// polling faster than the kline interval cannot re-enter on the same setup.
pub struct SignalScanner {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn TradeStore>,
    strategy: Arc<dyn Strategy>,
    sizer: Arc<OrderSizer>,
    filters: FilterCache,
    executor: Arc<TradeExecutor>,
    settings: ScanSettings,
    acted_on: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SignalScanner {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn TradeStore>,
        strategy: Arc<dyn Strategy>,
        sizer: Arc<OrderSizer>,
        filters: FilterCache,
        executor: Arc<TradeExecutor>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            exchange,
            store,
            strategy,
            sizer,
            filters,
            executor,
            settings,
            acted_on: Mutex::new(HashMap::new()),
        }
    }

    pub async fn scan_once(&self, now: DateTime<Utc>) -> EngineResult<ScanReport> {
        let open: HashSet<String> = self
            .store
            .open_trades()
            .await?
            .into_iter()
            .map(|t| t.symbol)
            .collect();

        let mut report = ScanReport::default();
        for symbol in &self.settings.symbols {
            report.scanned += 1;
            if open.contains(symbol) {
                tracing::debug!("{}: trade already open, skipping", symbol);
                report.skipped.push(symbol.clone());
                continue;
            }

            if let Err(e) = self.scan_symbol(symbol, now, &mut report).await {
                tracing::error!("❌ Scan of {} failed: {}", symbol, e);
                report.errors.push((symbol.clone(), e.to_string()));
            }
        }

        Ok(report)
    }

    async fn scan_symbol(&self, symbol: &str, now: DateTime<Utc>, report: &mut ScanReport) -> EngineResult<()> {
        let candles = self
            .exchange
            .candles(symbol, &self.settings.interval, self.settings.candle_limit)
            .await?;
        let closed = closed_candles(candles, now);

        let Some(signal) = self.strategy.detect(&closed) else {
            return Ok(());
        };
        report.signals += 1;

        if self.acted_on.lock().await.get(symbol) == Some(&signal.candle_time) {
            tracing::debug!("{}: signal candle {} already handled", symbol, signal.candle_time);
            return Ok(());
        }

        // Transient failures up to here leave the candle unmarked for the next cycle
        let filter = self.filters.get(self.exchange.as_ref(), symbol).await?;
        let capital = self.exchange.balance(&self.settings.quote_asset).await?.free;

        let sized = match self.sizer.size(&signal, capital, &filter) {
            SizeDecision::Sized(sized) => sized,
            SizeDecision::Dropped(reason) => {
                tracing::info!("⏭️  {} signal dropped: {}", symbol, reason);
                self.mark_acted(symbol, signal.candle_time).await;
                report.dropped.push((symbol.to_string(), reason.to_string()));
                return Ok(());
            }
        };

        let outcome = self.executor.execute(&sized, &filter).await?;
        self.mark_acted(symbol, signal.candle_time).await;
        match &outcome {
            ExecutionOutcome::Protected { trade, .. } | ExecutionOutcome::Orphaned { trade, .. } => {
                report.opened.push(trade.id);
            }
            ExecutionOutcome::EntryPending { trade, reason } => {
                tracing::warn!(trade_id = trade.id, "Entry pending for {}: {}", symbol, reason);
                report.opened.push(trade.id);
            }
            ExecutionOutcome::EntryRejected { reason, .. } => {
                report.dropped.push((symbol.to_string(), reason.clone()));
            }
        }

        Ok(())
    }

    async fn mark_acted(&self, symbol: &str, candle_time: DateTime<Utc>) {
        self.acted_on.lock().await.insert(symbol.to_string(), candle_time);
    }

    pub async fn run_forever(&self, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.scan_once(Utc::now()).await {
                Ok(report) => tracing::info!(
                    "🔍 Scan: {} symbols, {} signals, {} opened, {} dropped, {} errors",
                    report.scanned,
                    report.signals,
                    report.opened.len(),
                    report.dropped.len(),
                    report.errors.len()
                ),
                Err(e) => tracing::error!("Signal scan failed: {}", e),
            }
        }
    }
}

/// Drop the still-forming kline; the exchange returns it last
pub fn closed_candles(mut candles: Vec<Candle>, now: DateTime<Utc>) -> Vec<Candle> {
    candles.retain(|c| c.close_time <= now);
    candles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SimulatedExchange;
    use crate::cache::NoopCache;
    use crate::db::MemoryStore;
    use crate::models::TradeStatus;
    use crate::notify::LogNotifier;
    use crate::sizing::SizingConfig;
    use crate::strategy::EntrySignal;
    use crate::wallet::WalletLedger;
    use rust_decimal_macros::dec;

    /// Fires on whatever the last closed candle is
    struct LastCandleSignal;

    impl Strategy for LastCandleSignal {
        fn detect(&self, candles: &[Candle]) -> Option<EntrySignal> {
            let last = candles.last()?;
            Some(EntrySignal {
                symbol: last.symbol.clone(),
                entry_price: last.close,
                band_mean: last.close * 1.04,
                band_std_dev: last.close * 0.02,
                take_profit_reference: last.close * 1.03,
                candle_time: last.close_time,
            })
        }

        fn name(&self) -> &str {
            "last candle"
        }

        fn min_candles_required(&self) -> usize {
            1
        }
    }

    fn candle(close_time: DateTime<Utc>, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            open_time: close_time - chrono::Duration::minutes(15),
            close_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn scanner(exchange: Arc<SimulatedExchange>, store: Arc<MemoryStore>) -> SignalScanner {
        let sizer = Arc::new(OrderSizer::new(SizingConfig::default()));
        let executor = Arc::new(TradeExecutor::new(
            exchange.clone(),
            store.clone(),
            Arc::new(WalletLedger::new(store.clone())),
            sizer.clone(),
            Arc::new(NoopCache),
            Arc::new(LogNotifier),
        ));
        SignalScanner::new(
            exchange,
            store,
            Arc::new(LastCandleSignal),
            sizer,
            FilterCache::new(Duration::from_secs(60)),
            executor,
            ScanSettings {
                symbols: vec!["BTCUSDT".to_string()],
                interval: "15m".to_string(),
                candle_limit: 100,
                quote_asset: "USDT".to_string(),
            },
        )
    }

    fn setup() -> (Arc<SimulatedExchange>, Arc<MemoryStore>, DateTime<Utc>) {
        let exchange = Arc::new(SimulatedExchange::new("USDT"));
        exchange.list_symbol("BTCUSDT", "BTC", dec!(0.01), dec!(0.00001));
        exchange.set_price("BTCUSDT", dec!(50000));
        exchange.set_balance("USDT", dec!(1000), dec!(0));

        let now = Utc::now();
        exchange.set_candles(
            "BTCUSDT",
            vec![
                candle(now - chrono::Duration::minutes(15), 50000.0),
                // Still forming
                candle(now + chrono::Duration::minutes(10), 1.0),
            ],
        );
        (exchange, Arc::new(MemoryStore::new()), now)
    }

    #[test]
    fn test_forming_candle_dropped() {
        let now = Utc::now();
        let candles = vec![
            candle(now - chrono::Duration::minutes(1), 1.0),
            candle(now + chrono::Duration::minutes(1), 2.0),
        ];
        let closed = closed_candles(candles, now);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].close, 1.0);
    }

    #[tokio::test]
    async fn test_signal_opens_one_trade_per_symbol() {
        let (exchange, store, now) = setup();
        let scanner = scanner(exchange, store.clone());

        let first = scanner.scan_once(now).await.unwrap();
        assert_eq!(first.signals, 1);
        assert_eq!(first.opened.len(), 1, "{:?}", first.dropped);

        let trade = store.get_trade(first.opened[0]).await.unwrap();
        assert_eq!(trade.status, TradeStatus::Open);
        assert_eq!(trade.entry_price, dec!(50000));

        let second = scanner.scan_once(now).await.unwrap();
        assert_eq!(second.skipped, vec!["BTCUSDT".to_string()]);
        assert!(second.opened.is_empty());
    }

    #[tokio::test]
    async fn test_same_signal_candle_not_reentered() {
        let (exchange, store, now) = setup();
        let scanner = scanner(exchange.clone(), store.clone());

        let first = scanner.scan_once(now).await.unwrap();
        let trade_id = first.opened[0];

        // Close the trade by hand; the same candle must not open another
        let mut trade = store.get_trade(trade_id).await.unwrap();
        trade.status = TradeStatus::Closed;
        store.save_trade(&trade).await.unwrap();

        let second = scanner.scan_once(now).await.unwrap();
        assert_eq!(second.signals, 1);
        assert!(second.opened.is_empty());
        assert_eq!(store.all_trades().await.len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_same_candle() {
        let (exchange, store, now) = setup();
        exchange.fail_next(
            crate::api::SimulatedCall::SymbolFilter,
            crate::api::ExchangeError::Transient("timeout".to_string()),
        );
        let scanner = scanner(exchange.clone(), store.clone());

        let first = scanner.scan_once(now).await.unwrap();
        assert_eq!(first.signals, 1);
        assert_eq!(first.errors.len(), 1);
        assert!(first.opened.is_empty());
        assert!(store.all_trades().await.is_empty());

        let second = scanner.scan_once(now).await.unwrap();
        assert!(second.errors.is_empty(), "{:?}", second.errors);
        assert_eq!(second.opened.len(), 1);
        assert_eq!(store.all_trades().await.len(), 1);
    }

    #[tokio::test]
    async fn test_thin_capital_drops_signal() {
        let (exchange, store, now) = setup();
        exchange.set_balance("USDT", dec!(5), dec!(0));
        let scanner = scanner(exchange, store.clone());

        let report = scanner.scan_once(now).await.unwrap();
        assert_eq!(report.dropped.len(), 1);
        assert!(report.opened.is_empty());
        assert!(store.all_trades().await.is_empty());
    }
}
