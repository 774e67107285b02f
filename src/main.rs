use spotbot::app::Services;
use spotbot::config::Settings;
use spotbot::logging;
use spotbot::Result;
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::load()?;
    logging::init(&settings.logging.filter);

    tracing::info!("🚀 Spotbot starting");

    let services = match Services::connect(settings).await {
        Ok(services) => services,
        Err(e) => {
            tracing::error!("❌ Startup failed: {:#}", e);
            return Err(e.into());
        }
    };

    let settings = &services.settings;
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Quote asset: {}", settings.sizing.quote_asset);
    tracing::info!("  Interval: {} ({} candles)", settings.strategy.interval, settings.strategy.candle_limit);
    tracing::info!(
        "  Bands: period {}, k {}, TP at mean - {}σ",
        settings.strategy.band.period,
        settings.strategy.band.k,
        settings.strategy.band.tp_std_factor
    );
    tracing::info!("  Default allocation: {}", settings.sizing.default_allocation);
    tracing::info!("  Min notional: {}", settings.sizing.min_notional);
    for symbol in &settings.strategy.symbols {
        tracing::info!("    - {}", symbol);
    }

    let scan_every = Duration::from_secs(settings.strategy.scan_interval_secs);
    let reconcile_every = Duration::from_secs(settings.reconciliation.interval_secs);

    tracing::info!("\n🔄 Spawning loops...");

    let scanner = Arc::new(services.scanner());
    let scan_task = tokio::spawn(async move {
        scanner.run_forever(scan_every).await;
    });

    let reconciler = Arc::new(services.reconciler());
    let reconcile_task = tokio::spawn(async move {
        reconciler.run_forever(reconcile_every).await;
    });

    tracing::info!("✅ Loops spawned");
    tracing::info!("  🔍 Signal scan: every {}s", scan_every.as_secs());
    tracing::info!("  🧾 Reconciliation: every {}s", reconcile_every.as_secs());
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = scan_task => {
            tracing::error!("Signal scan loop exited: {:?}", result);
        }
        result = reconcile_task => {
            tracing::error!("Reconciliation loop exited: {:?}", result);
        }
    }

    services.notifier.flush().await;
    tracing::info!("👋 Spotbot stopped");
    Ok(())
}
