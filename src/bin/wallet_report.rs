use clap::Parser;
use spotbot::app::Services;
use spotbot::config::Settings;
use spotbot::execution::stage;
use spotbot::logging;
use spotbot::wallet::{wallet_balance, GrowthReport};

/// Reconcile open trades, then print wallet growth and open positions
#[derive(Debug, Parser)]
#[command(name = "wallet_report")]
struct Cli {
    /// Record a manual snapshot of the current balance first
    #[arg(long)]
    snapshot: bool,

    /// Skip the reconciliation pass
    #[arg(long)]
    no_sync: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load()?;
    logging::init(&settings.logging.filter);
    let services = Services::connect(settings).await?;

    if !cli.no_sync {
        let sweep = services.reconciler().run_sweep().await?;
        if !sweep.closed.is_empty() {
            println!("Closed during sync: {:?}", sweep.closed);
        }
        services.notifier.flush().await;
    }

    let quote = services.quote_asset().to_string();
    let balance = wallet_balance(services.exchange.as_ref(), &quote).await?;
    if cli.snapshot {
        services.ledger.snapshot_manual(balance).await?;
    }

    println!("\n═══════════════════════════════════════════════════════");
    println!("                     WALLET REPORT");
    println!("═══════════════════════════════════════════════════════\n");
    println!("Balance: {} {}", balance, quote);

    match services.ledger.total_growth().await? {
        GrowthReport::Growth {
            initial,
            current,
            difference,
            growth_percent,
        } => {
            println!("Initial: {} {}", initial, quote);
            println!("Latest snapshot: {} {}", current, quote);
            println!("Difference: {} {}", difference, quote);
            println!("Growth: {}%", growth_percent);
        }
        GrowthReport::InsufficientData { snapshots } => {
            println!("Growth: n/a ({} snapshot(s), need at least 2)", snapshots);
        }
    }

    let open = services.store.open_trades().await?;
    println!("\nOpen trades: {}", open.len());
    for trade in &open {
        let orders = services.store.orders_by_trade(trade.id).await?;
        println!(
            "  #{:<5} {:<10} {} @ {} (invested {}) [{}]",
            trade.id,
            trade.symbol,
            trade.quantity,
            trade.entry_price,
            trade.investment,
            stage(trade, &orders)
        );
    }

    Ok(())
}
