use clap::Parser;
use spotbot::app::Services;
use spotbot::cli::TargetArgs;
use spotbot::config::Settings;
use spotbot::logging;

/// Cancel open orders, market-sell holdings and close the selected trades
#[derive(Debug, Parser)]
#[command(name = "emergency_liquidate")]
struct Cli {
    #[command(flatten)]
    target: TargetArgs,

    /// Report what would be cancelled and sold without touching anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(target) = cli.target.target() else {
        eprintln!("Refusing to liquidate without a target: pass --all, --symbol or --trade-id");
        std::process::exit(1);
    };

    if let Err(e) = run(target, cli.dry_run).await {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn run(target: spotbot::repair::Target, dry_run: bool) -> anyhow::Result<()> {
    let settings = Settings::load()?;
    logging::init(&settings.logging.filter);
    let services = Services::connect(settings).await?;

    println!("\n═══════════════════════════════════════════════════════");
    println!("               🚨 EMERGENCY LIQUIDATION 🚨");
    println!("═══════════════════════════════════════════════════════\n");
    println!("Target: {}{}\n", target, if dry_run { " (dry run)" } else { "" });

    let report = services.liquidator().liquidate(&target, dry_run).await?;
    report.print();
    services.notifier.flush().await;

    if !report.is_clean() {
        anyhow::bail!("{} liquidation error(s)", report.errors.len());
    }
    Ok(())
}
