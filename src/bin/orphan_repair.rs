use clap::Parser;
use spotbot::app::Services;
use spotbot::cli::TargetArgs;
use spotbot::config::Settings;
use spotbot::logging;
use spotbot::repair::{OrphanClass, Target};

/// Detect open trades missing take-profit orders and repair them
#[derive(Debug, Parser)]
#[command(name = "orphan_repair")]
struct Cli {
    #[command(flatten)]
    target: TargetArgs,

    /// Report the intended actions without submitting or writing anything
    #[arg(long)]
    dry_run: bool,
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
    let repair = services.orphan_repair();

    println!("\n═══════════════════════════════════════════════════════");
    println!("                  ORPHAN TRADE REPAIR");
    println!("═══════════════════════════════════════════════════════\n");

    let Some(target) = cli.target.target() else {
        // No selector: classification only
        let classes = repair.classify_open(&Target::All).await?;
        if classes.is_empty() {
            println!("No open trades.");
            return Ok(());
        }

        println!("{:>6}  {:<12} {:<15} {:<12} {}", "ID", "SYMBOL", "CLASS", "STAGE", "MISSING");
        for c in &classes {
            let missing: Vec<String> = c.missing.iter().map(|s| s.to_string()).collect();
            println!(
                "{:>6}  {:<12} {:<15} {:<12} {}",
                c.trade.id,
                c.trade.symbol,
                c.class.to_string(),
                c.stage.to_string(),
                missing.join(",")
            );
        }

        let orphans = classes.iter().filter(|c| c.class != OrphanClass::Ok).count();
        println!("\n{} open trade(s), {} need attention.", classes.len(), orphans);
        if orphans > 0 {
            println!("Re-run with --all, --symbol or --trade-id (optionally --dry-run) to repair.");
        }
        return Ok(());
    };

    println!("Target: {}{}\n", target, if cli.dry_run { " (dry run)" } else { "" });

    let report = repair.repair(&target, cli.dry_run).await?;
    report.print();
    services.notifier.flush().await;

    if !report.is_clean() {
        anyhow::bail!("{} repair error(s)", report.errors.len());
    }
    Ok(())
}
