// Argument parsing shared by the operator tools
use crate::repair::Target;
use clap::Args;

/// Which open trades to act on; at most one selector
#[derive(Debug, Clone, Default, Args)]
#[group(multiple = false)]
pub struct TargetArgs {
    /// Act on a single trade
    #[arg(long)]
    pub trade_id: Option<i64>,

    /// Act on every open trade of a symbol (e.g. BTCUSDT)
    #[arg(long)]
    pub symbol: Option<String>,

    /// Act on every open trade
    #[arg(long)]
    pub all: bool,
}

impl TargetArgs {
    /// `None` when no selector was given
    pub fn target(&self) -> Option<Target> {
        if let Some(id) = self.trade_id {
            Some(Target::TradeId(id))
        } else if let Some(symbol) = &self.symbol {
            Some(Target::Symbol(symbol.trim().to_uppercase()))
        } else if self.all {
            Some(Target::All)
        } else {
            None
        }
    }
}
