// Layered settings: built-in defaults, optional config file, SPOTBOT__* env
use crate::api::BinanceConfig;
use crate::sizing::SizingConfig;
use crate::strategy::BandReentryConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;

const ENV_PREFIX: &str = "SPOTBOT";
const DEFAULT_CONFIG_FILE: &str = "config/default";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exchange: BinanceConfig,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub strategy: StrategySettings,
    pub sizing: SizingConfig,
    pub reconciliation: ReconcileSettings,
    pub logging: LoggingSettings,
    pub notify: NotifySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/spotbot".to_string(),
            max_connections: 5,
        }
    }
}

/// Optional read cache to invalidate after writes
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    /// Symbols scanned for entries
    pub symbols: Vec<String>,
    /// Kline interval, e.g. "15m"
    pub interval: String,
    pub candle_limit: u16,
    pub scan_interval_secs: u64,
    pub filter_ttl_secs: u64,
    pub band: BandReentryConfig,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            interval: "15m".to_string(),
            candle_limit: 100,
            scan_interval_secs: 60,
            filter_ttl_secs: 3600,
            band: BandReentryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub interval_secs: u64,
    /// Relative distance below the order target the market may sit at
    pub fill_tolerance: Decimal,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            fill_tolerance: dec!(0.001),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "spotbot=info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub webhook_url: Option<String>,
}

impl Settings {
    /// Load from `config/default.{toml,yaml,..}` if present, then the environment
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("strategy.symbols")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.normalize();
        settings.apply_credential_fallback(
            std::env::var("BINANCE_API_KEY").ok(),
            std::env::var("BINANCE_API_SECRET").ok(),
        );
        Ok(settings)
    }

    /// Uppercase symbols and allocation keys; the env source lowercases keys
    fn normalize(&mut self) {
        self.strategy.symbols = self
            .strategy
            .symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        self.sizing.allocations = self
            .sizing
            .allocations
            .drain()
            .map(|(asset, fraction)| (asset.to_uppercase(), fraction))
            .collect();

        self.sizing.quote_asset = self.sizing.quote_asset.to_uppercase();
    }

    fn apply_credential_fallback(&mut self, api_key: Option<String>, api_secret: Option<String>) {
        if self.exchange.api_key.is_empty() {
            if let Some(key) = api_key {
                self.exchange.api_key = key;
            }
        }
        if self.exchange.api_secret.is_empty() {
            if let Some(secret) = api_secret {
                self.exchange.api_secret = secret;
            }
        }
    }
}
