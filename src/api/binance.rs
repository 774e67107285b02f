use crate::api::error::{ExchangeError, ExchangeResult};
use crate::api::exchange::{Balance, Exchange, Fill, OrderReport};
use crate::models::{Candle, OrderSide, OrderStatus, OrderType, SymbolFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

// Binance Spot REST API
// Docs: https://developers.binance.com/docs/binance-spot-api-docs/rest-api
const DEFAULT_BASE_URL: &str = "https://api.binance.com";

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

// ============================================================================
// Configuration
// ============================================================================

/// Binance client settings
///
/// `Debug` masks the credentials.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BinanceConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub recv_window: u64,
    pub requests_per_minute: u32,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10,
            recv_window: 5000,
            requests_per_minute: 600,
        }
    }
}

impl fmt::Debug for BinanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked_key = if self.api_key.len() > 8 {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        } else {
            "***REDACTED***".to_string()
        };

        f.debug_struct("BinanceConfig")
            .field("api_key", &masked_key)
            .field("api_secret", &"***REDACTED***")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("recv_window", &self.recv_window)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

impl BinanceConfig {
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i32,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    free: Decimal,
    locked: Decimal,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    base_asset: String,
    quote_asset: String,
    filters: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Kline(
    i64,               // 0: Open time
    Decimal,           // 1: Open
    Decimal,           // 2: High
    Decimal,           // 3: Low
    Decimal,           // 4: Close
    Decimal,           // 5: Volume
    i64,               // 6: Close time
    serde_json::Value, // 7: Quote asset volume
    serde_json::Value, // 8: Number of trades
    serde_json::Value, // 9: Taker buy base asset volume
    serde_json::Value, // 10: Taker buy quote asset volume
    serde_json::Value, // 11: Ignore
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: i64,
    #[serde(default)]
    client_order_id: String,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    stop_price: Option<Decimal>,
    orig_qty: Decimal,
    executed_qty: Decimal,
    #[serde(default)]
    cummulative_quote_qty: Option<Decimal>,
    status: String,
    #[serde(rename = "type")]
    order_type: String,
    side: String,
    #[serde(default)]
    fills: Vec<FillEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillEntry {
    price: Decimal,
    qty: Decimal,
    commission: Decimal,
    commission_asset: String,
}

// ============================================================================
// Client
// ============================================================================

/// Authenticated Binance Spot client
///
/// Cloneable; clones share the HTTP pool and the rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    config: BinanceConfig,
    client: Client,
    rate_limiter: Arc<BinanceRateLimiter>,
}

impl BinanceClient {
    pub fn new(config: BinanceConfig) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExchangeError::fatal(format!("Failed to build HTTP client: {}", e)))?;

        let rpm = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            config,
            client,
            rate_limiter,
        })
    }

    /// HMAC-SHA256 signature of a query string
    fn sign(&self, query: &str) -> ExchangeResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|e| ExchangeError::fatal(format!("Invalid API secret: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Send a request and decode the body, keeping the raw JSON alongside
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        mut params: Vec<(&str, String)>,
        signed: bool,
    ) -> ExchangeResult<(T, serde_json::Value)> {
        self.rate_limiter.until_ready().await;

        if signed {
            params.push(("recvWindow", self.config.recv_window.to_string()));
            params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        }

        let mut query = Self::build_query(&params);
        if signed {
            let signature = self.sign(&query)?;
            query = if query.is_empty() {
                format!("signature={}", signature)
            } else {
                format!("{}&signature={}", query, signature)
            };
        }

        let url = if query.is_empty() {
            format!("{}{}", self.config.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.config.base_url, endpoint, query)
        };

        tracing::debug!("{} {}", method, endpoint);

        let mut request = self.client.request(method, &url);
        if signed {
            request = request.header("X-MBX-APIKEY", &self.config.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let raw: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
                ExchangeError::fatal(format!("Failed to parse response: {} - Body: {}", e, body))
            })?;
            let parsed = serde_json::from_value(raw.clone()).map_err(|e| {
                ExchangeError::fatal(format!("Unexpected response shape: {} - Body: {}", e, body))
            })?;
            return Ok((parsed, raw));
        }

        if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
            return Err(ExchangeError::from_api_code(error.code, &error.msg));
        }

        if status.as_u16() == 429 || status.as_u16() == 418 || status.is_server_error() {
            Err(ExchangeError::Transient(format!("HTTP {}: {}", status, body)))
        } else {
            Err(ExchangeError::Fatal {
                code: status.as_u16() as i32,
                message: body,
            })
        }
    }

    async fn place_order(
        &self,
        mut params: Vec<(&'static str, String)>,
        client_order_id: &str,
    ) -> ExchangeResult<OrderReport> {
        params.push(("newClientOrderId", client_order_id.to_string()));
        params.push(("newOrderRespType", "FULL".to_string()));

        let (resp, raw): (OrderResponse, _) =
            self.request(Method::POST, "/api/v3/order", params, true).await?;
        Ok(Self::to_report(resp, raw))
    }

    fn to_report(resp: OrderResponse, raw: serde_json::Value) -> OrderReport {
        let non_zero = |v: Option<Decimal>| v.filter(|d| !d.is_zero());

        OrderReport {
            remote_order_id: resp.order_id,
            client_order_id: resp.client_order_id,
            symbol: resp.symbol,
            side: parse_side(&resp.side),
            order_type: parse_order_type(&resp.order_type),
            status: parse_order_status(&resp.status),
            price: non_zero(resp.price),
            stop_price: non_zero(resp.stop_price),
            orig_qty: resp.orig_qty,
            executed_qty: resp.executed_qty,
            cumulative_quote_qty: resp.cummulative_quote_qty.unwrap_or(Decimal::ZERO),
            fills: resp
                .fills
                .into_iter()
                .map(|f| Fill {
                    price: f.price,
                    qty: f.qty,
                    commission: f.commission,
                    commission_asset: f.commission_asset,
                })
                .collect(),
            raw,
        }
    }
}

/// Map Binance order status onto the four states the engine tracks
pub fn parse_order_status(status: &str) -> OrderStatus {
    match status {
        "FILLED" => OrderStatus::Filled,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "CANCELED" | "EXPIRED" | "REJECTED" | "EXPIRED_IN_MATCH" => OrderStatus::Cancelled,
        _ => OrderStatus::New,
    }
}

fn parse_side(side: &str) -> OrderSide {
    if side == "BUY" {
        OrderSide::Buy
    } else {
        OrderSide::Sell
    }
}

fn parse_order_type(order_type: &str) -> OrderType {
    match order_type {
        "MARKET" => OrderType::Market,
        "TAKE_PROFIT_LIMIT" => OrderType::TakeProfitLimit,
        _ => OrderType::Limit,
    }
}

fn parse_filter_value(filters: &[serde_json::Value], filter_type: &str, key: &str) -> Option<Decimal> {
    filters
        .iter()
        .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(filter_type))
        .and_then(|f| f.get(key))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Decimal>().ok())
        .map(|d| d.normalize())
}

fn millis_to_datetime(millis: i64) -> ExchangeResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| ExchangeError::fatal(format!("Invalid timestamp {}", millis)))
}

fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn balances(&self) -> ExchangeResult<Vec<Balance>> {
        let (account, _): (AccountResponse, _) = self
            .request(Method::GET, "/api/v3/account", vec![("omitZeroBalances", "true".to_string())], true)
            .await?;

        Ok(account
            .balances
            .into_iter()
            .map(|b| Balance {
                asset: b.asset,
                free: b.free,
                locked: b.locked,
            })
            .collect())
    }

    async fn symbol_filter(&self, symbol: &str) -> ExchangeResult<SymbolFilter> {
        let (info, _): (ExchangeInfo, _) = self
            .request(
                Method::GET,
                "/api/v3/exchangeInfo",
                vec![("symbol", symbol.to_string())],
                false,
            )
            .await?;

        let entry = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::NotFound(format!("Symbol {} not listed", symbol)))?;

        let tick_size = parse_filter_value(&entry.filters, "PRICE_FILTER", "tickSize")
            .ok_or_else(|| ExchangeError::fatal(format!("{} has no PRICE_FILTER", symbol)))?;
        let step_size = parse_filter_value(&entry.filters, "LOT_SIZE", "stepSize")
            .ok_or_else(|| ExchangeError::fatal(format!("{} has no LOT_SIZE", symbol)))?;

        Ok(SymbolFilter {
            symbol: entry.symbol,
            base_asset: entry.base_asset,
            quote_asset: entry.quote_asset,
            tick_size,
            step_size,
        })
    }

    async fn candles(&self, symbol: &str, interval: &str, limit: u16) -> ExchangeResult<Vec<Candle>> {
        let (klines, _): (Vec<Kline>, _) = self
            .request(
                Method::GET,
                "/api/v3/klines",
                vec![
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
                false,
            )
            .await?;

        klines
            .into_iter()
            .map(|k| {
                Ok(Candle {
                    symbol: symbol.to_string(),
                    open_time: millis_to_datetime(k.0)?,
                    close_time: millis_to_datetime(k.6)?,
                    open: decimal_to_f64(k.1),
                    high: decimal_to_f64(k.2),
                    low: decimal_to_f64(k.3),
                    close: decimal_to_f64(k.4),
                    volume: decimal_to_f64(k.5),
                })
            })
            .collect()
    }

    async fn ticker_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let (ticker, _): (TickerPrice, _) = self
            .request(
                Method::GET,
                "/api/v3/ticker/price",
                vec![("symbol", symbol.to_string())],
                false,
            )
            .await?;
        Ok(ticker.price)
    }

    async fn market_buy(
        &self,
        symbol: &str,
        quantity: Decimal,
        client_order_id: &str,
    ) -> ExchangeResult<OrderReport> {
        tracing::info!("Placing MARKET BUY {} {}", quantity, symbol);
        self.place_order(
            vec![
                ("symbol", symbol.to_string()),
                ("side", "BUY".to_string()),
                ("type", "MARKET".to_string()),
                ("quantity", quantity.normalize().to_string()),
            ],
            client_order_id,
        )
        .await
    }

    async fn market_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        client_order_id: &str,
    ) -> ExchangeResult<OrderReport> {
        tracing::info!("Placing MARKET SELL {} {}", quantity, symbol);
        self.place_order(
            vec![
                ("symbol", symbol.to_string()),
                ("side", "SELL".to_string()),
                ("type", "MARKET".to_string()),
                ("quantity", quantity.normalize().to_string()),
            ],
            client_order_id,
        )
        .await
    }

    async fn take_profit_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        stop_price: Decimal,
        client_order_id: &str,
    ) -> ExchangeResult<OrderReport> {
        tracing::info!(
            "Placing TAKE_PROFIT_LIMIT SELL {} {} @ {}",
            quantity,
            symbol,
            stop_price
        );
        let price = stop_price.normalize().to_string();
        self.place_order(
            vec![
                ("symbol", symbol.to_string()),
                ("side", "SELL".to_string()),
                ("type", "TAKE_PROFIT_LIMIT".to_string()),
                ("timeInForce", "GTC".to_string()),
                ("quantity", quantity.normalize().to_string()),
                ("price", price.clone()),
                ("stopPrice", price),
            ],
            client_order_id,
        )
        .await
    }

    async fn order_status(&self, symbol: &str, remote_order_id: i64) -> ExchangeResult<OrderReport> {
        let (resp, raw): (OrderResponse, _) = self
            .request(
                Method::GET,
                "/api/v3/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("orderId", remote_order_id.to_string()),
                ],
                true,
            )
            .await?;
        Ok(Self::to_report(resp, raw))
    }

    async fn cancel_order(&self, symbol: &str, remote_order_id: i64) -> ExchangeResult<OrderReport> {
        let (resp, raw): (OrderResponse, _) = self
            .request(
                Method::DELETE,
                "/api/v3/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("orderId", remote_order_id.to_string()),
                ],
                true,
            )
            .await?;

        tracing::info!("Order {} on {} cancelled", remote_order_id, symbol);
        Ok(Self::to_report(resp, raw))
    }
}
