use mockito::Matcher;
use rust_decimal_macros::dec;
use spotbot::api::{BinanceClient, BinanceConfig, Exchange, ExchangeError};
use spotbot::models::{OrderStatus, OrderType};

fn client(server: &mockito::Server) -> BinanceClient {
    BinanceClient::new(BinanceConfig {
        api_key: "test-key".to_string(),
        api_secret: "test-secret".to_string(),
        base_url: server.url(),
        ..BinanceConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_symbol_filter_parsed_from_exchange_info() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/v3/exchangeInfo")
        .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
        .with_status(200)
        .with_body(
            r#"{"symbols":[{"symbol":"BTCUSDT","baseAsset":"BTC","quoteAsset":"USDT","filters":[
                {"filterType":"PRICE_FILTER","minPrice":"0.01000000","maxPrice":"1000000.00000000","tickSize":"0.01000000"},
                {"filterType":"LOT_SIZE","minQty":"0.00001000","maxQty":"9000.00000000","stepSize":"0.00001000"},
                {"filterType":"NOTIONAL","minNotional":"5.00000000"}
            ]}]}"#,
        )
        .create_async()
        .await;

    let filter = client(&server).symbol_filter("BTCUSDT").await.unwrap();

    assert_eq!(filter.base_asset, "BTC");
    assert_eq!(filter.quote_asset, "USDT");
    assert_eq!(filter.tick_size, dec!(0.01));
    assert_eq!(filter.step_size, dec!(0.00001));
}

#[tokio::test]
async fn test_candles_decoded_from_klines() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/v3/klines")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "ETHUSDT".into()),
            Matcher::UrlEncoded("interval".into(), "15m".into()),
            Matcher::UrlEncoded("limit".into(), "2".into()),
        ]))
        .with_status(200)
        .with_body(
            r#"[
                [1700000000000,"2000.00","2010.00","1990.00","2005.50","12.5",1700000899999,"0","10","0","0","0"],
                [1700000900000,"2005.50","2020.00","2001.00","2019.00","8.25",1700001799999,"0","7","0","0","0"]
            ]"#,
        )
        .create_async()
        .await;

    let candles = client(&server).candles("ETHUSDT", "15m", 2).await.unwrap();

    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].symbol, "ETHUSDT");
    assert_eq!(candles[0].close, 2005.5);
    assert_eq!(candles[1].open, 2005.5);
    assert_eq!(candles[1].close_time.timestamp_millis(), 1700001799999);
}

#[tokio::test]
async fn test_signed_order_sends_api_key_and_signature() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v3/order")
        .match_header("X-MBX-APIKEY", "test-key")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
            Matcher::UrlEncoded("side".into(), "SELL".into()),
            Matcher::UrlEncoded("type".into(), "TAKE_PROFIT_LIMIT".into()),
            Matcher::UrlEncoded("stopPrice".into(), "51000.5".into()),
            Matcher::UrlEncoded("quantity".into(), "0.002".into()),
            Matcher::Regex("signature=[0-9a-f]{64}".into()),
        ]))
        .with_status(200)
        .with_body(
            r#"{"symbol":"BTCUSDT","orderId":42,"clientOrderId":"spotbot-1-tp1-abcd1234",
                "price":"51000.50","stopPrice":"51000.50","origQty":"0.00200000","executedQty":"0.00000000",
                "cummulativeQuoteQty":"0.00000000","status":"NEW","type":"TAKE_PROFIT_LIMIT","side":"SELL","fills":[]}"#,
        )
        .create_async()
        .await;

    let report = client(&server)
        .take_profit_sell("BTCUSDT", dec!(0.002), dec!(51000.50), "spotbot-1-tp1-abcd1234")
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(report.remote_order_id, 42);
    assert_eq!(report.status, OrderStatus::New);
    assert_eq!(report.order_type, OrderType::TakeProfitLimit);
    assert_eq!(report.stop_price, Some(dec!(51000.50)));
    assert_eq!(report.raw["orderId"], 42);
}

#[tokio::test]
async fn test_market_fill_reports_average_price_and_commission() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/v3/order")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"symbol":"BTCUSDT","orderId":7,"clientOrderId":"spotbot-1-entry-00000000",
                "price":"0.00000000","origQty":"0.00300000","executedQty":"0.00300000",
                "cummulativeQuoteQty":"150.30000000","status":"FILLED","type":"MARKET","side":"BUY",
                "fills":[
                    {"price":"50000.00","qty":"0.00100000","commission":"0.00000100","commissionAsset":"BTC"},
                    {"price":"50150.00","qty":"0.00200000","commission":"0.00000200","commissionAsset":"BTC"}
                ]}"#,
        )
        .create_async()
        .await;

    let report = client(&server)
        .market_buy("BTCUSDT", dec!(0.003), "spotbot-1-entry-00000000")
        .await
        .unwrap();

    assert_eq!(report.status, OrderStatus::Filled);
    assert_eq!(report.price, None);
    assert_eq!(report.avg_price(), Some(dec!(50100)));
    assert_eq!(report.commission_in("BTC"), dec!(0.000003));
    assert_eq!(report.commission_in("BNB"), dec!(0));
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("DELETE", "/api/v3/order")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"code":-2011,"msg":"Unknown order sent."}"#)
        .create_async()
        .await;

    let err = client(&server).cancel_order("BTCUSDT", 99).await.unwrap_err();
    assert!(matches!(err, ExchangeError::NotFound(_)), "{:?}", err);
}

#[tokio::test]
async fn test_cancelled_and_expired_map_to_cancelled() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/v3/order")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"symbol":"BTCUSDT","orderId":5,"clientOrderId":"x","price":"51000","stopPrice":"51000",
                "origQty":"0.002","executedQty":"0","cummulativeQuoteQty":"0","status":"EXPIRED",
                "type":"TAKE_PROFIT_LIMIT","side":"SELL"}"#,
        )
        .create_async()
        .await;

    let report = client(&server).order_status("BTCUSDT", 5).await.unwrap();
    assert_eq!(report.status, OrderStatus::Cancelled);
    assert!(report.fills.is_empty());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/v3/ticker/price")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("Service Unavailable")
        .create_async()
        .await;

    let err = client(&server).ticker_price("BTCUSDT").await.unwrap_err();
    assert!(err.is_transient(), "{:?}", err);
}

#[tokio::test]
async fn test_balance_defaults_to_zero_for_missing_asset() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/v3/account")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"balances":[{"asset":"USDT","free":"120.50","locked":"30.00"}]}"#)
        .create_async()
        .await;

    let exchange = client(&server);
    let usdt = exchange.balance("USDT").await.unwrap();
    assert_eq!(usdt.free, dec!(120.50));
    assert_eq!(usdt.total(), dec!(150.50));

    let btc = exchange.balance("BTC").await.unwrap();
    assert_eq!(btc.total(), dec!(0));
}
