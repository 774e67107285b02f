use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spotbot::api::{ExchangeError, SimulatedCall, SimulatedExchange};
use spotbot::app::Services;
use spotbot::cache::NoopCache;
use spotbot::config::Settings;
use spotbot::db::{MemoryStore, TradeStore};
use spotbot::execution::lifecycle::order_for_role;
use spotbot::execution::ExecutionOutcome;
use spotbot::models::{
    ExitType, OrderRole, OrderStatus, SnapshotType, SymbolFilter, TpStatus, Trade, TradeEvent, TradeStatus,
};
use spotbot::notify::LogNotifier;
use spotbot::repair::{OrphanClass, Target};
use spotbot::sizing::SizedOrder;
use spotbot::wallet::GrowthReport;
use std::sync::Arc;

struct Bot {
    exchange: Arc<SimulatedExchange>,
    store: Arc<MemoryStore>,
    services: Services,
}

fn bot() -> Bot {
    let _ = tracing_subscriber::fmt::try_init();

    let exchange = Arc::new(SimulatedExchange::new("USDT"));
    exchange.list_symbol("BTCUSDT", "BTC", dec!(0.01), dec!(0.00001));
    exchange.list_symbol("SOLUSDT", "SOL", dec!(0.01), dec!(0.01));
    exchange.set_price("BTCUSDT", dec!(50000));
    exchange.set_price("SOLUSDT", dec!(100));
    exchange.set_balance("USDT", dec!(1000), dec!(0));

    let store = Arc::new(MemoryStore::new());
    let services = Services::from_parts(
        Settings::default(),
        exchange.clone(),
        store.clone(),
        Arc::new(NoopCache),
        Arc::new(LogNotifier),
    );

    Bot {
        exchange,
        store,
        services,
    }
}

fn filter(symbol: &str, base: &str, step: Decimal) -> SymbolFilter {
    SymbolFilter {
        symbol: symbol.to_string(),
        base_asset: base.to_string(),
        quote_asset: "USDT".to_string(),
        tick_size: dec!(0.01),
        step_size: step,
    }
}

async fn open_btc(bot: &Bot) -> Trade {
    let sized = SizedOrder {
        symbol: "BTCUSDT".to_string(),
        base_asset: "BTC".to_string(),
        entry_price: dec!(50000),
        quantity: dec!(0.005),
        investment: dec!(250),
        take_profit_1_price: dec!(51000),
        take_profit_2_price: dec!(52000),
    };
    let outcome = bot
        .services
        .executor()
        .execute(&sized, &filter("BTCUSDT", "BTC", dec!(0.00001)))
        .await
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Protected { .. }), "{:?}", outcome);
    outcome.trade().clone()
}

async fn open_sol(bot: &Bot) -> Trade {
    let sized = SizedOrder {
        symbol: "SOLUSDT".to_string(),
        base_asset: "SOL".to_string(),
        entry_price: dec!(100),
        quantity: dec!(1),
        investment: dec!(100),
        take_profit_1_price: dec!(105),
        take_profit_2_price: dec!(106),
    };
    let outcome = bot
        .services
        .executor()
        .execute(&sized, &filter("SOLUSDT", "SOL", dec!(0.01)))
        .await
        .unwrap();
    outcome.trade().clone()
}

async fn remote_id(bot: &Bot, trade_id: i64, role: OrderRole) -> i64 {
    let orders = bot.store.orders_by_trade(trade_id).await.unwrap();
    order_for_role(&orders, role).unwrap().remote_order_id
}

#[tokio::test]
async fn test_both_take_profits_close_trade_with_weighted_exit() {
    let bot = bot();
    let trade = open_btc(&bot).await;
    let reconciler = bot.services.reconciler();

    bot.exchange.fill_order(remote_id(&bot, trade.id, OrderRole::Tp1).await).unwrap();
    bot.exchange.set_price("BTCUSDT", dec!(51200));
    let first = reconciler.run_sweep().await.unwrap();
    assert_eq!(first.filled_slots, 1);
    assert!(first.closed.is_empty());

    let mid = bot.store.get_trade(trade.id).await.unwrap();
    assert_eq!(mid.tp1_status, TpStatus::Filled);
    assert_eq!(mid.tp1_executed_qty, Some(dec!(0.002)));
    assert_eq!(mid.status, TradeStatus::Open);

    bot.exchange.fill_order(remote_id(&bot, trade.id, OrderRole::Tp2).await).unwrap();
    bot.exchange.set_price("BTCUSDT", dec!(52100));
    let second = reconciler.run_sweep().await.unwrap();
    assert_eq!(second.closed, vec![trade.id]);

    // 0.002 @ 51000 + 0.003 @ 52000 = 258 on 250 invested
    let closed = bot.store.get_trade(trade.id).await.unwrap();
    assert_eq!(closed.status, TradeStatus::Closed);
    assert_eq!(closed.exit_type, Some(ExitType::TakeProfit));
    assert_eq!(closed.exit_price, Some(dec!(51600)));
    assert_eq!(closed.profit_loss, Some(dec!(8)));
    assert_eq!(closed.profit_loss_percent, Some(dec!(3.2)));
    assert!(closed.closed_at.is_some());

    let logs = bot.store.trade_logs(trade.id).await.unwrap();
    assert!(logs.iter().any(|l| l.event == TradeEvent::Closed));

    let snapshots = bot.store.all_snapshots().await;
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].snapshot_type, SnapshotType::BeforeTrade);
    assert_eq!(snapshots[1].snapshot_type, SnapshotType::AfterTrade);
    assert_eq!(snapshots[1].balance, dec!(1008));

    match bot.services.ledger.total_growth().await.unwrap() {
        GrowthReport::Growth {
            difference,
            growth_percent,
            ..
        } => {
            assert_eq!(difference, dec!(8));
            assert_eq!(growth_percent, dec!(0.8));
        }
        other => panic!("Expected growth, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fill_below_tolerance_is_not_trusted() {
    let bot = bot();
    let trade = open_sol(&bot).await;
    let reconciler = bot.services.reconciler();

    bot.exchange.fill_order(remote_id(&bot, trade.id, OrderRole::Tp1).await).unwrap();
    bot.exchange.set_price("SOLUSDT", dec!(104));

    // 105 * (1 - 0.001) = 104.895 > 104
    let report = reconciler.run_sweep().await.unwrap();
    assert_eq!(report.validation_failures, 1);
    assert_eq!(report.filled_slots, 0);

    let unchanged = bot.store.get_trade(trade.id).await.unwrap();
    assert_eq!(unchanged.tp1_status, TpStatus::Pending);
    assert_eq!(unchanged.status, TradeStatus::Open);
    let logs = bot.store.trade_logs(trade.id).await.unwrap();
    assert!(logs.iter().any(|l| l.event == TradeEvent::FillValidationFailed));

    // Next cycle with the market at the target confirms it
    bot.exchange.set_price("SOLUSDT", dec!(104.9));
    let report = reconciler.run_sweep().await.unwrap();
    assert_eq!(report.filled_slots, 1);
    let confirmed = bot.store.get_trade(trade.id).await.unwrap();
    assert_eq!(confirmed.tp1_status, TpStatus::Filled);
}

#[tokio::test]
async fn test_repeated_sweep_without_exchange_change_is_idempotent() {
    let bot = bot();
    let trade = open_btc(&bot).await;
    let reconciler = bot.services.reconciler();

    bot.exchange.fill_order(remote_id(&bot, trade.id, OrderRole::Tp1).await).unwrap();
    bot.exchange.set_price("BTCUSDT", dec!(51000));
    reconciler.run_sweep().await.unwrap();

    let trade_before = bot.store.get_trade(trade.id).await.unwrap();
    let orders_before = bot.store.orders_by_trade(trade.id).await.unwrap();
    let logs_before = bot.store.trade_logs(trade.id).await.unwrap().len();

    let report = reconciler.run_sweep().await.unwrap();
    assert_eq!(report.filled_slots, 0);
    assert_eq!(report.synced_orders, 0);

    assert_eq!(bot.store.get_trade(trade.id).await.unwrap(), trade_before);
    assert_eq!(bot.store.orders_by_trade(trade.id).await.unwrap(), orders_before);
    assert_eq!(bot.store.trade_logs(trade.id).await.unwrap().len(), logs_before);
}

#[tokio::test]
async fn test_exchange_error_isolated_to_one_trade() {
    let bot = bot();
    let btc = open_btc(&bot).await;
    let sol = open_sol(&bot).await;

    bot.exchange.fill_order(remote_id(&bot, btc.id, OrderRole::Tp1).await).unwrap();
    bot.exchange.set_price("BTCUSDT", dec!(51000));
    // BTC reads both of its take-profits first, then SOL's first read times out
    bot.exchange
        .fail_after(SimulatedCall::OrderStatus, 2, ExchangeError::Transient("timeout".to_string()));

    let report = bot.services.reconciler().run_sweep().await.unwrap();

    assert_eq!(report.checked, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].0, sol.id);
    assert_eq!(report.filled_slots, 1);

    assert_eq!(bot.store.get_trade(btc.id).await.unwrap().tp1_status, TpStatus::Filled);
    let sol_logs = bot.store.trade_logs(sol.id).await.unwrap();
    assert!(sol_logs.iter().any(|l| l.event == TradeEvent::Error));
    let btc_logs = bot.store.trade_logs(btc.id).await.unwrap();
    assert!(!btc_logs.iter().any(|l| l.event == TradeEvent::Error));
}

#[tokio::test]
async fn test_fill_log_written_only_with_committed_fill() {
    let bot = bot();
    let trade = open_btc(&bot).await;
    let reconciler = bot.services.reconciler();

    bot.exchange.fill_order(remote_id(&bot, trade.id, OrderRole::Tp1).await).unwrap();
    bot.exchange.set_price("BTCUSDT", dec!(51000));
    // TP1 validates, then the TP2 read fails and the trade is not committed
    bot.exchange
        .fail_after(SimulatedCall::OrderStatus, 1, ExchangeError::Transient("timeout".to_string()));

    let report = reconciler.run_sweep().await.unwrap();
    assert_eq!(report.errors.len(), 1);
    assert_eq!(bot.store.get_trade(trade.id).await.unwrap().tp1_status, TpStatus::Pending);
    let fills = |logs: &[spotbot::models::TradeLogEntry]| {
        logs.iter().filter(|l| l.event == TradeEvent::TakeProfitFilled).count()
    };
    assert_eq!(fills(&bot.store.trade_logs(trade.id).await.unwrap()), 0);

    reconciler.run_sweep().await.unwrap();
    assert_eq!(bot.store.get_trade(trade.id).await.unwrap().tp1_status, TpStatus::Filled);
    assert_eq!(fills(&bot.store.trade_logs(trade.id).await.unwrap()), 1);
}

#[tokio::test]
async fn test_purged_order_is_benign() {
    let bot = bot();
    let trade = open_btc(&bot).await;
    bot.exchange.purge_order(remote_id(&bot, trade.id, OrderRole::Tp2).await);

    let report = bot.services.reconciler().run_sweep().await.unwrap();

    assert_eq!(report.not_found, 1);
    assert!(report.errors.is_empty());
    let still_open = bot.store.get_trade(trade.id).await.unwrap();
    assert_eq!(still_open.status, TradeStatus::Open);
    assert_eq!(still_open.tp2_status, TpStatus::Pending);
}

#[tokio::test]
async fn test_cancelled_take_profit_synced_then_repaired() {
    let bot = bot();
    let trade = open_btc(&bot).await;
    let tp2 = remote_id(&bot, trade.id, OrderRole::Tp2).await;
    bot.exchange.set_order_status(tp2, OrderStatus::Cancelled);
    // The simulated status flip keeps the base locked; release it as a real cancel would
    bot.exchange.set_balance("BTC", dec!(0.003), dec!(0.002));

    let report = bot.services.reconciler().run_sweep().await.unwrap();
    assert_eq!(report.synced_orders, 1);

    let orders = bot.store.orders_by_trade(trade.id).await.unwrap();
    assert_eq!(order_for_role(&orders, OrderRole::Tp2).unwrap().status, OrderStatus::Cancelled);
    assert_eq!(bot.store.get_trade(trade.id).await.unwrap().tp2_status, TpStatus::Pending);

    let repair = bot.services.orphan_repair();
    let classes = repair.classify_open(&Target::All).await.unwrap();
    assert_eq!(classes[0].class, OrphanClass::OrphanPartial);

    let report = repair.repair(&Target::TradeId(trade.id), false).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.errors);

    let orders = bot.store.orders_by_trade(trade.id).await.unwrap();
    let replacement = order_for_role(&orders, OrderRole::Tp2).unwrap();
    assert_eq!(replacement.status, OrderStatus::New);
    assert_ne!(replacement.remote_order_id, tp2);
    assert_eq!(replacement.quantity, dec!(0.003));
}

#[tokio::test]
async fn test_liquidation_after_partial_exit() {
    let bot = bot();
    let btc = open_btc(&bot).await;
    let sol = open_sol(&bot).await;

    bot.exchange.fill_order(remote_id(&bot, btc.id, OrderRole::Tp1).await).unwrap();
    bot.exchange.set_price("BTCUSDT", dec!(50000));
    bot.exchange.set_price("SOLUSDT", dec!(99));

    let report = bot.services.liquidator().liquidate(&Target::All, false).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.errors);
    assert!(bot.store.open_trades().await.unwrap().is_empty());

    // 0.002 @ 51000 + 0.003 @ 50000 - 250
    let btc = bot.store.get_trade(btc.id).await.unwrap();
    assert_eq!(btc.exit_type, Some(ExitType::Emergency));
    assert_eq!(btc.profit_loss, Some(dec!(2)));

    let sol = bot.store.get_trade(sol.id).await.unwrap();
    assert_eq!(sol.exit_price, Some(dec!(99)));
    assert_eq!(sol.profit_loss, Some(dec!(-1)));

    assert!(bot.exchange.open_order_ids("BTCUSDT").is_empty());
    assert!(bot.exchange.open_order_ids("SOLUSDT").is_empty());
}
