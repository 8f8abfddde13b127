use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::testing::{ExchangeCall, RecordingExchange, RecordingNotifier};
use common::{Candle, OrderSide, Position, Signal, StopKind};
use engine::{CandleLedger, IngestOutcome, Trader};
use risk::{ExitGuard, PositionController, RiskConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

const MINUTE_MS: i64 = 60_000;
const T0: i64 = 1_700_000_040_000;

/// Buys exactly when the ledger holds 26 candles and counts evaluations.
struct BuyOn26 {
    evaluations: Arc<AtomicUsize>,
}

impl strategy::Strategy for BuyOn26 {
    fn name(&self) -> &str {
        "buy-on-26"
    }

    fn evaluate(&self, candles: &[Candle]) -> Option<Signal> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        (candles.len() == 26).then_some(Signal::Buy)
    }
}

fn close_at(i: i64) -> Decimal {
    (dec!(100) + Decimal::from(i * 3) / Decimal::from(29)).round_dp(6)
}

fn kline(i: i64, close: Decimal, closed: bool) -> Value {
    let open_ms = T0 + i * MINUTE_MS;
    json!({
        "e": "kline",
        "E": open_ms + MINUTE_MS,
        "s": "BTCUSDT",
        "k": {
            "t": open_ms,
            "T": open_ms + MINUTE_MS - 1,
            "s": "BTCUSDT",
            "i": "1m",
            "o": close.to_string(),
            "h": close.to_string(),
            "l": close.to_string(),
            "c": close.to_string(),
            "v": "12.5",
            "x": closed
        }
    })
}

struct Harness {
    trader: Trader,
    exchange: Arc<RecordingExchange>,
    notifier: Arc<RecordingNotifier>,
    evaluations: Arc<AtomicUsize>,
}

fn harness() -> Harness {
    harness_with_capacity(1000)
}

fn harness_with_capacity(capacity: usize) -> Harness {
    let exchange = Arc::new(RecordingExchange::new(dec!(102.5)));
    let notifier = Arc::new(RecordingNotifier::default());
    let evaluations = Arc::new(AtomicUsize::new(0));
    let config = RiskConfig::default();

    let controller = PositionController::new(
        "BTCUSDT",
        config.clone(),
        exchange.clone(),
        notifier.clone(),
    );
    let guard = ExitGuard::new(config, notifier.clone());
    let trader = Trader::new(
        CandleLedger::new(capacity).unwrap(),
        controller,
        guard,
        Box::new(BuyOn26 {
            evaluations: evaluations.clone(),
        }),
    );
    Harness {
        trader,
        exchange,
        notifier,
        evaluations,
    }
}

fn history(range: std::ops::Range<i64>) -> Vec<Candle> {
    range
        .map(|i| Candle {
            open_time: common::timestamp_from_ms(T0 + i * MINUTE_MS),
            open: close_at(i),
            high: close_at(i),
            low: close_at(i),
            close: close_at(i),
            volume: dec!(1),
        })
        .collect()
}

/// Every candle arrives over the stream; the 26th triggers the entry.
#[tokio::test]
async fn rising_market_opens_one_protected_long() {
    let h = harness();

    for i in 0..30 {
        let outcome = h.trader.handle(&kline(i, close_at(i), true)).await;
        assert_eq!(outcome, IngestOutcome::Accepted(i as usize + 1));
    }

    assert_eq!(h.exchange.market_orders(), vec![(OrderSide::Buy, dec!(0.002))]);

    let stops = h.exchange.stop_orders();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[0].kind, StopKind::TakeProfitMarket);
    assert_eq!(stops[1].kind, StopKind::StopMarket);
    assert!(stops.iter().all(|s| s.side == OrderSide::Sell && s.close_position));
    assert!(stops[0].stop_price > dec!(102.5));
    assert!(stops[1].stop_price < dec!(102.5));

    let snapshot = h.trader.snapshot();
    match &snapshot.position {
        Position::Long(open) => {
            assert_eq!(open.entry_price, dec!(102.5));
            assert_eq!(open.quantity, dec!(0.002));
        }
        other => panic!("expected a long position, got {other}"),
    }
    assert!(snapshot.exit_state.protective_orders_active);
    assert_eq!(snapshot.candles, 30);
    assert_eq!(snapshot.last_close, Some(close_at(29)));
    assert_eq!(h.evaluations.load(Ordering::SeqCst), 30);
    assert_eq!(h.notifier.count_containing("[LONG]"), 1);
    assert_eq!(h.notifier.count_containing("[FALLBACK]"), 0);
}

#[tokio::test]
async fn duplicates_and_open_candles_are_not_evaluated() {
    let h = harness();

    assert_eq!(
        h.trader.handle(&json!({"result": null, "id": 1})).await,
        IngestOutcome::Ignored
    );
    assert_eq!(
        h.trader.handle(&kline(0, close_at(0), false)).await,
        IngestOutcome::Ignored
    );
    assert_eq!(
        h.trader.handle(&kline(0, close_at(0), true)).await,
        IngestOutcome::Accepted(1)
    );
    assert_eq!(
        h.trader.handle(&kline(0, dec!(250), true)).await,
        IngestOutcome::Duplicate
    );

    assert_eq!(h.evaluations.load(Ordering::SeqCst), 1);
    assert_eq!(h.trader.snapshot().last_close, Some(close_at(0)));
    assert!(h.exchange.calls().is_empty());
}

#[tokio::test]
async fn subscribers_see_state_after_each_message() {
    let h = harness();
    let mut rx = h.trader.subscribe();
    assert_eq!(rx.borrow_and_update().candles, 0);

    h.trader.handle(&kline(0, close_at(0), true)).await;

    assert!(rx.has_changed().unwrap());
    let snapshot = rx.borrow_and_update().clone();
    assert_eq!(snapshot.symbol, "BTCUSDT");
    assert_eq!(snapshot.candles, 1);
    assert!(snapshot.position.is_flat());
}

#[tokio::test]
async fn history_seed_fills_the_ledger_without_trading() {
    let h = harness();
    h.exchange.set_history(history(0..26));

    let inserted = h.trader.seed_history(h.exchange.as_ref(), "1m", 24).await;

    assert_eq!(inserted, 26);
    assert_eq!(h.trader.snapshot().candles, 26);
    assert_eq!(h.evaluations.load(Ordering::SeqCst), 0);
    assert_eq!(h.exchange.calls(), vec![ExchangeCall::History]);

    // The next streamed candle is the 27th; the stub only buys at 26.
    h.trader.handle(&kline(26, close_at(26), true)).await;
    assert!(h.exchange.market_orders().is_empty());
}

#[tokio::test]
async fn seeded_history_then_one_streamed_candle_opens_a_long() {
    let h = harness();
    h.exchange.set_history(history(0..25));

    assert_eq!(h.trader.seed_history(h.exchange.as_ref(), "1m", 24).await, 25);
    h.exchange.clear_calls();

    let outcome = h.trader.handle(&kline(25, close_at(25), true)).await;
    assert_eq!(outcome, IngestOutcome::Accepted(26));

    assert_eq!(h.exchange.market_orders(), vec![(OrderSide::Buy, dec!(0.002))]);
    let stops = h.exchange.stop_orders();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[0].kind, StopKind::TakeProfitMarket);
    assert_eq!(stops[1].kind, StopKind::StopMarket);

    let snapshot = h.trader.snapshot();
    match &snapshot.position {
        Position::Long(open) => assert_eq!(open.entry_price, dec!(102.5)),
        other => panic!("expected a long position, got {other}"),
    }
    assert!(snapshot.exit_state.protective_orders_active);
    assert_eq!(h.evaluations.load(Ordering::SeqCst), 1);
    assert_eq!(h.notifier.count_containing("[LONG]"), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_history_gives_up_and_leaves_the_trader_usable() {
    let h = harness();
    h.exchange.set_history(history(0..26));
    h.exchange.stall_history(true);

    let inserted = tokio::time::timeout(
        Duration::from_secs(3600),
        h.trader.seed_history(h.exchange.as_ref(), "1m", 24),
    )
    .await
    .expect("seed_history must honour the exchange timeout");

    assert_eq!(inserted, 0);
    assert_eq!(h.trader.snapshot().candles, 0);
    assert_eq!(h.exchange.calls(), vec![ExchangeCall::History]);

    // The core lock was released: streamed candles are processed as usual.
    assert_eq!(
        h.trader.handle(&kline(0, close_at(0), true)).await,
        IngestOutcome::Accepted(1)
    );
    assert_eq!(h.evaluations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn candle_older_than_a_full_window_is_not_evaluated() {
    let h = harness_with_capacity(26);
    h.exchange.set_history(history(10..36));
    assert_eq!(h.trader.seed_history(h.exchange.as_ref(), "1m", 24).await, 26);

    assert_eq!(
        h.trader.handle(&kline(3, close_at(3), true)).await,
        IngestOutcome::Stale
    );

    assert_eq!(h.evaluations.load(Ordering::SeqCst), 0);
    assert_eq!(h.trader.snapshot().candles, 26);
    assert!(h.exchange.market_orders().is_empty());
}
