//! In-memory doubles for the exchange and notifier, shared by the workspace's
//! tests. Enabled with the `testing` feature.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::{
    Candle, Error, ExchangeClient, ExchangePosition, Fill, Notifier, OpenOrder, OrderAck,
    OrderSide, Result, StopOrder,
};

/// One recorded call against [`RecordingExchange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeCall {
    MarketOrder { side: OrderSide, quantity: Decimal },
    StopOrder(StopOrder),
    Cancel(u64),
    OpenOrders,
    Positions,
    History,
    Balance,
}

/// Scriptable exchange that records every call.
///
/// Accepted stop orders show up in `open_orders` until cancelled.
pub struct RecordingExchange {
    calls: Mutex<Vec<ExchangeCall>>,
    fill_price: Mutex<Decimal>,
    open: Mutex<Vec<OpenOrder>>,
    history: Mutex<Vec<Candle>>,
    positions: Mutex<Vec<ExchangePosition>>,
    next_id: AtomicU64,
    fail_market: AtomicBool,
    fail_stop: AtomicBool,
    fail_list: AtomicBool,
    stall_market: AtomicBool,
    stall_history: AtomicBool,
}

impl RecordingExchange {
    pub fn new(fill_price: Decimal) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fill_price: Mutex::new(fill_price),
            open: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            positions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            fail_market: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
            stall_market: AtomicBool::new(false),
            stall_history: AtomicBool::new(false),
        }
    }

    pub fn set_fill_price(&self, price: Decimal) {
        *self.fill_price.lock().unwrap() = price;
    }

    pub fn fail_market_orders(&self, fail: bool) {
        self.fail_market.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop_orders(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn fail_open_orders(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Market orders never complete while set.
    pub fn stall_market_orders(&self, stall: bool) {
        self.stall_market.store(stall, Ordering::SeqCst);
    }

    pub fn set_history(&self, candles: Vec<Candle>) {
        *self.history.lock().unwrap() = candles;
    }

    /// History requests never complete while set.
    pub fn stall_history(&self, stall: bool) {
        self.stall_history.store(stall, Ordering::SeqCst);
    }

    pub fn set_positions(&self, positions: Vec<ExchangePosition>) {
        *self.positions.lock().unwrap() = positions;
    }

    /// Drop all working orders, as if the exchange had filled or expired them.
    pub fn clear_open_orders(&self) {
        self.open.lock().unwrap().clear();
    }

    pub fn push_open_order(&self, order: OpenOrder) {
        self.open.lock().unwrap().push(order);
    }

    pub fn calls(&self) -> Vec<ExchangeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn market_orders(&self) -> Vec<(OrderSide, Decimal)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ExchangeCall::MarketOrder { side, quantity } => Some((side, quantity)),
                _ => None,
            })
            .collect()
    }

    pub fn stop_orders(&self) -> Vec<StopOrder> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ExchangeCall::StopOrder(order) => Some(order),
                _ => None,
            })
            .collect()
    }

    pub fn cancels(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ExchangeCall::Cancel(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ExchangeCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_order_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeClient for RecordingExchange {
    async fn place_market_order(
        &self,
        _symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<Fill> {
        self.record(ExchangeCall::MarketOrder { side, quantity });
        if self.stall_market.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_market.load(Ordering::SeqCst) {
            return Err(Error::Exchange("market order rejected".into()));
        }
        Ok(Fill {
            order_id: self.next_order_id(),
            side,
            fill_price: *self.fill_price.lock().unwrap(),
            quantity,
            timestamp: Utc::now(),
        })
    }

    async fn place_stop_order(&self, order: &StopOrder) -> Result<OrderAck> {
        self.record(ExchangeCall::StopOrder(order.clone()));
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::Exchange("stop order rejected".into()));
        }
        let order_id = self.next_order_id();
        self.open.lock().unwrap().push(OpenOrder {
            order_id,
            side: order.side,
            order_type: order.kind.as_str().to_string(),
            status: "NEW".into(),
            price: Decimal::ZERO,
            stop_price: order.stop_price,
        });
        Ok(OrderAck { order_id })
    }

    async fn cancel_order(&self, _symbol: &str, order_id: u64) -> Result<()> {
        self.record(ExchangeCall::Cancel(order_id));
        self.open.lock().unwrap().retain(|o| o.order_id != order_id);
        Ok(())
    }

    async fn open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>> {
        self.record(ExchangeCall::OpenOrders);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::Exchange("open orders unavailable".into()));
        }
        Ok(self.open.lock().unwrap().clone())
    }

    async fn positions(&self, _symbol: &str) -> Result<Vec<ExchangePosition>> {
        self.record(ExchangeCall::Positions);
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn historical_candles(
        &self,
        _symbol: &str,
        _interval: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        self.record(ExchangeCall::History);
        if self.stall_history.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.history.lock().unwrap().clone())
    }

    async fn account_balance(&self, _asset: &str) -> Result<Decimal> {
        self.record(ExchangeCall::Balance);
        Ok(Decimal::ZERO)
    }
}

/// Notifier that keeps every message.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.contains(needle))
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, text: String) {
        self.messages.lock().unwrap().push(text);
    }
}
