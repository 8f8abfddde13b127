use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::{Candle, ExchangePosition, Fill, OpenOrder, OrderAck, OrderSide, Result, StopOrder};

/// Abstraction over the futures trading API.
///
/// `BinanceClient` implements this for live trading.
/// `PaperClient` implements this for simulation.
///
/// Only the `PositionController` in `crates/risk` places or cancels orders;
/// the `ExitGuard` lists them. The startup path reads history and balance.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Submit a market order and return the fill.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<Fill>;

    /// Submit a take-profit or stop-loss order.
    async fn place_stop_order(&self, order: &StopOrder) -> Result<OrderAck>;

    /// Cancel a live order. Cancelling an order the exchange no longer knows
    /// about succeeds.
    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<()>;

    /// All working orders for the symbol.
    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>>;

    /// Non-zero positions the exchange holds for the symbol.
    async fn positions(&self, symbol: &str) -> Result<Vec<ExchangePosition>>;

    /// Closed candles with open time in `[start, end]`, oldest first.
    async fn historical_candles(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// Wallet balance of a single asset, e.g. "USDT".
    async fn account_balance(&self, asset: &str) -> Result<Decimal>;
}
