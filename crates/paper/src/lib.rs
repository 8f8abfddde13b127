use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    Candle, Error, ExchangeClient, ExchangePosition, Fill, OpenOrder, OrderAck, OrderSide, Result,
    StopKind, StopOrder,
};

/// Net position for one symbol. Quantity is signed: positive long, negative short.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaperPosition {
    pub quantity: Decimal,
    pub entry_price: Decimal,
}

#[derive(Debug, Clone)]
struct RestingStop {
    symbol: String,
    order: OpenOrder,
    kind: StopKind,
}

impl RestingStop {
    /// Take-profit sells fire at or above the stop, stop-loss sells at or
    /// below; buys are mirrored.
    fn triggered_by(&self, price: Decimal) -> bool {
        let stop = self.order.stop_price;
        match (self.order.side, self.kind) {
            (OrderSide::Sell, StopKind::TakeProfitMarket) | (OrderSide::Buy, StopKind::StopMarket) => {
                price >= stop
            }
            (OrderSide::Sell, StopKind::StopMarket) | (OrderSide::Buy, StopKind::TakeProfitMarket) => {
                price <= stop
            }
        }
    }
}

#[derive(Default)]
struct Book {
    prices: HashMap<String, Decimal>,
    positions: HashMap<String, PaperPosition>,
    stops: Vec<RestingStop>,
    balance_usd: Decimal,
    next_id: u64,
}

impl Book {
    fn next_order_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Book a fill against the net position, realising PnL on the reduced part.
    fn apply_fill(&mut self, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) {
        let signed = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };
        let pos = self.positions.entry(symbol.to_string()).or_default();
        let same_direction = pos.quantity.is_zero() || pos.quantity.is_sign_positive() == signed.is_sign_positive();

        if same_direction {
            let new_qty = pos.quantity + signed;
            pos.entry_price = (pos.entry_price * pos.quantity.abs() + price * quantity) / new_qty.abs();
            pos.quantity = new_qty;
            return;
        }

        let closed = quantity.min(pos.quantity.abs());
        let direction = if pos.quantity.is_sign_positive() { Decimal::ONE } else { -Decimal::ONE };
        let pnl = (price - pos.entry_price) * closed * direction;
        self.balance_usd += pnl;

        let new_qty = pos.quantity + signed;
        if new_qty.is_zero() {
            *pos = PaperPosition::default();
        } else if new_qty.is_sign_positive() != pos.quantity.is_sign_positive() {
            // Flipped through zero: the remainder opens at this price.
            pos.quantity = new_qty;
            pos.entry_price = price;
        } else {
            pos.quantity = new_qty;
        }
        debug!(%symbol, %pnl, balance = %self.balance_usd, "Paper PnL realised");
    }
}

/// Simulated exchange client for paper trading.
///
/// Market orders fill at the latest streamed price with configurable slippage.
/// Take-profit/stop-loss orders rest until `update_price` crosses their stop,
/// then close the whole position. No real orders are ever sent to Binance.
pub struct PaperClient {
    book: RwLock<Book>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: Decimal,
}

impl PaperClient {
    pub fn new(initial_balance_usd: Decimal, slippage_bps: Decimal) -> Self {
        info!(
            balance = %initial_balance_usd,
            slippage_bps = %slippage_bps,
            "PaperClient initialized"
        );
        Self {
            book: RwLock::new(Book {
                balance_usd: initial_balance_usd,
                ..Book::default()
            }),
            slippage_bps,
        }
    }

    fn slipped(&self, side: OrderSide, mid: Decimal) -> Decimal {
        let slip = self.slippage_bps / Decimal::new(10_000, 0);
        match side {
            OrderSide::Buy => mid * (Decimal::ONE + slip),
            OrderSide::Sell => mid * (Decimal::ONE - slip),
        }
    }

    /// Record the latest price and fire any resting stops it crosses.
    /// Returns the fills produced.
    pub async fn update_price(&self, symbol: &str, price: Decimal) -> Vec<Fill> {
        let mut book = self.book.write().await;
        book.prices.insert(symbol.to_string(), price);

        let (triggered, resting): (Vec<RestingStop>, Vec<RestingStop>) = std::mem::take(&mut book.stops)
            .into_iter()
            .partition(|s| s.symbol == symbol && s.triggered_by(price));
        book.stops = resting;

        let mut fills = Vec::new();
        for stop in triggered {
            let position = book.positions.get(symbol).copied().unwrap_or_default();
            if position.quantity.is_zero() {
                continue;
            }
            let quantity = position.quantity.abs();
            let fill_price = self.slipped(stop.order.side, price);
            book.apply_fill(symbol, stop.order.side, quantity, fill_price);
            info!(
                %symbol,
                kind = %stop.kind,
                stop_price = %stop.order.stop_price,
                %fill_price,
                "Paper protective order triggered"
            );
            fills.push(Fill {
                order_id: stop.order.order_id,
                side: stop.order.side,
                fill_price,
                quantity,
                timestamp: Utc::now(),
            });
        }

        if !fills.is_empty() {
            // closePosition orders expire with the position they protected.
            book.stops.retain(|s| s.symbol != symbol);
        }
        fills
    }

    pub async fn position(&self, symbol: &str) -> PaperPosition {
        self.book
            .read()
            .await
            .positions
            .get(symbol)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<Fill> {
        if quantity <= Decimal::ZERO {
            return Err(Error::Exchange(format!("invalid quantity {quantity}")));
        }
        let mut book = self.book.write().await;
        let mid = book.prices.get(symbol).copied().ok_or_else(|| {
            Error::Exchange(format!(
                "PaperClient has no price for '{symbol}'. Ensure market data is flowing."
            ))
        })?;

        let fill_price = self.slipped(side, mid);
        book.apply_fill(symbol, side, quantity, fill_price);
        let order_id = book.next_order_id();

        debug!(%symbol, %side, %mid, fill = %fill_price, %quantity, "Paper fill simulated");
        Ok(Fill {
            order_id,
            side,
            fill_price,
            quantity,
            timestamp: Utc::now(),
        })
    }

    async fn place_stop_order(&self, order: &StopOrder) -> Result<OrderAck> {
        if order.stop_price <= Decimal::ZERO {
            return Err(Error::Exchange(format!("invalid stop price {}", order.stop_price)));
        }
        let mut book = self.book.write().await;
        let order_id = book.next_order_id();
        let stop = RestingStop {
            symbol: order.symbol.clone(),
            order: OpenOrder {
                order_id,
                side: order.side,
                order_type: order.kind.as_str().to_string(),
                status: "NEW".into(),
                price: Decimal::ZERO,
                stop_price: order.stop_price,
            },
            kind: order.kind,
        };

        if let Some(&price) = book.prices.get(&order.symbol) {
            if stop.triggered_by(price) {
                return Err(Error::Exchange(format!(
                    "{} at {} would immediately trigger (last {price})",
                    order.kind, order.stop_price
                )));
            }
        }

        debug!(symbol = %order.symbol, kind = %order.kind, stop_price = %order.stop_price, order_id, "Paper stop order resting");
        book.stops.push(stop);
        Ok(OrderAck { order_id })
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<()> {
        let mut book = self.book.write().await;
        let before = book.stops.len();
        book.stops
            .retain(|s| !(s.symbol == symbol && s.order.order_id == order_id));
        if book.stops.len() == before {
            debug!(%symbol, order_id, "Paper cancel of unknown order");
        }
        Ok(())
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        Ok(self
            .book
            .read()
            .await
            .stops
            .iter()
            .filter(|s| s.symbol == symbol)
            .map(|s| s.order.clone())
            .collect())
    }

    async fn positions(&self, symbol: &str) -> Result<Vec<ExchangePosition>> {
        let book = self.book.read().await;
        let Some(pos) = book.positions.get(symbol).filter(|p| !p.quantity.is_zero()) else {
            return Ok(Vec::new());
        };
        let mark = book.prices.get(symbol).copied().unwrap_or(pos.entry_price);
        Ok(vec![ExchangePosition {
            symbol: symbol.to_string(),
            quantity: pos.quantity,
            entry_price: pos.entry_price,
            unrealized_pnl: (mark - pos.entry_price) * pos.quantity,
        }])
    }

    async fn historical_candles(
        &self,
        _symbol: &str,
        _interval: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        Ok(Vec::new())
    }

    async fn account_balance(&self, asset: &str) -> Result<Decimal> {
        if asset != "USDT" {
            return Ok(Decimal::ZERO);
        }
        Ok(self.book.read().await.balance_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stop(side: OrderSide, kind: StopKind, stop_price: Decimal) -> StopOrder {
        StopOrder {
            symbol: "BTCUSDT".into(),
            side,
            kind,
            stop_price,
            close_position: true,
        }
    }

    #[tokio::test]
    async fn paper_buy_fill_applies_positive_slippage() {
        let client = PaperClient::new(dec!(10000), dec!(10));
        client.update_price("BTCUSDT", dec!(1000)).await;

        let fill = client
            .place_market_order("BTCUSDT", OrderSide::Buy, dec!(0.01))
            .await
            .unwrap();

        assert_eq!(fill.fill_price, dec!(1001));
    }

    #[tokio::test]
    async fn paper_sell_fill_applies_negative_slippage() {
        let client = PaperClient::new(dec!(10000), dec!(10));
        client.update_price("BTCUSDT", dec!(1000)).await;

        let fill = client
            .place_market_order("BTCUSDT", OrderSide::Sell, dec!(0.01))
            .await
            .unwrap();

        assert_eq!(fill.fill_price, dec!(999));
    }

    #[tokio::test]
    async fn market_order_without_price_fails() {
        let client = PaperClient::new(dec!(10000), dec!(0));
        let err = client
            .place_market_order("ETHUSDT", OrderSide::Buy, dec!(1))
            .await
            .unwrap_err();
        assert!(err.is_exchange());
    }

    #[tokio::test]
    async fn round_trip_realises_pnl() {
        let client = PaperClient::new(dec!(10000), dec!(0));
        client.update_price("ETHUSDT", dec!(500)).await;
        client.place_market_order("ETHUSDT", OrderSide::Buy, dec!(2)).await.unwrap();
        assert_eq!(client.position("ETHUSDT").await.quantity, dec!(2));

        client.update_price("ETHUSDT", dec!(510)).await;
        client.place_market_order("ETHUSDT", OrderSide::Sell, dec!(2)).await.unwrap();

        assert_eq!(client.position("ETHUSDT").await, PaperPosition::default());
        assert_eq!(client.account_balance("USDT").await.unwrap(), dec!(10020));
    }

    #[tokio::test]
    async fn positions_mark_to_latest_price() {
        let client = PaperClient::new(dec!(10000), dec!(0));
        assert!(client.positions("BTCUSDT").await.unwrap().is_empty());

        client.update_price("BTCUSDT", dec!(200)).await;
        client.place_market_order("BTCUSDT", OrderSide::Sell, dec!(0.5)).await.unwrap();
        client.update_price("BTCUSDT", dec!(190)).await;

        let positions = client.positions("BTCUSDT").await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].direction(), "SHORT");
        assert_eq!(positions[0].entry_price, dec!(200));
        assert_eq!(positions[0].unrealized_pnl, dec!(5));

        client.place_market_order("BTCUSDT", OrderSide::Buy, dec!(0.5)).await.unwrap();
        assert!(client.positions("BTCUSDT").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_loss_closes_long_when_crossed() {
        let client = PaperClient::new(dec!(10000), dec!(0));
        client.update_price("BTCUSDT", dec!(100)).await;
        client.place_market_order("BTCUSDT", OrderSide::Buy, dec!(1)).await.unwrap();
        client
            .place_stop_order(&stop(OrderSide::Sell, StopKind::TakeProfitMarket, dec!(100.5)))
            .await
            .unwrap();
        client
            .place_stop_order(&stop(OrderSide::Sell, StopKind::StopMarket, dec!(99.7)))
            .await
            .unwrap();

        assert!(client.update_price("BTCUSDT", dec!(99.9)).await.is_empty());
        let fills = client.update_price("BTCUSDT", dec!(99.6)).await;

        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, OrderSide::Sell);
        assert!(client.position("BTCUSDT").await.quantity.is_zero());
        // The sibling take-profit expired with the position.
        assert!(client.open_orders("BTCUSDT").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn take_profit_closes_short() {
        let client = PaperClient::new(dec!(10000), dec!(0));
        client.update_price("BTCUSDT", dec!(100)).await;
        client.place_market_order("BTCUSDT", OrderSide::Sell, dec!(1)).await.unwrap();
        client
            .place_stop_order(&stop(OrderSide::Buy, StopKind::TakeProfitMarket, dec!(99.5)))
            .await
            .unwrap();

        let fills = client.update_price("BTCUSDT", dec!(99.4)).await;

        assert_eq!(fills.len(), 1);
        assert!(client.position("BTCUSDT").await.quantity.is_zero());
        assert_eq!(client.account_balance("USDT").await.unwrap(), dec!(10000.6));
    }

    #[tokio::test]
    async fn stop_that_would_trigger_immediately_is_rejected() {
        let client = PaperClient::new(dec!(10000), dec!(0));
        client.update_price("BTCUSDT", dec!(100)).await;
        let err = client
            .place_stop_order(&stop(OrderSide::Sell, StopKind::StopMarket, dec!(101)))
            .await
            .unwrap_err();
        assert!(err.is_exchange());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let client = PaperClient::new(dec!(10000), dec!(0));
        let ack = client
            .place_stop_order(&stop(OrderSide::Sell, StopKind::StopMarket, dec!(90)))
            .await
            .unwrap();
        let listed = client.open_orders("BTCUSDT").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_protective());

        client.cancel_order("BTCUSDT", ack.order_id).await.unwrap();
        client.cancel_order("BTCUSDT", ack.order_id).await.unwrap();
        assert!(client.open_orders("BTCUSDT").await.unwrap().is_empty());
    }
}
