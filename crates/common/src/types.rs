use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A closed OHLCV candle. `open_time` is the ledger key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A kline update decoded from the market stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineEvent {
    pub symbol: String,
    pub candle: Candle,
    /// True once the candle's interval has fully elapsed. In-progress updates
    /// must never reach the ledger.
    pub is_closed: bool,
}

/// Classification of a raw stream message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// Reply to a `SUBSCRIBE` request, e.g. `{"result":null,"id":1}`.
    Ack,
    Kline(KlineEvent),
    /// Any other event type.
    Other,
}

impl StreamMessage {
    /// Interpret a decoded JSON frame. Combined-stream envelopes
    /// (`{"stream": ..., "data": {...}}`) are unwrapped first.
    pub fn classify(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let value = match value.get("data") {
            Some(inner) if value.get("stream").is_some() => inner,
            _ => value,
        };

        if value.get("result").is_some() && value.get("id").is_some() {
            return Ok(StreamMessage::Ack);
        }
        if value.get("e").and_then(|v| v.as_str()) != Some("kline") {
            return Ok(StreamMessage::Other);
        }

        let wrapper: KlineWrapper = serde_json::from_value(value.clone())?;
        let k = wrapper.k;
        Ok(StreamMessage::Kline(KlineEvent {
            symbol: k.symbol,
            candle: Candle {
                open_time: timestamp_from_ms(k.open_time_ms),
                open: k.open,
                high: k.high,
                low: k.low,
                close: k.close,
                volume: k.volume,
            },
            is_closed: k.is_closed,
        }))
    }
}

// ─── Binance kline JSON ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct KlineWrapper {
    k: KlineData,
}

#[derive(Deserialize)]
struct KlineData {
    #[serde(rename = "t")]
    open_time_ms: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "x")]
    is_closed: bool,
}

/// Millisecond epoch to UTC, clamping out-of-range values to the epoch.
pub fn timestamp_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Directional output of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Buy,
    Sell,
}

impl Signal {
    pub fn side(self) -> OrderSide {
        match self {
            Signal::Buy => OrderSide::Buy,
            Signal::Sell => OrderSide::Sell,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Buy => write!(f, "buy"),
            Signal::Sell => write!(f, "sell"),
        }
    }
}

/// Attributes of a non-flat position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPosition {
    /// Fill price of the opening market order.
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// The single position held for the traded symbol.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Position {
    #[default]
    Flat,
    Long(OpenPosition),
    Short(OpenPosition),
}

impl Position {
    pub fn is_flat(&self) -> bool {
        matches!(self, Position::Flat)
    }

    pub fn open(&self) -> Option<&OpenPosition> {
        match self {
            Position::Flat => None,
            Position::Long(p) | Position::Short(p) => Some(p),
        }
    }

    /// Side of the order that opened this position.
    pub fn entry_side(&self) -> Option<OrderSide> {
        match self {
            Position::Flat => None,
            Position::Long(_) => Some(OrderSide::Buy),
            Position::Short(_) => Some(OrderSide::Sell),
        }
    }

    /// The signal that would take this position back to flat.
    pub fn closing_signal(&self) -> Option<Signal> {
        match self {
            Position::Flat => None,
            Position::Long(_) => Some(Signal::Sell),
            Position::Short(_) => Some(Signal::Buy),
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Position::Flat => write!(f, "FLAT"),
            Position::Long(_) => write!(f, "LONG"),
            Position::Short(_) => write!(f, "SHORT"),
        }
    }
}

/// Whether take-profit/stop-loss orders are believed live for the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExitState {
    pub protective_orders_active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Kind of a protective (conditional, close-position) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopKind {
    TakeProfitMarket,
    StopMarket,
}

impl StopKind {
    /// Exchange order-type string.
    pub fn as_str(self) -> &'static str {
        match self {
            StopKind::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            StopKind::StopMarket => "STOP_MARKET",
        }
    }

    pub fn from_order_type(order_type: &str) -> Option<Self> {
        match order_type {
            "TAKE_PROFIT_MARKET" => Some(StopKind::TakeProfitMarket),
            "STOP_MARKET" => Some(StopKind::StopMarket),
            _ => None,
        }
    }
}

impl std::fmt::Display for StopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protective order request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: StopKind,
    pub stop_price: Decimal,
    /// Reduce-only: closes whatever position is open when triggered.
    pub close_position: bool,
}

/// Confirmation of a filled market order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: u64,
    pub side: OrderSide,
    /// Average fill price. Zero when the exchange did not report one.
    pub fill_price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement of an accepted (not necessarily filled) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: u64,
}

/// A live order as listed by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: u64,
    pub side: OrderSide,
    pub order_type: String,
    pub status: String,
    pub price: Decimal,
    pub stop_price: Decimal,
}

impl OpenOrder {
    /// A still-working take-profit or stop-loss order.
    pub fn is_protective(&self) -> bool {
        self.status == "NEW" && StopKind::from_order_type(&self.order_type).is_some()
    }
}

/// A non-zero position as reported by the exchange, independent of what the
/// controller believes it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    /// Signed size: positive long, negative short.
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
}

impl ExchangePosition {
    pub fn direction(&self) -> &'static str {
        if self.quantity.is_sign_negative() {
            "SHORT"
        } else {
            "LONG"
        }
    }
}

/// Whether the bot is running against the real exchange or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// Read-only view of the trading core, published after every stream message.
#[derive(Debug, Clone, Default)]
pub struct TraderSnapshot {
    pub symbol: String,
    pub position: Position,
    pub exit_state: ExitState,
    pub cooldown_remaining: Option<Duration>,
    pub candles: usize,
    pub last_close: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn kline(closed: bool) -> serde_json::Value {
        json!({
            "e": "kline",
            "E": 1_700_000_060_000i64,
            "s": "BTCUSDT",
            "k": {
                "t": 1_700_000_000_000i64,
                "T": 1_700_000_059_999i64,
                "s": "BTCUSDT",
                "i": "1m",
                "o": "100.10",
                "h": "101.00",
                "l": "99.90",
                "c": "100.50",
                "v": "12.345",
                "x": closed
            }
        })
    }

    #[test]
    fn classify_parses_closed_kline() {
        let event = match StreamMessage::classify(&kline(true)).unwrap() {
            StreamMessage::Kline(event) => event,
            other => panic!("expected kline, got {other:?}"),
        };
        assert!(event.is_closed);
        assert_eq!(event.symbol, "BTCUSDT");
        assert_eq!(event.candle.close, dec!(100.50));
        assert_eq!(event.candle.volume, dec!(12.345));
        assert_eq!(event.candle.open_time.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn classify_unwraps_combined_stream_envelope() {
        let wrapped = json!({ "stream": "btcusdt@kline_1m", "data": kline(false) });
        let msg = StreamMessage::classify(&wrapped).unwrap();
        assert!(matches!(msg, StreamMessage::Kline(KlineEvent { is_closed: false, .. })));
    }

    #[test]
    fn classify_recognises_subscription_ack() {
        let ack = json!({ "result": null, "id": 1 });
        assert_eq!(StreamMessage::classify(&ack).unwrap(), StreamMessage::Ack);
    }

    #[test]
    fn classify_skips_other_events() {
        let trade = json!({ "e": "aggTrade", "p": "100.0" });
        assert_eq!(StreamMessage::classify(&trade).unwrap(), StreamMessage::Other);
    }

    #[test]
    fn classify_rejects_malformed_kline() {
        let broken = json!({ "e": "kline", "k": { "t": 1, "o": "abc" } });
        assert!(StreamMessage::classify(&broken).is_err());
    }

    #[test]
    fn position_helpers() {
        let open = OpenPosition {
            entry_price: dec!(100),
            quantity: dec!(0.002),
            opened_at: Utc::now(),
        };
        assert_eq!(Position::Long(open.clone()).closing_signal(), Some(Signal::Sell));
        assert_eq!(Position::Short(open).entry_side(), Some(OrderSide::Sell));
        assert_eq!(Position::Flat.closing_signal(), None);
        assert_eq!(Position::default(), Position::Flat);
    }

    #[test]
    fn exchange_position_direction_follows_sign() {
        let mut pos = ExchangePosition {
            symbol: "BTCUSDT".into(),
            quantity: dec!(0.002),
            entry_price: dec!(100),
            unrealized_pnl: dec!(0),
        };
        assert_eq!(pos.direction(), "LONG");
        pos.quantity = dec!(-0.002);
        assert_eq!(pos.direction(), "SHORT");
    }

    #[test]
    fn only_new_stop_orders_are_protective() {
        let mut order = OpenOrder {
            order_id: 1,
            side: OrderSide::Sell,
            order_type: "STOP_MARKET".into(),
            status: "NEW".into(),
            price: dec!(0),
            stop_price: dec!(99),
        };
        assert!(order.is_protective());
        order.status = "FILLED".into();
        assert!(!order.is_protective());
        order.status = "NEW".into();
        order.order_type = "LIMIT".into();
        assert!(!order.is_protective());
    }
}
