use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, warn};

use common::{
    timestamp_from_ms, Candle, Error, ExchangeClient, ExchangePosition, Fill, OpenOrder, OrderAck,
    OrderSide, Result, StopOrder,
};

use super::{FUTURES_REST_BASE, TESTNET_REST_BASE};

/// Binance error code for cancelling an order that no longer exists.
const UNKNOWN_ORDER: i64 = -2011;
/// Maximum rows the kline endpoint returns per request.
const KLINE_PAGE_LIMIT: usize = 1500;
const RECV_WINDOW_MS: u64 = 5000;
/// Upper bound on a single HTTP request, including paged kline fetches.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Signed REST client for Binance USDⓈ-M futures.
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    http: Client,
}

impl BinanceClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, testnet: bool) -> Result<Self> {
        let base_url = if testnet {
            TESTNET_REST_BASE
        } else {
            FUTURES_REST_BASE
        };
        Self::with_base_url(api_key, secret, base_url)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: base_url.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn sign(&self, query: &str) -> Result<String> {
        sign_query(&self.secret, query)
    }

    /// Send a signed request. Parameters go in the query string for GET and
    /// DELETE, and in a form body for POST.
    async fn send_signed(
        &self,
        method: Method,
        path: &str,
        params: &str,
    ) -> Result<(StatusCode, String)> {
        let ts = Utc::now().timestamp_millis();
        let query = if params.is_empty() {
            format!("recvWindow={RECV_WINDOW_MS}&timestamp={ts}")
        } else {
            format!("{params}&recvWindow={RECV_WINDOW_MS}&timestamp={ts}")
        };
        let signed = format!("{query}&signature={}", self.sign(&query)?);

        let request = if method == Method::POST {
            self.http
                .post(format!("{}{path}", self.base_url))
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(signed)
        } else {
            self.http
                .request(method, format!("{}{path}?{signed}", self.base_url))
        };

        let resp = request
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok((status, body))
    }

    async fn signed(&self, method: Method, path: &str, params: &str) -> Result<String> {
        let (status, body) = self.send_signed(method, path, params).await?;
        check_status(status, body)
    }

    async fn public_get(&self, path: &str, params: &str) -> Result<String> {
        let resp = self
            .http
            .get(format!("{}{path}?{params}", self.base_url))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        check_status(status, body)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<Fill> {
        let client_id = uuid::Uuid::new_v4().simple().to_string();
        let params = format!(
            "symbol={symbol}&side={side}&type=MARKET&quantity={quantity}&newOrderRespType=RESULT&newClientOrderId={client_id}"
        );

        debug!(%symbol, %side, %quantity, "Submitting market order");
        let body = self.signed(Method::POST, "/fapi/v1/order", &params).await?;
        let resp: OrderResponse = serde_json::from_str(&body)?;

        let executed = if resp.executed_qty > Decimal::ZERO {
            resp.executed_qty
        } else {
            quantity
        };
        Ok(Fill {
            order_id: resp.order_id,
            side,
            fill_price: resp.avg_price,
            quantity: executed,
            timestamp: Utc::now(),
        })
    }

    async fn place_stop_order(&self, order: &StopOrder) -> Result<OrderAck> {
        let params = format!(
            "symbol={}&side={}&type={}&stopPrice={}&closePosition={}&workingType=MARK_PRICE",
            order.symbol, order.side, order.kind, order.stop_price, order.close_position
        );

        debug!(symbol = %order.symbol, kind = %order.kind, stop_price = %order.stop_price, "Submitting stop order");
        let body = self.signed(Method::POST, "/fapi/v1/order", &params).await?;
        let resp: OrderResponse = serde_json::from_str(&body)?;
        Ok(OrderAck {
            order_id: resp.order_id,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<()> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        let (status, body) = self
            .send_signed(Method::DELETE, "/fapi/v1/order", &params)
            .await?;

        if !status.is_success() && api_error_code(&body) == Some(UNKNOWN_ORDER) {
            debug!(%symbol, order_id, "Order already gone");
            return Ok(());
        }
        check_status(status, body).map(|_| ())
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        let body = self
            .signed(Method::GET, "/fapi/v1/openOrders", &format!("symbol={symbol}"))
            .await?;
        let rows: Vec<OpenOrderRow> = serde_json::from_str(&body)?;
        Ok(rows.into_iter().map(OpenOrder::from).collect())
    }

    async fn positions(&self, symbol: &str) -> Result<Vec<ExchangePosition>> {
        let body = self
            .signed(Method::GET, "/fapi/v2/positionRisk", &format!("symbol={symbol}"))
            .await?;
        let rows: Vec<PositionRow> = serde_json::from_str(&body)?;
        Ok(open_positions(rows))
    }

    async fn historical_candles(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let end_ms = end.timestamp_millis();
        let now_ms = Utc::now().timestamp_millis();
        let mut start_ms = start.timestamp_millis();
        let mut candles = Vec::new();

        while start_ms < end_ms {
            let params = format!(
                "symbol={symbol}&interval={interval}&startTime={start_ms}&endTime={end_ms}&limit={KLINE_PAGE_LIMIT}"
            );
            let body = self.public_get("/fapi/v1/klines", &params).await?;
            let rows: Vec<Vec<Value>> = serde_json::from_str(&body)?;
            let page_len = rows.len();

            let page = parse_klines(&rows, now_ms)?;
            let Some(last_open) = rows
                .last()
                .and_then(|row| row.first())
                .and_then(Value::as_i64)
            else {
                break;
            };
            candles.extend(page);

            if page_len < KLINE_PAGE_LIMIT {
                break;
            }
            start_ms = last_open + 1;
        }

        debug!(%symbol, %interval, count = candles.len(), "Fetched historical candles");
        Ok(candles)
    }

    async fn account_balance(&self, asset: &str) -> Result<Decimal> {
        let body = self.signed(Method::GET, "/fapi/v2/balance", "").await?;
        let balances: Vec<BalanceRow> = serde_json::from_str(&body)?;
        match balances.into_iter().find(|b| b.asset == asset) {
            Some(b) => Ok(b.available_balance),
            None => {
                warn!(%asset, "Asset missing from futures balance");
                Ok(Decimal::ZERO)
            }
        }
    }
}

/// HMAC-SHA256 of `query` with `secret`, hex encoded.
fn sign_query(secret: &str, query: &str) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("invalid API secret: {e}")))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn check_status(status: StatusCode, body: String) -> Result<String> {
    if status.is_success() {
        return Ok(body);
    }
    match serde_json::from_str::<ApiError>(&body) {
        Ok(err) => Err(Error::Exchange(format!(
            "HTTP {status}: code {} {}",
            err.code, err.msg
        ))),
        Err(_) => Err(Error::Exchange(format!("HTTP {status}: {body}"))),
    }
}

fn api_error_code(body: &str) -> Option<i64> {
    serde_json::from_str::<ApiError>(body).ok().map(|e| e.code)
}

/// Decode kline rows, dropping any candle whose close time has not passed.
fn parse_klines(rows: &[Vec<Value>], now_ms: i64) -> Result<Vec<Candle>> {
    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let close_time = field_i64(row, 6)?;
        if close_time >= now_ms {
            continue;
        }
        candles.push(Candle {
            open_time: timestamp_from_ms(field_i64(row, 0)?),
            open: field_decimal(row, 1)?,
            high: field_decimal(row, 2)?,
            low: field_decimal(row, 3)?,
            close: field_decimal(row, 4)?,
            volume: field_decimal(row, 5)?,
        });
    }
    Ok(candles)
}

fn field_i64(row: &[Value], idx: usize) -> Result<i64> {
    row.get(idx)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Exchange(format!("kline field {idx} missing or not an integer")))
}

fn field_decimal(row: &[Value], idx: usize) -> Result<Decimal> {
    let raw = row
        .get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Exchange(format!("kline field {idx} missing or not a string")))?;
    Decimal::from_str(raw).map_err(|e| Error::Exchange(format!("kline field {idx}: {e}")))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    #[serde(default)]
    avg_price: Decimal,
    #[serde(default)]
    executed_qty: Decimal,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderRow {
    order_id: u64,
    side: OrderSide,
    #[serde(rename = "type")]
    order_type: String,
    status: String,
    #[serde(default)]
    price: Decimal,
    #[serde(default)]
    stop_price: Decimal,
}

impl From<OpenOrderRow> for OpenOrder {
    fn from(row: OpenOrderRow) -> Self {
        OpenOrder {
            order_id: row.order_id,
            side: row.side,
            order_type: row.order_type,
            status: row.status,
            price: row.price,
            stop_price: row.stop_price,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRow {
    symbol: String,
    position_amt: Decimal,
    entry_price: Decimal,
    #[serde(rename = "unRealizedProfit", default)]
    unrealized_profit: Decimal,
}

/// Rows with a zero amount are placeholders for an unused position side.
fn open_positions(rows: Vec<PositionRow>) -> Vec<ExchangePosition> {
    rows.into_iter()
        .filter(|row| !row.position_amt.is_zero())
        .map(|row| ExchangePosition {
            symbol: row.symbol,
            quantity: row.position_amt,
            entry_price: row.entry_price,
            unrealized_pnl: row.unrealized_profit,
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceRow {
    asset: String,
    available_balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn signature_matches_binance_reference() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_query(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn in_progress_kline_is_dropped() {
        let rows: Vec<Vec<Value>> = serde_json::from_value(json!([
            [1_000, "100.0", "101.0", "99.0", "100.5", "10.0", 60_999, "0", 1, "0", "0", "0"],
            [61_000, "100.5", "102.0", "100.0", "101.5", "12.0", 120_999, "0", 1, "0", "0", "0"]
        ]))
        .unwrap();

        let candles = parse_klines(&rows, 100_000).unwrap();

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, dec!(100.5));
        assert_eq!(candles[0].open_time.timestamp_millis(), 1_000);
    }

    #[test]
    fn malformed_kline_row_is_an_error() {
        let rows: Vec<Vec<Value>> =
            serde_json::from_value(json!([[1_000, 100.0, "x", "y", "z", "w", 60_999]])).unwrap();
        assert!(parse_klines(&rows, 100_000).is_err());
    }

    #[test]
    fn api_errors_keep_the_exchange_code() {
        let body = r#"{"code":-2011,"msg":"Unknown order sent."}"#;
        assert_eq!(api_error_code(body), Some(UNKNOWN_ORDER));

        let err = check_status(StatusCode::BAD_REQUEST, body.to_string()).unwrap_err();
        assert!(err.is_exchange());
        assert!(err.to_string().contains("-2011"));
    }

    #[test]
    fn order_response_decodes_string_prices() {
        let resp: OrderResponse = serde_json::from_str(
            r#"{"orderId":42,"avgPrice":"64012.30","executedQty":"0.002","status":"FILLED"}"#,
        )
        .unwrap();
        assert_eq!(resp.order_id, 42);
        assert_eq!(resp.avg_price, dec!(64012.30));
        assert_eq!(resp.executed_qty, dec!(0.002));
    }

    #[test]
    fn position_risk_rows_skip_empty_sides() {
        let rows: Vec<PositionRow> = serde_json::from_str(
            r#"[
                {"symbol":"BTCUSDT","positionAmt":"-0.002","entryPrice":"64000.0","unRealizedProfit":"-1.25","positionSide":"BOTH"},
                {"symbol":"BTCUSDT","positionAmt":"0.000","entryPrice":"0.0","unRealizedProfit":"0.0","positionSide":"LONG"}
            ]"#,
        )
        .unwrap();

        let positions = open_positions(rows);

        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(-0.002));
        assert_eq!(positions[0].direction(), "SHORT");
        assert_eq!(positions[0].unrealized_pnl, dec!(-1.25));
    }

    #[test]
    fn open_order_rows_map_to_protective_orders() {
        let rows: Vec<OpenOrderRow> = serde_json::from_str(
            r#"[{"orderId":7,"side":"SELL","type":"TAKE_PROFIT_MARKET","status":"NEW","price":"0","stopPrice":"65000.00"}]"#,
        )
        .unwrap();
        let orders: Vec<OpenOrder> = rows.into_iter().map(OpenOrder::from).collect();
        assert!(orders[0].is_protective());
        assert_eq!(orders[0].stop_price, dec!(65000));
    }
}
