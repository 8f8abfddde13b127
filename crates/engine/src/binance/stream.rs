use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use common::{Error, Result};

/// Receives every decoded frame from the stream, one at a time.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn on_message(&self, message: Value);
}

/// Where and what to subscribe to.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub symbol: String,
    pub interval: String,
    /// e.g. `wss://fstream.binance.com`; `/ws` is appended.
    pub ws_base: String,
    pub reconnect_delay: Duration,
    /// Upper bound on the TCP connect, websocket upgrade and SUBSCRIBE send.
    pub connect_timeout: Duration,
}

impl StreamConfig {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            ws_base: super::FUTURES_WS_BASE.to_string(),
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_ws_base(mut self, ws_base: impl Into<String>) -> Self {
        self.ws_base = ws_base.into();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Subscription key, e.g. `btcusdt@kline_3m`.
    pub fn stream_key(&self) -> String {
        format!("{}@kline_{}", self.symbol.to_lowercase(), self.interval)
    }
}

enum Session {
    /// Server closed or the connection ended.
    Closed,
    /// `stop()` was called.
    Stopped,
}

/// Kline websocket subscription for a single symbol.
///
/// Holds the subscription until `stop()`: any drop, error or clean close is
/// followed by a fixed delay, a reconnect and a resubscribe with the same key.
/// Nothing is replayed for candles that closed while disconnected.
pub struct CandleStream {
    config: StreamConfig,
    connected: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl CandleStream {
    pub fn new(config: StreamConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            connected: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn stream_key(&self) -> String {
        self.config.stream_key()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Close the connection and end `run`. Safe to call more than once, or
    /// before `run` starts.
    pub fn stop(&self) {
        if !self.shutdown.send_replace(true) {
            info!(key = %self.stream_key(), "Stream stop requested");
        }
    }

    /// Connect and deliver messages to `handler` until `stop()`.
    ///
    /// The handler is awaited before the next frame is read.
    pub async fn run(&self, handler: Arc<dyn StreamHandler>) {
        let mut shutdown = self.shutdown.subscribe();
        let key = self.stream_key();

        loop {
            if *shutdown.borrow() {
                break;
            }

            info!(key = %key, ws_base = %self.config.ws_base, "Connecting to kline stream");
            let session = self.connect_once(handler.as_ref(), &mut shutdown).await;
            self.connected.store(false, Ordering::SeqCst);

            match session {
                Ok(Session::Stopped) => break,
                Ok(Session::Closed) => {
                    info!(key = %key, "Kline stream closed, reconnecting");
                }
                Err(e) => {
                    warn!(
                        key = %key,
                        error = %e,
                        delay = ?self.config.reconnect_delay,
                        "Kline stream error, reconnecting"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        info!(key = %key, "Kline stream stopped");
    }

    async fn connect_once(
        &self,
        handler: &dyn StreamHandler,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Session> {
        let url = Url::parse(&format!(
            "{}/ws",
            self.config.ws_base.trim_end_matches('/')
        ))
        .map_err(|e| Error::WebSocket(e.to_string()))?;

        let limit = self.config.connect_timeout;
        let connect = tokio::time::timeout(limit, connect_async(url.as_str()));
        let (ws_stream, _) = tokio::select! {
            _ = shutdown.changed() => return Ok(Session::Stopped),
            connected = connect => connected
                .map_err(|_| Error::Timeout(limit))?
                .map_err(|e| Error::WebSocket(e.to_string()))?,
        };
        let (mut write, mut read) = ws_stream.split();

        let key = self.stream_key();
        let subscribe = json!({ "method": "SUBSCRIBE", "params": [key], "id": 1 });
        let send = tokio::time::timeout(limit, write.send(Message::Text(subscribe.to_string())));
        tokio::select! {
            _ = shutdown.changed() => return Ok(Session::Stopped),
            sent = send => sent
                .map_err(|_| Error::Timeout(limit))?
                .map_err(|e| Error::WebSocket(e.to_string()))?,
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(key = %key, "Subscribed");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "Close frame not sent");
                    }
                    return Ok(Session::Stopped);
                }
                frame = read.next() => {
                    let Some(frame) = frame else {
                        return Ok(Session::Closed);
                    };
                    match frame.map_err(|e| Error::WebSocket(e.to_string()))? {
                        Message::Text(text) => match serde_json::from_str::<Value>(&text) {
                            Ok(value) => handler.on_message(value).await,
                            Err(e) => warn!(error = %e, "Dropping undecodable frame"),
                        },
                        Message::Close(frame) => {
                            debug!(?frame, "Server sent close frame");
                            return Ok(Session::Closed);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_is_lowercase_symbol_and_interval() {
        let config = StreamConfig::new("BTCUSDT", "3m");
        assert_eq!(config.stream_key(), "btcusdt@kline_3m");
    }

    #[tokio::test]
    async fn stop_before_run_returns_immediately() {
        struct Noop;
        #[async_trait]
        impl StreamHandler for Noop {
            async fn on_message(&self, _message: Value) {}
        }

        let stream = CandleStream::new(
            StreamConfig::new("BTCUSDT", "1m").with_ws_base("ws://127.0.0.1:9"),
        );
        stream.stop();
        stream.stop();
        stream.run(Arc::new(Noop)).await;
        assert!(!stream.is_connected());
    }
}
