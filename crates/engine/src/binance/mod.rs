mod rest;
mod stream;

pub use rest::BinanceClient;
pub use stream::{CandleStream, StreamConfig, StreamHandler};

/// USDⓈ-M futures REST endpoints.
pub const FUTURES_REST_BASE: &str = "https://fapi.binance.com";
pub const TESTNET_REST_BASE: &str = "https://testnet.binancefuture.com";

/// USDⓈ-M futures market-data websocket endpoints.
pub const FUTURES_WS_BASE: &str = "wss://fstream.binance.com";
pub const TESTNET_WS_BASE: &str = "wss://stream.binancefuture.com";

/// Pick the websocket base matching the REST environment.
pub fn ws_base(testnet: bool) -> &'static str {
    if testnet {
        TESTNET_WS_BASE
    } else {
        FUTURES_WS_BASE
    }
}
