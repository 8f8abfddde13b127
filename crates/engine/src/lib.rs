pub mod binance;
pub mod ledger;
pub mod lifecycle;

pub use binance::{BinanceClient, CandleStream, StreamConfig, StreamHandler};
pub use ledger::{CandleLedger, IngestOutcome};
pub use lifecycle::Trader;
