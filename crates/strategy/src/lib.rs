pub mod config;
pub mod indicators;
pub mod registry;
pub mod strategies;

pub use config::{StrategyConfig, StrategyFileConfig};
pub use registry::{build_strategy, load_strategy};
pub use strategies::{GridStrategy, MacdStrategy, RsiMacdStrategy, RsiStrategy};

use common::{Candle, Signal};
use rust_decimal::prelude::ToPrimitive;

/// Fewest candles any strategy needs before it may signal (the slow MACD EMA).
pub const MIN_CANDLES: usize = 26;

/// All strategy implementations must satisfy this trait.
pub trait Strategy: Send + Sync {
    /// Human-readable name of this strategy instance.
    fn name(&self) -> &str;

    /// Evaluate the full candle history (oldest first).
    ///
    /// Must be deterministic and return `None` when fewer than
    /// [`MIN_CANDLES`] candles are available.
    fn evaluate(&self, candles: &[Candle]) -> Option<Signal>;
}

/// Close prices as `f64`, oldest first.
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .filter_map(|c| c.close.to_f64())
        .collect()
}
