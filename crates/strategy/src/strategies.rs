use common::{Candle, Error, Result, Signal};
use tracing::debug;

use crate::indicators::{MacdIndicator, MacdSignal, RsiIndicator};
use crate::{closes, Strategy, MIN_CANDLES};

/// RSI threshold strategy: Buy while oversold, Sell while overbought.
pub struct RsiStrategy {
    name: String,
    indicator: RsiIndicator,
}

impl RsiStrategy {
    pub fn new(name: impl Into<String>, indicator: RsiIndicator) -> Self {
        Self {
            name: name.into(),
            indicator,
        }
    }
}

impl Strategy for RsiStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, candles: &[Candle]) -> Option<Signal> {
        if candles.len() < MIN_CANDLES {
            return None;
        }
        let rsi = self.indicator.compute(&closes(candles))?;
        if self.indicator.is_oversold(rsi) {
            Some(Signal::Buy)
        } else if self.indicator.is_overbought(rsi) {
            Some(Signal::Sell)
        } else {
            None
        }
    }
}

/// MACD crossover strategy.
pub struct MacdStrategy {
    name: String,
    indicator: MacdIndicator,
}

impl MacdStrategy {
    pub fn new(name: impl Into<String>, indicator: MacdIndicator) -> Self {
        Self {
            name: name.into(),
            indicator,
        }
    }
}

impl Strategy for MacdStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, candles: &[Candle]) -> Option<Signal> {
        if candles.len() < MIN_CANDLES {
            return None;
        }
        match self.indicator.compute(&closes(candles))? {
            MacdSignal::Bullish => Some(Signal::Buy),
            MacdSignal::Bearish => Some(Signal::Sell),
            MacdSignal::Neutral => None,
        }
    }
}

/// Requires both indicators to agree on the latest bar: Buy when RSI is
/// oversold and MACD crosses above its signal line, Sell when RSI is
/// overbought and MACD crosses below.
pub struct RsiMacdStrategy {
    name: String,
    rsi: RsiIndicator,
    macd: MacdIndicator,
}

impl RsiMacdStrategy {
    pub fn new(name: impl Into<String>, rsi: RsiIndicator, macd: MacdIndicator) -> Self {
        Self {
            name: name.into(),
            rsi,
            macd,
        }
    }
}

impl Strategy for RsiMacdStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, candles: &[Candle]) -> Option<Signal> {
        if candles.len() < MIN_CANDLES {
            return None;
        }
        let closes = closes(candles);
        let rsi = self.rsi.compute(&closes)?;
        let cross = self.macd.compute(&closes)?;
        debug!(strategy = %self.name, rsi, ?cross, "Indicators");

        match cross {
            MacdSignal::Bullish if self.rsi.is_oversold(rsi) => Some(Signal::Buy),
            MacdSignal::Bearish if self.rsi.is_overbought(rsi) => Some(Signal::Sell),
            _ => None,
        }
    }
}

/// Price grid around a moving average: `levels` steps of `step_pct` on each
/// side of the SMA over the last `window` closes. When the latest close is
/// within `tolerance` of a level, it buys below that level and sells at or
/// above it.
pub struct GridStrategy {
    name: String,
    window: usize,
    levels: usize,
    step_pct: f64,
    tolerance: f64,
}

impl GridStrategy {
    pub fn new(
        name: impl Into<String>,
        window: usize,
        levels: usize,
        step_pct: f64,
        tolerance: f64,
    ) -> Result<Self> {
        if window < MIN_CANDLES || levels == 0 || step_pct <= 0.0 || tolerance <= 0.0 {
            return Err(Error::Config(format!(
                "grid needs window >= {MIN_CANDLES}, levels > 0, positive step and tolerance, got {window}/{levels}/{step_pct}/{tolerance}"
            )));
        }
        Ok(Self {
            name: name.into(),
            window,
            levels,
            step_pct,
            tolerance,
        })
    }

    /// Grid prices around the SMA of the last `window` closes, ascending and
    /// rounded to cents. `None` until `window` closes exist.
    pub fn grid(&self, closes: &[f64]) -> Option<Vec<f64>> {
        if closes.len() < self.window {
            return None;
        }
        let recent = &closes[closes.len() - self.window..];
        let avg = recent.iter().sum::<f64>() / self.window as f64;
        let step = avg * self.step_pct;

        let mut grid: Vec<f64> = (1..=self.levels)
            .flat_map(|i| [avg - step * i as f64, avg + step * i as f64])
            .map(|level| (level * 100.0).round() / 100.0)
            .collect();
        grid.sort_by(|a, b| a.total_cmp(b));
        Some(grid)
    }
}

impl Strategy for GridStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, candles: &[Candle]) -> Option<Signal> {
        let closes = closes(candles);
        let grid = self.grid(&closes)?;
        let price = *closes.last()?;

        let level = grid
            .into_iter()
            .find(|level| (price - level).abs() < self.tolerance)?;
        debug!(strategy = %self.name, price, level, "Price at grid level");
        if price < level {
            Some(Signal::Buy)
        } else {
            Some(Signal::Sell)
        }
    }
}
