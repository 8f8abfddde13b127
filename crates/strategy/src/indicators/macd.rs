use common::{Error, Result};

/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// MACD line = EMA(fast) − EMA(slow), signal line = EMA(MACD line, signal).
/// EMAs are recursive from the first close (no SMA seed), so values exist for
/// every bar once `slow` closes are available.
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

/// Crossover state on the latest bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdSignal {
    /// MACD crossed above the signal line.
    Bullish,
    /// MACD crossed below the signal line.
    Bearish,
    Neutral,
}

impl MacdIndicator {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self> {
        if fast == 0 || signal == 0 || fast >= slow {
            return Err(Error::Config(format!(
                "MACD periods must satisfy 0 < fast < slow and signal > 0, got {fast}/{slow}/{signal}"
            )));
        }
        Ok(Self { fast, slow, signal })
    }

    /// MACD and signal line values for every close.
    pub fn lines(&self, closes: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let fast = ema_series(closes, self.fast);
        let slow = ema_series(closes, self.slow);
        let macd: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
        let signal = ema_series(&macd, self.signal);
        (macd, signal)
    }

    /// Crossover on the latest bar. `None` with fewer than `slow` closes.
    pub fn compute(&self, closes: &[f64]) -> Option<MacdSignal> {
        if closes.len() < self.slow.max(2) {
            return None;
        }
        let (macd, signal) = self.lines(closes);
        let n = macd.len();
        let (prev_macd, curr_macd) = (macd[n - 2], macd[n - 1]);
        let (prev_sig, curr_sig) = (signal[n - 2], signal[n - 1]);

        if prev_macd <= prev_sig && curr_macd > curr_sig {
            Some(MacdSignal::Bullish)
        } else if prev_macd >= prev_sig && curr_macd < curr_sig {
            Some(MacdSignal::Bearish)
        } else {
            Some(MacdSignal::Neutral)
        }
    }
}

/// Exponential moving average for every element, `alpha = 2 / (span + 1)`,
/// starting from the first value.
pub fn ema_series(data: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(data.len());
    let mut prev: Option<f64> = None;
    for &x in data {
        let next = match prev {
            Some(p) => alpha * x + (1.0 - alpha) * p,
            None => x,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}
