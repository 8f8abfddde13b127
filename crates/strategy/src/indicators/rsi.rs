use common::{Error, Result};
use serde::{Deserialize, Serialize};

/// How average gain and loss are formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Smoothing {
    /// Plain mean of the last `period` changes.
    #[default]
    Simple,
    /// Wilder's smoothed moving average (TradingView style).
    Wilder,
}

/// RSI (Relative Strength Index) indicator.
///
/// Returns `None` until at least `period + 1` closes are available, and when
/// the window has no movement at all.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
    pub overbought: f64,
    pub oversold: f64,
    pub smoothing: Smoothing,
}

impl RsiIndicator {
    pub fn new(period: usize, overbought: f64, oversold: f64, smoothing: Smoothing) -> Result<Self> {
        if period < 2 {
            return Err(Error::Config(format!("RSI period must be >= 2, got {period}")));
        }
        if !(0.0..=100.0).contains(&oversold) || !(0.0..=100.0).contains(&overbought) || oversold >= overbought {
            return Err(Error::Config(format!(
                "RSI thresholds must satisfy 0 <= oversold < overbought <= 100, got {oversold}/{overbought}"
            )));
        }
        Ok(Self {
            period,
            overbought,
            oversold,
            smoothing,
        })
    }

    /// RSI of the latest close, from closes ordered oldest first.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period + 1 {
            return None;
        }
        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

        let (avg_gain, avg_loss) = match self.smoothing {
            Smoothing::Simple => mean_gain_loss(&changes[changes.len() - self.period..]),
            Smoothing::Wilder => {
                let (mut gain, mut loss) = mean_gain_loss(&changes[..self.period]);
                let n = self.period as f64;
                for &change in &changes[self.period..] {
                    gain = (gain * (n - 1.0) + change.max(0.0)) / n;
                    loss = (loss * (n - 1.0) + (-change).max(0.0)) / n;
                }
                (gain, loss)
            }
        };

        if avg_loss == 0.0 {
            return if avg_gain == 0.0 { None } else { Some(100.0) };
        }
        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }

    pub fn is_oversold(&self, rsi: f64) -> bool {
        rsi < self.oversold
    }

    pub fn is_overbought(&self, rsi: f64) -> bool {
        rsi > self.overbought
    }
}

fn mean_gain_loss(changes: &[f64]) -> (f64, f64) {
    let n = changes.len() as f64;
    let gain = changes.iter().filter(|&&c| c > 0.0).sum::<f64>() / n;
    let loss = changes.iter().filter(|&&c| c < 0.0).map(|c| c.abs()).sum::<f64>() / n;
    (gain, loss)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsi(period: usize, smoothing: Smoothing) -> RsiIndicator {
        RsiIndicator::new(period, 70.0, 30.0, smoothing).unwrap()
    }

    #[test]
    fn rsi_returns_none_when_insufficient_data() {
        let prices = vec![100.0; 14];
        assert!(rsi(14, Smoothing::Simple).compute(&prices).is_none());
    }

    #[test]
    fn rsi_rejects_bad_parameters() {
        assert!(RsiIndicator::new(1, 70.0, 30.0, Smoothing::Simple).is_err());
        assert!(RsiIndicator::new(14, 30.0, 70.0, Smoothing::Simple).is_err());
    }

    #[test]
    fn rsi_all_gains_returns_100() {
        let prices = vec![10.0, 11.0, 12.0, 13.0, 14.0];
        for smoothing in [Smoothing::Simple, Smoothing::Wilder] {
            let value = rsi(3, smoothing).compute(&prices).unwrap();
            assert!((value - 100.0).abs() < 1e-6, "Expected ~100, got {value}");
        }
    }

    #[test]
    fn rsi_all_losses_returns_0() {
        let prices = vec![14.0, 13.0, 12.0, 11.0, 10.0];
        let value = rsi(3, Smoothing::Wilder).compute(&prices).unwrap();
        assert!(value.abs() < 1e-6, "Expected ~0, got {value}");
    }

    #[test]
    fn flat_prices_have_no_rsi() {
        assert_eq!(rsi(3, Smoothing::Simple).compute(&[5.0; 10]), None);
    }

    #[test]
    fn simple_rsi_only_sees_the_last_window() {
        // Early crash is outside the 3-change window.
        let prices = vec![100.0, 50.0, 51.0, 52.0, 51.0];
        let value = rsi(3, Smoothing::Simple).compute(&prices).unwrap();
        // gains 1+1, loss 1 → rs 2 → 66.67
        assert!((value - 200.0 / 3.0).abs() < 1e-9, "got {value}");
    }

    #[test]
    fn rsi_stays_in_range_on_mixed_series() {
        let prices = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.15, 43.61, 44.33, 44.83, 45.10,
            45.15, 44.34, 44.09,
        ];
        let v = rsi(14, Smoothing::Wilder).compute(&prices).unwrap();
        assert!((0.0..=100.0).contains(&v), "RSI out of range: {v}");
    }
}
