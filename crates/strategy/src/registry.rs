use std::collections::HashMap;

use common::{Error, Result};
use tracing::info;

use crate::config::{StrategyConfig, StrategyFileConfig};
use crate::indicators::rsi::Smoothing;
use crate::indicators::{MacdIndicator, RsiIndicator};
use crate::strategies::{GridStrategy, MacdStrategy, RsiMacdStrategy, RsiStrategy};
use crate::Strategy;

/// Build the configured strategy, or the RSI+MACD default when no file is given.
pub fn load_strategy(path: Option<&str>) -> Result<Box<dyn Strategy>> {
    let cfg = match path {
        Some(path) => StrategyFileConfig::load(path)?.strategy,
        None => StrategyConfig::default(),
    };
    let strategy = build_strategy(&cfg)?;
    info!(name = %strategy.name(), kind = %cfg.strategy_type, "Strategy loaded");
    Ok(strategy)
}

pub fn build_strategy(cfg: &StrategyConfig) -> Result<Box<dyn Strategy>> {
    match cfg.strategy_type.as_str() {
        "rsi" => Ok(Box::new(RsiStrategy::new(&cfg.name, rsi_indicator(&cfg.params)?))),
        "macd" => Ok(Box::new(MacdStrategy::new(&cfg.name, macd_indicator(&cfg.params)?))),
        "rsi_macd" => Ok(Box::new(RsiMacdStrategy::new(
            &cfg.name,
            rsi_indicator(&cfg.params)?,
            macd_indicator(&cfg.params)?,
        ))),
        "grid" => Ok(Box::new(GridStrategy::new(
            &cfg.name,
            param_usize(&cfg.params, "grid_size", 50),
            param_usize(&cfg.params, "levels", 5),
            param_f64(&cfg.params, "step_pct", 0.001),
            param_f64(&cfg.params, "tolerance", 1.0),
        )?)),
        other => Err(Error::Config(format!("unknown strategy type '{other}'"))),
    }
}

fn rsi_indicator(params: &HashMap<String, toml::Value>) -> Result<RsiIndicator> {
    let smoothing = match params.get("smoothing").and_then(|v| v.as_str()) {
        None | Some("simple") => Smoothing::Simple,
        Some("wilder") => Smoothing::Wilder,
        Some(other) => {
            return Err(Error::Config(format!("unknown RSI smoothing '{other}'")));
        }
    };
    RsiIndicator::new(
        param_usize(params, "rsi_period", 14),
        param_f64(params, "overbought", 70.0),
        param_f64(params, "oversold", 30.0),
        smoothing,
    )
}

fn macd_indicator(params: &HashMap<String, toml::Value>) -> Result<MacdIndicator> {
    MacdIndicator::new(
        param_usize(params, "fast", 12),
        param_usize(params, "slow", 26),
        param_usize(params, "signal", 9),
    )
}

fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> f64 {
    match params.get(key) {
        Some(toml::Value::Float(v)) => *v,
        Some(toml::Value::Integer(v)) => *v as f64,
        _ => default,
    }
}

fn param_usize(params: &HashMap<String, toml::Value>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_integer())
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_rsi_macd() {
        let strategy = load_strategy(None).unwrap();
        assert_eq!(strategy.name(), "RSI+MACD");
    }

    #[test]
    fn builds_each_type_from_toml() {
        for kind in ["rsi", "macd", "rsi_macd", "grid"] {
            let file = StrategyFileConfig::parse(&format!(
                "[strategy]\ntype = \"{kind}\"\nname = \"{kind} test\"\n\n[strategy.params]\noversold = 25\nsmoothing = \"wilder\"\n"
            ))
            .unwrap();
            let strategy = build_strategy(&file.strategy).unwrap();
            assert_eq!(strategy.name(), format!("{kind} test"));
        }
    }

    #[test]
    fn integer_thresholds_are_accepted() {
        let mut params = HashMap::new();
        params.insert("oversold".to_string(), toml::Value::Integer(25));
        let rsi = rsi_indicator(&params).unwrap();
        assert_eq!(rsi.oversold, 25.0);
    }

    #[test]
    fn rejects_unknown_type_and_bad_params() {
        let cfg = StrategyConfig {
            strategy_type: "fibonacci".into(),
            ..StrategyConfig::default()
        };
        assert!(matches!(build_strategy(&cfg), Err(Error::Config(_))));

        let mut cfg = StrategyConfig::default();
        cfg.params.insert("fast".into(), toml::Value::Integer(30));
        assert!(build_strategy(&cfg).is_err());

        let mut cfg = StrategyConfig {
            strategy_type: "grid".into(),
            ..StrategyConfig::default()
        };
        cfg.params.insert("grid_size".into(), toml::Value::Integer(10));
        assert!(matches!(build_strategy(&cfg), Err(Error::Config(_))));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        assert!(matches!(
            load_strategy(Some("/nonexistent/strategy.toml")),
            Err(Error::Config(_))
        ));
    }
}
