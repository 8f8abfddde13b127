use std::collections::HashMap;

use common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Strategy config file (TOML).
///
/// Example `config/strategy.toml`:
/// ```toml
/// [strategy]
/// type = "rsi_macd"
/// name = "BTC RSI+MACD"
///
/// [strategy.params]
/// rsi_period = 14
/// overbought = 70.0
/// oversold = 30.0
/// fast = 12
/// slow = 26
/// signal = 9
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Strategy type identifier: "rsi", "macd", "rsi_macd" or "grid".
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Human-readable name shown in logs.
    pub name: String,
    /// Indicator-specific parameters. Missing keys take the defaults.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            strategy_type: "rsi_macd".into(),
            name: "RSI+MACD".into(),
            params: HashMap::new(),
        }
    }
}

impl StrategyFileConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read strategy config at '{path}': {e}")))?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("strategy config at '{path}': {e}")))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}
