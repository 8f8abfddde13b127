use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use common::Config;

/// Position sizing, exit levels and timing for the controller and guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Order size in base asset units for every open and close.
    pub quantity: Decimal,
    /// Take-profit distance from entry (e.g. 0.005 = 0.5%).
    pub take_profit_pct: Decimal,
    /// Stop-loss distance from entry (e.g. 0.003 = 0.3%).
    pub stop_loss_pct: Decimal,
    /// Extra distance past TP/SL before the guard closes on its own, so it
    /// does not race the exchange's protective order at the exact level.
    pub fallback_slack_pct: Decimal,
    /// Idle period after a close during which no new position may open.
    pub cooldown: Duration,
    /// Reconcile protective orders every N accepted candles. 0 disables.
    pub reconcile_every: usize,
    /// Decimal places for TP/SL stop prices.
    pub price_precision: u32,
    /// Upper bound on every exchange call.
    pub exchange_timeout: Duration,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            quantity: Decimal::new(2, 3),
            take_profit_pct: Decimal::new(5, 3),
            stop_loss_pct: Decimal::new(3, 3),
            fallback_slack_pct: Decimal::new(1, 3),
            cooldown: Duration::from_secs(60),
            reconcile_every: 5,
            price_precision: 2,
            exchange_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&Config> for RiskConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            quantity: cfg.trade_quantity,
            take_profit_pct: cfg.take_profit_pct,
            stop_loss_pct: cfg.stop_loss_pct,
            fallback_slack_pct: cfg.fallback_slack_pct,
            cooldown: cfg.cooldown,
            reconcile_every: cfg.reconcile_every,
            price_precision: cfg.price_precision,
            exchange_timeout: cfg.exchange_timeout,
        }
    }
}
