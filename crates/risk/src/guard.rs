use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use common::{Notifier, Position, Result};

use crate::{PositionController, RiskConfig, Transition};

/// Which threshold the fallback exit crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackReason::StopLoss => write!(f, "stop-loss"),
            FallbackReason::TakeProfit => write!(f, "take-profit"),
        }
    }
}

/// What the guard did for one candle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardOutcome {
    /// Result of order reconciliation, when one ran on this candle.
    pub protection: Option<bool>,
    /// Set when the fallback closed the position.
    pub fallback: Option<FallbackReason>,
}

/// Backstop for the exchange-side take-profit/stop-loss orders.
///
/// Periodically reconciles whether those orders are still live, and closes the
/// position itself once price has moved past either threshold by more than
/// the configured slack.
pub struct ExitGuard {
    config: RiskConfig,
    notifier: Arc<dyn Notifier>,
    accepted: u64,
}

impl ExitGuard {
    pub fn new(config: RiskConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            notifier,
            accepted: 0,
        }
    }

    /// Run after every accepted candle with that candle's close.
    pub async fn on_candle(
        &mut self,
        controller: &mut PositionController,
        close: Decimal,
    ) -> Result<GuardOutcome> {
        self.accepted += 1;
        let mut outcome = GuardOutcome::default();

        let every = self.config.reconcile_every as u64;
        if every > 0 && self.accepted % every == 0 {
            outcome.protection = Some(self.reconcile(controller).await);
        }

        let Some(reason) = fallback_trigger(controller.position(), close, &self.config) else {
            return Ok(outcome);
        };
        let Some(signal) = controller.position().closing_signal() else {
            return Ok(outcome);
        };

        let position = controller.position().to_string();
        warn!(
            symbol = %controller.symbol(),
            %position,
            %close,
            %reason,
            "Fallback exit triggered"
        );
        self.notifier.notify(format!(
            "🛟 [FALLBACK] {reason} threshold passed on {} {position} at {close}, closing",
            controller.symbol()
        ));

        if let Transition::Closed { .. } = controller.apply(signal, close).await? {
            outcome.fallback = Some(reason);
        }
        Ok(outcome)
    }

    /// Re-derive `protective_orders_active` from the exchange's open orders.
    async fn reconcile(&self, controller: &mut PositionController) -> bool {
        let now = Utc::now();
        if controller.position().is_flat() {
            controller.mark_protection(false, now);
            return false;
        }

        let was_active = controller.exit_state().protective_orders_active;
        match controller.live_protective_orders().await {
            Ok(orders) => {
                let active = !orders.is_empty();
                controller.mark_protection(active, now);
                debug!(symbol = %controller.symbol(), live = orders.len(), active, "Protective orders reconciled");
                if was_active && !active {
                    info!(symbol = %controller.symbol(), "Protective orders no longer live");
                    self.notifier.notify(format!(
                        "⚠️ [EXIT] No live TP/SL orders for the open {} {} position, fallback exit armed",
                        controller.symbol(),
                        controller.position()
                    ));
                }
                active
            }
            Err(e) => {
                warn!(symbol = %controller.symbol(), error = %e, "Reconciliation failed");
                controller.mark_protection(false, now);
                self.notifier.notify(format!(
                    "❌ [EXIT] Could not check {} protective orders: {e}",
                    controller.symbol()
                ));
                false
            }
        }
    }
}

/// Return of the position at `close`, as a fraction of entry. Positive means
/// in profit for either direction.
pub fn unrealized_return(position: &Position, close: Decimal) -> Option<Decimal> {
    let (entry, long) = match position {
        Position::Flat => return None,
        Position::Long(open) => (open.entry_price, true),
        Position::Short(open) => (open.entry_price, false),
    };
    if entry <= Decimal::ZERO {
        return None;
    }
    let change = (close - entry) / entry;
    Some(if long { change } else { -change })
}

/// Whether the fallback should close `position` at `close`.
pub fn fallback_trigger(
    position: &Position,
    close: Decimal,
    config: &RiskConfig,
) -> Option<FallbackReason> {
    let ret = unrealized_return(position, close)?;
    if ret <= -(config.stop_loss_pct + config.fallback_slack_pct) {
        Some(FallbackReason::StopLoss)
    } else if ret >= config.take_profit_pct + config.fallback_slack_pct {
        Some(FallbackReason::TakeProfit)
    } else {
        None
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
