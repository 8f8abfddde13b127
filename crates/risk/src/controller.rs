use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use common::{
    Error, ExchangeClient, ExitState, Notifier, OpenOrder, OpenPosition, OrderSide, Position,
    Result, Signal, StopKind, StopOrder,
};

use crate::{Cooldown, RiskConfig};

/// Result of applying a signal to the position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A new position was opened. `protected` is false when either protective
    /// order could not be placed.
    Opened {
        side: OrderSide,
        entry_price: Decimal,
        protected: bool,
    },
    /// The position was closed by a market order on `side`.
    Closed { side: OrderSide, exit_price: Decimal },
    /// Signal matches the current position.
    Unchanged,
}

enum Action {
    Open(OrderSide),
    Close,
    Hold,
}

/// Owns the position for one symbol and is the only component that places or
/// cancels orders.
///
/// Transition table:
///
/// | signal | Flat       | Long        | Short       |
/// |--------|------------|-------------|-------------|
/// | Buy    | open Long  | no-op       | close Short |
/// | Sell   | open Short | close Long  | no-op       |
pub struct PositionController {
    symbol: String,
    config: RiskConfig,
    client: Arc<dyn ExchangeClient>,
    notifier: Arc<dyn Notifier>,
    position: Position,
    exit: ExitState,
    cooldown: Cooldown,
}

impl PositionController {
    pub fn new(
        symbol: impl Into<String>,
        config: RiskConfig,
        client: Arc<dyn ExchangeClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let cooldown = Cooldown::new(config.cooldown);
        Self {
            symbol: symbol.into(),
            config,
            client,
            notifier,
            position: Position::Flat,
            exit: ExitState::default(),
            cooldown,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn exit_state(&self) -> ExitState {
        self.exit
    }

    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.cooldown.remaining()
    }

    /// Record the outcome of a protective-order reconciliation.
    pub fn mark_protection(&mut self, active: bool, checked_at: DateTime<Utc>) {
        self.exit = ExitState {
            protective_orders_active: active && !self.position.is_flat(),
            last_checked_at: Some(checked_at),
        };
    }

    /// Apply a strategy (or fallback) signal.
    ///
    /// `reference_price` is the latest close; it stands in for the entry or
    /// exit price when the exchange reports no average fill price.
    pub async fn apply(&mut self, signal: Signal, reference_price: Decimal) -> Result<Transition> {
        if let Some(remaining) = self.cooldown.remaining() {
            info!(
                symbol = %self.symbol,
                signal = %signal,
                remaining_secs = remaining.as_secs(),
                "Signal rejected: cooldown active"
            );
            self.notifier.notify(format!(
                "⏳ [COOLDOWN] {signal} signal on {} ignored, {}s left after the last close",
                self.symbol,
                remaining.as_secs().max(1)
            ));
            return Err(Error::CooldownActive { remaining });
        }

        let action = match (&self.position, signal) {
            (Position::Flat, _) => Action::Open(signal.side()),
            (Position::Long(_), Signal::Buy) | (Position::Short(_), Signal::Sell) => Action::Hold,
            (Position::Long(_), Signal::Sell) | (Position::Short(_), Signal::Buy) => Action::Close,
        };

        match action {
            Action::Open(side) => self.open(side, reference_price).await,
            Action::Close => self.close(reference_price).await,
            Action::Hold => {
                debug!(symbol = %self.symbol, position = %self.position, signal = %signal, "Already positioned");
                Ok(Transition::Unchanged)
            }
        }
    }

    /// Working take-profit/stop-loss orders for the symbol.
    pub async fn live_protective_orders(&self) -> Result<Vec<OpenOrder>> {
        let orders = self
            .with_timeout(self.client.open_orders(&self.symbol))
            .await?;
        Ok(orders.into_iter().filter(OpenOrder::is_protective).collect())
    }

    async fn open(&mut self, side: OrderSide, reference_price: Decimal) -> Result<Transition> {
        let quantity = self.config.quantity;
        if quantity <= Decimal::ZERO {
            warn!(symbol = %self.symbol, %quantity, "Refusing to open: trade quantity is not positive");
            return Err(Error::PreconditionNotMet(format!(
                "trade quantity must be positive, got {quantity}"
            )));
        }

        // Leftover TP/SL from a previous position would close the new one.
        self.cancel_protective_orders().await;

        info!(symbol = %self.symbol, %side, %quantity, "Opening position");
        let fill = match self
            .with_timeout(self.client.place_market_order(&self.symbol, side, quantity))
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                error!(symbol = %self.symbol, %side, error = %e, "Opening market order failed");
                self.notifier.notify(format!(
                    "❌ [ORDER] {side} {quantity} {} failed: {e}",
                    self.symbol
                ));
                return Err(e);
            }
        };

        let entry_price = if fill.fill_price > Decimal::ZERO {
            fill.fill_price
        } else {
            reference_price
        };
        let (take_profit, stop_loss) = exit_prices(side, entry_price, &self.config);

        if take_profit <= Decimal::ZERO || stop_loss <= Decimal::ZERO {
            // The entry already filled; the guard's reconciliation will see an
            // exchange position without protection.
            warn!(
                symbol = %self.symbol,
                %entry_price,
                %take_profit,
                %stop_loss,
                "Computed exit prices are not positive, protective orders skipped"
            );
            self.notifier.notify(format!(
                "⚠️ [ORDER] TP/SL for {} must be above zero (entry {entry_price}, TP {take_profit}, SL {stop_loss}). Entry filled without protection.",
                self.symbol
            ));
            return Err(Error::InvalidExitPrice {
                take_profit,
                stop_loss,
            });
        }

        let opened = OpenPosition {
            entry_price,
            quantity,
            opened_at: fill.timestamp,
        };
        self.position = match side {
            OrderSide::Buy => Position::Long(opened),
            OrderSide::Sell => Position::Short(opened),
        };
        self.exit = ExitState::default();

        let protected = self
            .place_protective_orders(side.opposite(), take_profit, stop_loss)
            .await;
        self.exit.protective_orders_active = protected;

        info!(
            symbol = %self.symbol,
            position = %self.position,
            %entry_price,
            %take_profit,
            %stop_loss,
            protected,
            "Position opened"
        );

        let (icon, verb) = match side {
            OrderSide::Buy => ("📈 [LONG]", "Bought"),
            OrderSide::Sell => ("📉 [SHORT]", "Sold"),
        };
        let mut text = format!(
            "{icon} {verb} {quantity} {}\nPrice: {entry_price}\nTP: {take_profit}\nSL: {stop_loss}",
            self.symbol
        );
        if !protected {
            text.push_str("\n⚠️ Protective orders missing, fallback exit armed");
        }
        self.notifier.notify(text);

        Ok(Transition::Opened {
            side,
            entry_price,
            protected,
        })
    }

    async fn close(&mut self, reference_price: Decimal) -> Result<Transition> {
        let (entry_side, quantity, entry_price) =
            match (self.position.entry_side(), self.position.open()) {
                (Some(side), Some(open)) => (side, open.quantity, open.entry_price),
                _ => return Ok(Transition::Unchanged),
            };
        let side = entry_side.opposite();

        info!(symbol = %self.symbol, position = %self.position, %side, %quantity, "Closing position");
        let fill = match self
            .with_timeout(self.client.place_market_order(&self.symbol, side, quantity))
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                error!(symbol = %self.symbol, %side, error = %e, "Closing market order failed");
                self.notifier.notify(format!(
                    "❌ [ORDER] Closing {} {} failed: {e}. Position still open.",
                    self.position, self.symbol
                ));
                return Err(e);
            }
        };

        let exit_price = if fill.fill_price > Decimal::ZERO {
            fill.fill_price
        } else {
            reference_price
        };
        let closed = self.position.to_string();

        self.position = Position::Flat;
        self.exit = ExitState::default();
        self.cooldown.start();

        info!(symbol = %self.symbol, %exit_price, %entry_price, "Position closed");
        self.notifier.notify(format!(
            "🔒 [CLOSE {closed}] {side} {quantity} {} at {exit_price} (entry {entry_price})",
            self.symbol
        ));

        self.cancel_protective_orders().await;

        Ok(Transition::Closed { side, exit_price })
    }

    /// Place TP then SL. Both are attempted; returns true only if both succeed.
    async fn place_protective_orders(
        &self,
        side: OrderSide,
        take_profit: Decimal,
        stop_loss: Decimal,
    ) -> bool {
        let mut placed = true;
        for (kind, stop_price) in [
            (StopKind::TakeProfitMarket, take_profit),
            (StopKind::StopMarket, stop_loss),
        ] {
            let order = StopOrder {
                symbol: self.symbol.clone(),
                side,
                kind,
                stop_price,
                close_position: true,
            };
            match self
                .with_timeout(self.client.place_stop_order(&order))
                .await
            {
                Ok(ack) => {
                    debug!(symbol = %self.symbol, %kind, %stop_price, order_id = ack.order_id, "Protective order placed");
                }
                Err(e) => {
                    placed = false;
                    error!(symbol = %self.symbol, %kind, %stop_price, error = %e, "Protective order failed");
                    self.notifier.notify(format!(
                        "❌ [EXIT] {kind} at {stop_price} for {} failed: {e}",
                        self.symbol
                    ));
                }
            }
        }
        placed
    }

    /// Best-effort cancel of every working TP/SL order. Returns how many were
    /// cancelled.
    async fn cancel_protective_orders(&self) -> usize {
        let orders = match self.live_protective_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                error!(symbol = %self.symbol, error = %e, "Could not list orders for cancellation");
                self.notifier.notify(format!(
                    "❌ [ORDERS] Could not list {} orders for cancellation: {e}",
                    self.symbol
                ));
                return 0;
            }
        };
        if orders.is_empty() {
            debug!(symbol = %self.symbol, "No protective orders to cancel");
            return 0;
        }

        let mut cancelled = 0;
        for order in &orders {
            match self
                .with_timeout(self.client.cancel_order(&self.symbol, order.order_id))
                .await
            {
                Ok(()) => cancelled += 1,
                Err(e) => {
                    error!(symbol = %self.symbol, order_id = order.order_id, error = %e, "Cancel failed");
                    self.notifier.notify(format!(
                        "❌ [ORDERS] Cancel of {} order {} failed: {e}",
                        self.symbol, order.order_id
                    ));
                }
            }
        }
        info!(symbol = %self.symbol, cancelled, "Protective orders cancelled");
        self.notifier.notify(format!(
            "🧹 [ORDERS] {cancelled} protective order(s) cancelled on {}",
            self.symbol
        ));
        cancelled
    }

    async fn with_timeout<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.exchange_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(limit)),
        }
    }
}

/// Take-profit and stop-loss stop prices for a position opened on `side`,
/// rounded to the configured precision.
pub fn exit_prices(side: OrderSide, entry_price: Decimal, config: &RiskConfig) -> (Decimal, Decimal) {
    let (take_profit, stop_loss) = match side {
        OrderSide::Buy => (
            entry_price * (Decimal::ONE + config.take_profit_pct),
            entry_price * (Decimal::ONE - config.stop_loss_pct),
        ),
        OrderSide::Sell => (
            entry_price * (Decimal::ONE - config.take_profit_pct),
            entry_price * (Decimal::ONE + config.stop_loss_pct),
        ),
    };
    (
        take_profit.round_dp(config.price_precision),
        stop_loss.round_dp(config.price_precision),
    )
}

// ─── Tests ────────────────────────────────────────────────────────────────────
