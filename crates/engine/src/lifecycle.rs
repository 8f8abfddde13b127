use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use common::{Error, ExchangeClient, TraderSnapshot};
use risk::{ExitGuard, PositionController, Transition};
use strategy::Strategy;

use crate::binance::StreamHandler;
use crate::ledger::{CandleLedger, IngestOutcome};

/// Everything mutated by the candle pipeline. Only reachable through
/// `Trader`'s lock.
struct TraderCore {
    ledger: CandleLedger,
    controller: PositionController,
    guard: ExitGuard,
    strategy: Box<dyn Strategy>,
}

impl TraderCore {
    async fn on_accepted(&mut self) {
        let Some(close) = self.ledger.latest().map(|c| c.close) else {
            return;
        };

        if let Some(signal) = self.strategy.evaluate(self.ledger.candles()) {
            info!(
                strategy = %self.strategy.name(),
                %signal,
                %close,
                candles = self.ledger.len(),
                "Strategy signal"
            );
            match self.controller.apply(signal, close).await {
                Ok(Transition::Unchanged) => {}
                Ok(transition) => debug!(?transition, "Position transition"),
                Err(e) if e.is_rejection() => debug!(error = %e, "Signal rejected"),
                Err(e) => warn!(error = %e, "Signal not applied"),
            }
        }

        match self.guard.on_candle(&mut self.controller, close).await {
            Ok(outcome) => {
                if let Some(reason) = outcome.fallback {
                    info!(%reason, %close, "Fallback exit completed");
                }
            }
            Err(e) => warn!(error = %e, "Fallback exit failed"),
        }
    }

    fn snapshot(&self) -> TraderSnapshot {
        TraderSnapshot {
            symbol: self.controller.symbol().to_string(),
            position: self.controller.position().clone(),
            exit_state: self.controller.exit_state(),
            cooldown_remaining: self.controller.cooldown_remaining(),
            candles: self.ledger.len(),
            last_close: self.ledger.latest().map(|c| c.close),
        }
    }
}

/// The candle pipeline for one symbol: ingest, evaluate, transition, guard.
///
/// Each stream message is processed to completion under a single lock before
/// the next one is accepted. Other tasks observe state through `subscribe`.
pub struct Trader {
    core: Mutex<TraderCore>,
    snapshot: watch::Sender<TraderSnapshot>,
}

impl Trader {
    pub fn new(
        ledger: CandleLedger,
        controller: PositionController,
        guard: ExitGuard,
        strategy: Box<dyn Strategy>,
    ) -> Self {
        let core = TraderCore {
            ledger,
            controller,
            guard,
            strategy,
        };
        let (snapshot, _) = watch::channel(core.snapshot());
        Self {
            core: Mutex::new(core),
            snapshot,
        }
    }

    /// Latest published state.
    pub fn subscribe(&self) -> watch::Receiver<TraderSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> TraderSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Process one raw stream message.
    pub async fn handle(&self, message: &Value) -> IngestOutcome {
        let mut core = self.core.lock().await;
        let outcome = core.ledger.ingest(message);
        if let IngestOutcome::Accepted(len) = outcome {
            debug!(candles = len, "Candle accepted");
            core.on_accepted().await;
        }
        self.snapshot.send_replace(core.snapshot());
        outcome
    }

    /// Load the last `hours` of closed candles into the ledger. Failures and
    /// timeouts are logged and leave the ledger as it was.
    ///
    /// The fetch runs outside the core lock and is bounded by the exchange
    /// timeout, so a stalled request cannot hold up the stream.
    pub async fn seed_history(
        &self,
        client: &dyn ExchangeClient,
        interval: &str,
        hours: i64,
    ) -> usize {
        let (symbol, limit) = {
            let core = self.core.lock().await;
            (
                core.controller.symbol().to_string(),
                core.controller.config().exchange_timeout,
            )
        };
        let end = Utc::now();
        let start = end - Duration::hours(hours);

        let fetched = tokio::time::timeout(
            limit,
            client.historical_candles(&symbol, interval, start, end),
        )
        .await
        .unwrap_or_else(|_| Err(Error::Timeout(limit)));

        let candles = match fetched {
            Ok(candles) if candles.is_empty() => {
                warn!(%symbol, %interval, hours, "No historical candles returned");
                return 0;
            }
            Ok(candles) => candles,
            Err(e) => {
                warn!(%symbol, %interval, error = %e, "Candle history unavailable, starting empty");
                return 0;
            }
        };

        let mut core = self.core.lock().await;
        let inserted = core.ledger.seed(candles);
        info!(%symbol, %interval, inserted, total = core.ledger.len(), "Seeded candle history");
        self.snapshot.send_replace(core.snapshot());
        inserted
    }
}

#[async_trait]
impl StreamHandler for Trader {
    async fn on_message(&self, message: Value) {
        self.handle(&message).await;
    }
}
