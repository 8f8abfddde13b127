use serde_json::Value;
use tracing::{debug, warn};

use common::{Candle, Error, Result, StreamMessage};

/// What `CandleLedger::ingest` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Not a closed kline (ack, other event, malformed, or in-progress).
    Ignored,
    /// A candle with the same open time is already stored.
    Duplicate,
    /// The ledger is full and the candle is older than everything it keeps.
    Stale,
    /// Stored. Carries the ledger length after trimming.
    Accepted(usize),
}

/// Bounded, time-ordered store of closed candles for one symbol.
///
/// Candles are kept strictly ascending by `open_time` with no duplicates and
/// are never modified once stored. When the ledger grows past its capacity the
/// oldest candles are dropped first.
#[derive(Debug, Clone)]
pub struct CandleLedger {
    candles: Vec<Candle>,
    capacity: usize,
}

impl CandleLedger {
    /// `capacity` must cover the longest indicator window.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < strategy::MIN_CANDLES {
            return Err(Error::Config(format!(
                "ledger capacity {capacity} is below the minimum indicator window of {}",
                strategy::MIN_CANDLES
            )));
        }
        Ok(Self {
            candles: Vec::with_capacity(capacity + 1),
            capacity,
        })
    }

    /// Classify a raw stream message and store it if it is a new closed candle.
    pub fn ingest(&mut self, message: &Value) -> IngestOutcome {
        let event = match StreamMessage::classify(message) {
            Ok(StreamMessage::Kline(event)) => event,
            Ok(StreamMessage::Ack) => {
                debug!("Subscription acknowledged");
                return IngestOutcome::Ignored;
            }
            Ok(StreamMessage::Other) => return IngestOutcome::Ignored,
            Err(e) => {
                warn!(error = %e, "Malformed kline payload");
                return IngestOutcome::Ignored;
            }
        };
        if !event.is_closed {
            return IngestOutcome::Ignored;
        }

        let open_time = event.candle.open_time;
        let outcome = self.insert(event.candle);
        match outcome {
            IngestOutcome::Duplicate => debug!(symbol = %event.symbol, "Duplicate candle"),
            IngestOutcome::Stale => {
                debug!(symbol = %event.symbol, %open_time, "Candle older than the retained window")
            }
            _ => {}
        }
        outcome
    }

    /// Merge historical candles. Returns how many were new.
    pub fn seed(&mut self, candles: impl IntoIterator<Item = Candle>) -> usize {
        let mut inserted = 0;
        for candle in candles {
            if let IngestOutcome::Accepted(_) = self.insert(candle) {
                inserted += 1;
            }
        }
        inserted
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn insert(&mut self, candle: Candle) -> IngestOutcome {
        match self
            .candles
            .binary_search_by_key(&candle.open_time, |c| c.open_time)
        {
            Ok(_) => IngestOutcome::Duplicate,
            Err(0) if self.candles.len() >= self.capacity => IngestOutcome::Stale,
            Err(idx) => {
                self.candles.insert(idx, candle);
                if self.candles.len() > self.capacity {
                    let excess = self.candles.len() - self.capacity;
                    self.candles.drain(..excess);
                }
                IngestOutcome::Accepted(self.candles.len())
            }
        }
    }
}
