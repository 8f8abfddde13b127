use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("Exchange call timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid exit price: take-profit {take_profit}, stop-loss {stop_loss}")]
    InvalidExitPrice {
        take_profit: Decimal,
        stop_loss: Decimal,
    },

    #[error("Cooldown active for another {remaining:?}")]
    CooldownActive { remaining: Duration },

    #[error("Precondition not met: {0}")]
    PreconditionNotMet(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Failures of a remote exchange call (including timeouts). These are
    /// reported to the operator but never roll back a filled order.
    pub fn is_exchange(&self) -> bool {
        matches!(self, Error::Exchange(_) | Error::Timeout(_) | Error::Http(_))
    }

    /// Rejected before any exchange call was made.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::CooldownActive { .. } | Error::PreconditionNotMet(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
