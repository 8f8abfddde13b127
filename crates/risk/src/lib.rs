pub mod config;
pub mod controller;
pub mod cooldown;
pub mod guard;

pub use config::RiskConfig;
pub use controller::{exit_prices, PositionController, Transition};
pub use cooldown::Cooldown;
pub use guard::{fallback_trigger, unrealized_return, ExitGuard, FallbackReason, GuardOutcome};
