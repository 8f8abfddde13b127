pub mod config;
pub mod error;
pub mod exchange;
pub mod notifier;
#[cfg(feature = "testing")]
pub mod testing;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use exchange::ExchangeClient;
pub use notifier::{LogNotifier, Notifier};
pub use types::*;
