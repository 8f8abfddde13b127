pub mod commands;
pub mod notifier;

pub use commands::{start_bot, BotDeps, Command};
pub use notifier::TelegramNotifier;
