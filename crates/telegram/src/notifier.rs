use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use common::Notifier;

/// Sends notifications to one Telegram chat from a background task, so
/// `notify` never blocks or fails the trading path.
pub struct TelegramNotifier {
    tx: mpsc::UnboundedSender<String>,
}

impl TelegramNotifier {
    /// Must be called inside a tokio runtime.
    pub fn spawn(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = bot.send_message(chat_id, text).await {
                    warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram notification");
                }
            }
            debug!("Telegram notifier stopped");
        });
        Self { tx }
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, text: String) {
        if self.tx.send(text).is_err() {
            warn!("Telegram notifier task is gone, message dropped");
        }
    }
}
