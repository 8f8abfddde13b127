use std::sync::Arc;
use std::time::Duration;

use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tokio::sync::watch;
use tracing::{info, warn};

use common::{ExchangeClient, ExchangePosition, OpenOrder, Position, TraderSnapshot, TradingMode};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Upper bound on exchange queries made on behalf of a command.
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub exchange: Arc<dyn ExchangeClient>,
    pub symbol: String,
    pub mode: TradingMode,
    /// State published by the trader after every stream message.
    pub snapshot: watch::Receiver<TraderSnapshot>,
    /// The only chat allowed to issue commands.
    pub chat_id: ChatId,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "klinebot commands:")]
pub enum Command {
    #[command(description = "Show position, protection and cooldown")]
    Status,
    #[command(description = "Show the exchange's position for the symbol")]
    Positions,
    #[command(description = "List live orders for the symbol")]
    Orders,
    #[command(description = "Show USDT futures balance")]
    Balance,
    #[command(description = "Show this help")]
    Help,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(bot: Bot, deps: BotDeps) {
    let deps = Arc::new(deps);

    info!(chat_id = ?deps.chat_id, "Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Positions].endpoint(handle_positions))
        .branch(case![Command::Orders].endpoint(handle_orders))
        .branch(case![Command::Balance].endpoint(handle_balance))
        .branch(case![Command::Help].endpoint(handle_help));

    Update::filter_message()
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from any chat but the configured one.
async fn auth_filter(msg: Message, deps: Arc<BotDeps>) -> bool {
    let allowed = msg.chat.id == deps.chat_id;
    if !allowed {
        warn!(chat_id = ?msg.chat.id, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let snapshot = deps.snapshot.borrow().clone();
    bot.send_message(msg.chat.id, format_status(&snapshot, deps.mode))
        .await?;
    Ok(())
}

async fn handle_positions(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match tokio::time::timeout(QUERY_TIMEOUT, deps.exchange.positions(&deps.symbol)).await {
        Ok(Ok(positions)) => format_positions(&deps.symbol, &positions),
        Ok(Err(e)) => format!("❌ Could not fetch positions: {e}"),
        Err(_) => "❌ Could not fetch positions: exchange timed out".to_string(),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_orders(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match tokio::time::timeout(QUERY_TIMEOUT, deps.exchange.open_orders(&deps.symbol)).await {
        Ok(Ok(orders)) => format_orders(&deps.symbol, &orders),
        Ok(Err(e)) => format!("❌ Could not list orders: {e}"),
        Err(_) => "❌ Could not list orders: exchange timed out".to_string(),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_balance(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match tokio::time::timeout(QUERY_TIMEOUT, deps.exchange.account_balance("USDT")).await {
        Ok(Ok(balance)) => format!("💰 Balance ({}): {} USDT", deps.mode, balance.round_dp(2)),
        Ok(Err(e)) => format!("❌ Could not fetch balance: {e}"),
        Err(_) => "❌ Could not fetch balance: exchange timed out".to_string(),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

pub fn format_status(snapshot: &TraderSnapshot, mode: TradingMode) -> String {
    let mut text = format!(
        "📊 {} ({mode})\nPosition: {}",
        snapshot.symbol, snapshot.position
    );
    if let Position::Long(open) | Position::Short(open) = &snapshot.position {
        text.push_str(&format!(
            "\nEntry: {}\nQuantity: {}\nProtection: {}",
            open.entry_price,
            open.quantity,
            if snapshot.exit_state.protective_orders_active {
                "active"
            } else {
                "missing"
            }
        ));
    }
    match snapshot.cooldown_remaining {
        Some(remaining) => text.push_str(&format!("\nCooldown: {}s left", remaining.as_secs())),
        None => text.push_str("\nCooldown: inactive"),
    }
    text.push_str(&format!("\nCandles: {}", snapshot.candles));
    if let Some(close) = snapshot.last_close {
        text.push_str(&format!("\nLast close: {close}"));
    }
    text
}

pub fn format_positions(symbol: &str, positions: &[ExchangePosition]) -> String {
    if positions.is_empty() {
        return format!("📭 No open position for {symbol} on the exchange");
    }
    let mut text = format!("📊 Exchange positions for {symbol}:");
    for pos in positions {
        text.push_str(&format!(
            "\n{} {} @ {} (uPnL {})",
            pos.direction(),
            pos.quantity.abs(),
            pos.entry_price,
            pos.unrealized_pnl.round_dp(2)
        ));
    }
    text
}

pub fn format_orders(symbol: &str, orders: &[OpenOrder]) -> String {
    if orders.is_empty() {
        return format!("📭 No open orders for {symbol}");
    }
    let mut text = format!("📋 Open orders for {symbol}:");
    for order in orders {
        text.push_str(&format!(
            "\n#{} {} {} stop {} [{}]",
            order.order_id, order.side, order.order_type, order.stop_price, order.status
        ));
    }
    text
}
