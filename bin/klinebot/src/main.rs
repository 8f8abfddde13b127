use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use teloxide::types::ChatId;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{
    Config, Error, ExchangeClient, LogNotifier, Notifier, StreamMessage, TradingMode,
};
use engine::binance::ws_base;
use engine::{BinanceClient, CandleLedger, CandleStream, StreamConfig, StreamHandler, Trader};
use paper::PaperClient;
use risk::{ExitGuard, PositionController, RiskConfig};
use telegram_ctrl::{start_bot, BotDeps, TelegramNotifier};

/// Feeds every streamed price into the paper book before the trader sees the
/// message, so simulated fills and resting stops follow the live market.
struct PaperTap {
    paper: Arc<PaperClient>,
    trader: Arc<Trader>,
}

#[async_trait]
impl StreamHandler for PaperTap {
    async fn on_message(&self, message: Value) {
        if let Ok(StreamMessage::Kline(event)) = StreamMessage::classify(&message) {
            for fill in self.paper.update_price(&event.symbol, event.candle.close).await {
                info!(
                    symbol = %event.symbol,
                    side = %fill.side,
                    price = %fill.fill_price,
                    quantity = %fill.quantity,
                    "Paper protective order triggered"
                );
            }
        }
        self.trader.on_message(message).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(
        mode = %cfg.trading_mode,
        symbol = %cfg.symbol,
        interval = %cfg.interval,
        testnet = cfg.binance_testnet,
        "klinebot starting"
    );

    // ── Exchange clients (injected based on TRADING_MODE) ─────────────────────
    let binance = Arc::new(
        BinanceClient::new(&cfg.binance_api_key, &cfg.binance_secret, cfg.binance_testnet)
            .context("building Binance client")?,
    );
    let paper = match cfg.trading_mode {
        TradingMode::Paper => {
            info!(slippage_bps = %cfg.paper_slippage_bps, "Paper trading mode, using PaperClient");
            Some(Arc::new(PaperClient::new(
                cfg.paper_balance_usd,
                cfg.paper_slippage_bps,
            )))
        }
        TradingMode::Live => {
            info!(base_url = %binance.base_url(), "Live trading mode, using BinanceClient");
            None
        }
    };
    let exchange: Arc<dyn ExchangeClient> = match &paper {
        Some(paper) => paper.clone(),
        None => binance.clone(),
    };

    // ── Notifications ─────────────────────────────────────────────────────────
    let telegram = match (&cfg.telegram_token, cfg.telegram_chat_id) {
        (Some(token), Some(chat_id)) => Some((teloxide::Bot::new(token), ChatId(chat_id))),
        _ => {
            warn!("TELEGRAM_TOKEN or TELEGRAM_CHAT_ID not set, notifications are only logged");
            None
        }
    };
    let notifier: Arc<dyn Notifier> = match &telegram {
        Some((bot, chat_id)) => Arc::new(TelegramNotifier::spawn(bot.clone(), *chat_id)),
        None => Arc::new(LogNotifier),
    };

    // ── Credential check ──────────────────────────────────────────────────────
    let balance = tokio::time::timeout(cfg.exchange_timeout, binance.account_balance("USDT"))
        .await
        .unwrap_or_else(|_| Err(Error::Timeout(cfg.exchange_timeout)));
    match balance {
        Ok(balance) => info!(%balance, "Exchange credentials verified"),
        Err(e) => {
            warn!(error = %e, "Exchange credential check failed");
            notifier.notify(format!("⚠️ [STARTUP] Credential check failed: {e}"));
        }
    }

    // ── Trading core ──────────────────────────────────────────────────────────
    let strategy = strategy::load_strategy(cfg.strategy_config_path.as_deref())
        .context("loading strategy")?;
    info!(strategy = %strategy.name(), "Strategy loaded");

    let risk_cfg = RiskConfig::from(&cfg);
    let ledger = CandleLedger::new(cfg.ledger_capacity).context("creating candle ledger")?;
    let controller = PositionController::new(
        cfg.symbol.clone(),
        risk_cfg.clone(),
        exchange.clone(),
        notifier.clone(),
    );
    let guard = ExitGuard::new(risk_cfg, notifier.clone());
    let trader = Arc::new(Trader::new(ledger, controller, guard, strategy));

    // History always comes from the public klines endpoint.
    trader
        .seed_history(binance.as_ref(), &cfg.interval, cfg.history_hours)
        .await;

    // ── Telegram commands ─────────────────────────────────────────────────────
    if let Some((bot, chat_id)) = telegram {
        let deps = BotDeps {
            exchange: exchange.clone(),
            symbol: cfg.symbol.clone(),
            mode: cfg.trading_mode,
            snapshot: trader.subscribe(),
            chat_id,
        };
        tokio::spawn(start_bot(bot, deps));
    }

    // ── Stream ────────────────────────────────────────────────────────────────
    let handler: Arc<dyn StreamHandler> = match paper {
        Some(paper) => Arc::new(PaperTap {
            paper,
            trader: trader.clone(),
        }),
        None => trader.clone(),
    };
    let stream = Arc::new(CandleStream::new(
        StreamConfig::new(&cfg.symbol, &cfg.interval)
            .with_ws_base(ws_base(cfg.binance_testnet))
            .with_reconnect_delay(cfg.reconnect_delay)
            .with_connect_timeout(cfg.exchange_timeout),
    ));
    let stream_task = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.run(handler).await })
    };

    notifier.notify(format!(
        "🚀 [START] klinebot {} on {} {}",
        cfg.trading_mode, cfg.symbol, cfg.interval
    ));
    info!(stream = %stream.stream_key(), "All subsystems started. Waiting for shutdown signal.");

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("Shutdown signal received");
    stream.stop();
    if let Err(e) = stream_task.await {
        warn!(error = %e, "Stream task ended abnormally");
    }

    let snapshot = trader.snapshot();
    info!(position = %snapshot.position, candles = snapshot.candles, "klinebot stopped");
    Ok(())
}
