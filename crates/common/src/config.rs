use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::TradingMode;

/// All configuration loaded from environment variables at startup.
/// Missing exchange credentials cause an immediate panic with a clear message;
/// everything else falls back to the reference defaults.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials
    pub binance_api_key: String,
    pub binance_secret: String,
    /// Use the futures testnet endpoints.
    pub binance_testnet: bool,

    // Telegram (optional; notifications are only logged without it)
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<i64>,

    // Market
    pub symbol: String,
    pub interval: String,
    pub history_hours: i64,
    pub ledger_capacity: usize,
    pub reconnect_delay: Duration,

    // Trading
    pub trading_mode: TradingMode,
    pub trade_quantity: Decimal,
    pub take_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,
    pub fallback_slack_pct: Decimal,
    pub cooldown: Duration,
    pub reconcile_every: usize,
    pub price_precision: u32,
    pub exchange_timeout: Duration,

    // Paper trading
    pub paper_slippage_bps: Decimal,
    pub paper_balance_usd: Decimal,

    /// Strategy config file path. Built-in RSI+MACD defaults when unset.
    pub strategy_config_path: Option<String>,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on missing credentials or unparsable values.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match optional_env("TRADING_MODE")
            .unwrap_or_else(|| "paper".to_string())
            .to_lowercase()
            .as_str()
        {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => panic!("ERROR: TRADING_MODE must be 'paper' or 'live', got: '{other}'"),
        };

        let telegram_chat_id = optional_env("TELEGRAM_CHAT_ID").map(|raw| {
            raw.trim().parse::<i64>().unwrap_or_else(|_| {
                panic!("TELEGRAM_CHAT_ID is not a numeric chat id: '{}'", raw.trim())
            })
        });

        Config {
            binance_api_key: required_env("BINANCE_API_KEY"),
            binance_secret: required_env("BINANCE_SECRET"),
            binance_testnet: parsed_env("BINANCE_TESTNET", true),
            telegram_token: optional_env("TELEGRAM_TOKEN"),
            telegram_chat_id,
            symbol: optional_env("SYMBOL")
                .unwrap_or_else(|| "BTCUSDT".to_string())
                .to_uppercase(),
            interval: optional_env("INTERVAL").unwrap_or_else(|| "3m".to_string()),
            history_hours: parsed_env("HISTORY_HOURS", 24),
            ledger_capacity: parsed_env("LEDGER_CAPACITY", 1000),
            reconnect_delay: Duration::from_secs(parsed_env("RECONNECT_DELAY_SECS", 5)),
            trading_mode,
            trade_quantity: decimal_env("TRADE_QUANTITY", "0.002"),
            take_profit_pct: decimal_env("TAKE_PROFIT_PCT", "0.005"),
            stop_loss_pct: decimal_env("STOP_LOSS_PCT", "0.003"),
            fallback_slack_pct: decimal_env("FALLBACK_SLACK_PCT", "0.001"),
            cooldown: Duration::from_secs(parsed_env("COOLDOWN_SECS", 60)),
            reconcile_every: parsed_env("RECONCILE_EVERY", 5),
            price_precision: parsed_env("PRICE_PRECISION", 2),
            exchange_timeout: Duration::from_secs(parsed_env("EXCHANGE_TIMEOUT_SECS", 10)),
            paper_slippage_bps: decimal_env("PAPER_SLIPPAGE_BPS", "10"),
            paper_balance_usd: decimal_env("PAPER_BALANCE_USD", "10000"),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH"),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> T {
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("Environment variable '{key}' has invalid value '{raw}'")),
        None => default,
    }
}

fn decimal_env(key: &str, default: &str) -> Decimal {
    let raw = optional_env(key).unwrap_or_else(|| default.to_string());
    Decimal::from_str(raw.trim())
        .unwrap_or_else(|_| panic!("Environment variable '{key}' is not a decimal: '{raw}'"))
}
