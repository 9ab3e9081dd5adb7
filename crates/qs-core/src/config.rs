//! Client configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//!
//! # Example config
//!
//! ```json
//! {
//!   "auth_token": "unauthorized_user_token",
//!   "ping_interval_ms": 20000,
//!   "max_reconnect_delay_ms": 60000,
//!   "fields": ["lp", "ch", "chp", "volume"],
//!   "logging": { "level": "info", "dir": "logs" }
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{QsError, Result};
use crate::logging::LogConfig;

pub const DEFAULT_URL: &str = "wss://data.tradingview.com/socket.io/websocket";
pub const DEFAULT_AUTH_TOKEN: &str = "unauthorized_user_token";
pub const DEFAULT_ORIGIN: &str = "https://www.tradingview.com";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:79.0) Gecko/20100101 Firefox/79.0";

/// Fields requested from the server after every handshake unless overridden.
pub const DEFAULT_FIELDS: &[&str] = &[
    "ch",
    "chp",
    "current_session",
    "description",
    "language",
    "exchange",
    "fractional",
    "is_tradable",
    "lp",
    "minmov",
    "minmove2",
    "original_name",
    "pricescale",
    "pro_name",
    "short_name",
    "type",
    "update_mode",
    "volume",
    "ask",
    "bid",
    "high_price",
    "low_price",
    "open_price",
    "prev_close_price",
    "rch",
    "rchp",
    "rtc",
    "basic_eps_net_income",
    "beta_1_year",
    "earnings_per_share_basic_ttm",
    "industry",
    "market_cap_basic",
    "sector",
    "dividends_yield",
];

/// Settings for one client instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// Extra HTTP headers for the WebSocket handshake.
    pub headers: HashMap<String, String>,
    /// Token sent with `set_auth_token`.
    pub auth_token: String,
    /// Maximum silence between server pings before the link is considered dead.
    pub ping_interval_ms: u64,
    /// How often the watchdog checks the last ping time.
    pub watchdog_period_ms: u64,
    /// Upper bound for the reconnect delay. `None` leaves it uncapped.
    pub max_reconnect_delay_ms: Option<u64>,
    /// Field list sent with `quote_set_fields`; also the default required set
    /// for one-shot waits.
    pub fields: Vec<String>,
    /// Capacity of the facade → engine request channel.
    pub request_buffer: usize,
    /// Subscriber settings for binaries; see [`crate::logging`].
    pub logging: LogConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let headers = HashMap::from([
            ("Origin".to_string(), DEFAULT_ORIGIN.to_string()),
            ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
        ]);
        Self {
            url: DEFAULT_URL.into(),
            headers,
            auth_token: DEFAULT_AUTH_TOKEN.into(),
            ping_interval_ms: 20_000,
            watchdog_period_ms: 5_000,
            max_reconnect_delay_ms: Some(300_000),
            fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
            request_buffer: 64,
            logging: LogConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn watchdog_period(&self) -> Duration {
        Duration::from_millis(self.watchdog_period_ms)
    }

    pub fn max_reconnect_delay(&self) -> Option<Duration> {
        self.max_reconnect_delay_ms.map(Duration::from_millis)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(QsError::Config("url must not be empty".into()));
        }
        if self.ping_interval_ms == 0 {
            return Err(QsError::Config("ping_interval_ms must be positive".into()));
        }
        if self.watchdog_period_ms == 0 {
            return Err(QsError::Config("watchdog_period_ms must be positive".into()));
        }
        if self.fields.is_empty() {
            return Err(QsError::Config("fields must not be empty".into()));
        }
        if self.request_buffer == 0 {
            return Err(QsError::Config("request_buffer must be positive".into()));
        }
        Ok(())
    }
}

/// Load and validate a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<ClientConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: ClientConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
