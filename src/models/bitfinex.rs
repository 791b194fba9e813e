//! Bitfinex websocket v2 models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const EVENT_SUBSCRIBE: &str = "subscribe";
pub const EVENT_SUBSCRIBED: &str = "subscribed";

/// Frame payload sent every few seconds on an idle channel.
pub const FRAME_HEARTBEAT: &str = "hb";
/// Frame payload carrying a book checksum.
pub const FRAME_CHECKSUM: &str = "cs";

/// Client subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscribeRequest {
    pub event: String,
    pub channel: String,
    pub symbol: String,
}

/// Any object frame: `subscribed`, `error`, `info`, `conf` or `pong` events.
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(rename = "chanId", default)]
    pub chan_id: Option<i64>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
}

/// Subscription acknowledgement as the server emits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribedEvent {
    pub event: String,
    pub channel: String,
    #[serde(rename = "chanId")]
    pub chan_id: i64,
    pub symbol: String,
    pub pair: String,
}

impl SubscribedEvent {
    pub fn new(chan_id: i64, channel: &str, symbol: &str) -> Self {
        // Trading symbols carry a `t`/`f` type prefix the pair omits.
        let pair = symbol.get(1..).unwrap_or_default();
        Self {
            event: EVENT_SUBSCRIBED.to_string(),
            channel: channel.to_string(),
            chan_id,
            symbol: symbol.to_string(),
            pair: pair.to_string(),
        }
    }
}

/// `[price, count, amount]`; a positive amount is a bid, negative an ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookOrder(
    #[serde(with = "rust_decimal::serde::float")] pub Decimal,
    pub u64,
    #[serde(with = "rust_decimal::serde::float")] pub Decimal,
);

impl BookOrder {
    pub fn price(&self) -> Decimal {
        self.0
    }

    pub fn count(&self) -> u64 {
        self.1
    }

    pub fn amount(&self) -> Decimal {
        self.2
    }
}
