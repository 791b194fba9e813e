//! Bitmex realtime API models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const TABLE_ORDER_BOOK_L2: &str = "orderBookL2";

/// `{"op":"subscribe","args":[...]}` sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpRequest {
    pub op: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Acknowledgement of one subscription topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub success: bool,
    pub subscribe: String,
}

impl SubscribeResponse {
    pub fn new(topic: &str) -> Self {
        Self {
            success: true,
            subscribe: topic.to_string(),
        }
    }
}

/// Table data frame; `data` stays raw until the table is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMessage<T> {
    pub table: String,
    pub action: String,
    pub data: T,
}

/// Book side as Bitmex spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// One row of the `orderBookL2` table.
///
/// `price` is only sent on `partial`/`insert`; `size` is absent on `delete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookL2Entry {
    pub symbol: String,
    pub id: i64,
    pub side: Side,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}
