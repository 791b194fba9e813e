//! Bitflyer JSON-RPC 2.0 realtime API models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const JSONRPC_VERSION: &str = "2.0";
pub const METHOD_SUBSCRIBE: &str = "subscribe";
pub const METHOD_CHANNEL_MESSAGE: &str = "channelMessage";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    pub channel: String,
}

/// Client subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscribeRequest {
    pub method: String,
    pub params: ChannelParams,
    pub id: i64,
}

/// Result of a request, correlated only by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: i64,
    pub result: bool,
}

impl RpcResponse {
    pub fn success(id: i64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageParams<T> {
    pub channel: String,
    pub message: T,
}

/// Notification pushed for a subscribed channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage<T> {
    pub jsonrpc: String,
    pub method: String,
    pub params: MessageParams<T>,
}

impl<T> ChannelMessage<T> {
    pub fn new(channel: &str, message: T) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: METHOD_CHANNEL_MESSAGE.to_string(),
            params: MessageParams {
                channel: channel.to_string(),
                message,
            },
        }
    }
}

/// Body of `lightning_board*` messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardMessage {
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub mid_price: Option<Decimal>,
    pub bids: Vec<BoardOrder>,
    pub asks: Vec<BoardOrder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardOrder {
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub size: Decimal,
}
