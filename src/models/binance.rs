//! Binance combined-stream and REST depth models.

use serde::{Deserialize, Serialize};

use super::StringLevel;

pub const METHOD_SUBSCRIBE: &str = "SUBSCRIBE";

/// Client request subscribing to streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub method: String,
    pub params: Vec<String>,
    pub id: i64,
}

impl SubscribeRequest {
    /// Creates a single-stream subscribe request.
    pub fn new(channel: &str, id: i64) -> Self {
        Self {
            method: METHOD_SUBSCRIBE.to_string(),
            params: vec![channel.to_string()],
            id,
        }
    }
}

/// Server reply to a request. `result` is `null` on success; failures carry
/// an `error` object instead.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestResponse {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    pub id: i64,
}

/// Envelope of every combined-stream data frame.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamFrame {
    pub stream: String,
    pub data: serde_json::Value,
}

/// One `depthUpdate` event from a diff depth stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthUpdate {
    #[serde(rename = "e", default)]
    pub event_type: String,
    #[serde(rename = "E", default)]
    pub event_time: i64,
    #[serde(rename = "s", default)]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<StringLevel>,
    #[serde(rename = "a")]
    pub asks: Vec<StringLevel>,
}

/// Response body of `GET /api/v3/depth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestDepth {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<StringLevel>,
    pub asks: Vec<StringLevel>,
}
