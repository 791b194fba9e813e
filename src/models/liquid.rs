//! Liquid (Pusher protocol) models.

use serde::{Deserialize, Serialize};

pub const EVENT_CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const EVENT_SUBSCRIBE: &str = "pusher:subscribe";
pub const EVENT_SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
pub const EVENT_UPDATED: &str = "updated";

/// Every Pusher frame. `data` is an object on control events and a
/// JSON-encoded string on channel events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRoot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub event: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeData {
    pub channel: String,
}
