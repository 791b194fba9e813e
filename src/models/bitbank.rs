//! Bitbank socket.io models.
//!
//! Lines are Engine.IO packets: a one- or two-digit type prefix followed by
//! an optional JSON payload.

use serde::{Deserialize, Serialize};

use super::StringLevel;

pub const EVENT_JOIN_ROOM: &str = "join-room";
pub const EVENT_MESSAGE: &str = "message";

/// Prefix of socket.io event packets.
pub const PACKET_EVENT: &str = "42";

/// A socket.io packet split from its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    /// `0{...}` handshake.
    Open,
    /// `40` namespace connect.
    Connect,
    /// `2` ping.
    Ping,
    /// `3` pong.
    Pong,
    /// `42[...]` event with its JSON array payload.
    Event(&'a [u8]),
}

impl<'a> Packet<'a> {
    /// Classifies `line` by its packet-type prefix.
    pub fn parse(line: &'a [u8]) -> Option<Self> {
        if let Some(payload) = line.strip_prefix(PACKET_EVENT.as_bytes()) {
            return Some(Packet::Event(payload));
        }
        match line {
            [b'4', b'0', ..] => Some(Packet::Connect),
            [b'0', ..] => Some(Packet::Open),
            [b'2'] => Some(Packet::Ping),
            [b'3'] => Some(Packet::Pong),
            _ => None,
        }
    }
}

/// Wraps a JSON payload into an event packet line.
pub fn event_line(payload: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(PACKET_EVENT.len() + payload.len());
    line.extend_from_slice(PACKET_EVENT.as_bytes());
    line.extend_from_slice(payload);
    line
}

/// `["message", {...}]` pushed for a joined room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomEvent(pub String, pub RoomMessage);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMessage {
    pub room_name: String,
    pub message: MessageBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub data: serde_json::Value,
}

/// Full book pushed on `depth_whole_<pair>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthWhole {
    pub asks: Vec<StringLevel>,
    pub bids: Vec<StringLevel>,
    pub timestamp: i64,
}

/// Incremental update pushed on `depth_diff_<pair>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthDiff {
    #[serde(rename = "a")]
    pub asks: Vec<StringLevel>,
    #[serde(rename = "b")]
    pub bids: Vec<StringLevel>,
    #[serde(rename = "t")]
    pub timestamp: i64,
}
