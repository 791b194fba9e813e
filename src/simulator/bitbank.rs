//! Bitbank socket.io simulator.
//!
//! The server never acknowledges `join-room`, so a subscription takes
//! effect as soon as the client sends it. `depth_whole_<pair>` replaces the
//! pair's book and `depth_diff_<pair>` updates it; the timestamp of the
//! last applied event is kept for replay.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ChannelFilter, Simulator, Snapshot, ensure_channel};
use crate::book::PriceBook;
use crate::channel::{
    BITBANK_PREFIX_DEPTH_DIFF, BITBANK_PREFIX_DEPTH_WHOLE, CHANNEL_UNKNOWN, Exchange,
    STATE_CHANNEL_SUBSCRIBED, decompose_channel,
};
use crate::models::StringLevel;
use crate::models::bitbank::{
    DepthDiff, DepthWhole, EVENT_JOIN_ROOM, EVENT_MESSAGE, MessageBody, Packet, RoomEvent,
    RoomMessage, event_line,
};
use crate::{Result, StreamStateError};

const STREAM_DEPTH_WHOLE: &str = "depth_whole";
const STREAM_DEPTH_DIFF: &str = "depth_diff";

fn whole_channel(pair: &str) -> String {
    format!("{BITBANK_PREFIX_DEPTH_WHOLE}{pair}")
}

fn diff_channel(pair: &str) -> String {
    format!("{BITBANK_PREFIX_DEPTH_DIFF}{pair}")
}

/// Returns the pair of a depth channel.
fn depth_pair(channel: &str) -> Option<&str> {
    let parts = decompose_channel(Exchange::Bitbank, channel).ok()?;
    match parts.stream {
        STREAM_DEPTH_WHOLE | STREAM_DEPTH_DIFF => parts.symbol,
        _ => None,
    }
}

/// A pair's book and the timestamp (ms) of the last event applied to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthState {
    pub book: PriceBook,
    pub timestamp: i64,
}

impl DepthState {
    /// True until the first depth event for the pair arrives.
    fn is_unfed(&self) -> bool {
        self.timestamp == 0 && self.book.is_empty()
    }

    fn apply(&mut self, asks: &[StringLevel], bids: &[StringLevel], timestamp: i64) {
        for [price, size] in asks {
            self.book.apply_ask(*price, *size);
        }
        for [price, size] in bids {
            self.book.apply_bid(*price, *size);
        }
        self.timestamp = timestamp;
    }
}

/// Simulator for the Bitbank public stream.
#[derive(Debug, Default)]
pub struct BitbankSimulator {
    filter: ChannelFilter,
    subscribed: BTreeSet<String>,
    /// Depth by pair.
    depths: BTreeMap<String, DepthState>,
}

impl BitbankSimulator {
    pub fn new(filter: ChannelFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn subscribed(&self) -> &BTreeSet<String> {
        &self.subscribed
    }

    pub fn depth(&self, pair: &str) -> Option<&DepthState> {
        self.depths.get(pair)
    }

    fn tracks_depth(&self, pair: &str) -> bool {
        self.filter.allows(&whole_channel(pair)) || self.filter.allows(&diff_channel(pair))
    }

    fn join_room(&mut self, channel: &str) -> Result<()> {
        decompose_channel(Exchange::Bitbank, channel)?;
        if !self.filter.allows(channel) {
            debug!(channel, "Ignoring filtered subscription");
            return Ok(());
        }
        if !self.subscribed.insert(channel.to_string()) {
            return Err(StreamStateError::DuplicateSubscription(channel.to_string()));
        }
        if let Some(pair) = depth_pair(channel) {
            self.depths.entry(pair.to_string()).or_default();
        }
        info!(channel, "Subscribed to channel");
        Ok(())
    }

    fn process_room_message(&mut self, message: RoomMessage) -> Result<String> {
        let channel = message.room_name;
        if !self.filter.allows(&channel) {
            return Ok(channel);
        }
        let parts = decompose_channel(Exchange::Bitbank, &channel)?;
        let Some(pair) = parts.symbol else {
            return Ok(channel);
        };
        match parts.stream {
            STREAM_DEPTH_WHOLE => {
                let whole: DepthWhole = serde_json::from_value(message.message.data)?;
                let mut depth = DepthState::default();
                depth.apply(&whole.asks, &whole.bids, whole.timestamp);
                self.depths.insert(pair.to_string(), depth);
            }
            STREAM_DEPTH_DIFF => {
                let diff: DepthDiff = serde_json::from_value(message.message.data)?;
                let Some(depth) = self.depths.get_mut(pair) else {
                    return Err(StreamStateError::UntrackedChannel(channel.clone()));
                };
                depth.apply(&diff.asks, &diff.bids, diff.timestamp);
            }
            _ => {}
        }
        Ok(channel)
    }
}

impl Simulator for BitbankSimulator {
    fn process_send(&mut self, line: &[u8]) -> Result<String> {
        let Some(Packet::Event(payload)) = Packet::parse(line) else {
            return Ok(CHANNEL_UNKNOWN.to_string());
        };
        let (event, channel): (String, String) = serde_json::from_slice(payload)?;
        if event != EVENT_JOIN_ROOM {
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
        self.join_room(&channel)?;
        Ok(channel)
    }

    fn process_message_ws(&mut self, line: &[u8]) -> Result<String> {
        let packet = Packet::parse(line).ok_or_else(|| {
            StreamStateError::MalformedMessage(format!(
                "unknown packet type: {}",
                String::from_utf8_lossy(line)
            ))
        })?;
        let Packet::Event(payload) = packet else {
            debug!(?packet, "Control packet");
            return Ok(CHANNEL_UNKNOWN.to_string());
        };
        let RoomEvent(event, message) = serde_json::from_slice(payload)?;
        if event != EVENT_MESSAGE {
            return Err(StreamStateError::MalformedMessage(format!(
                "unexpected event '{event}'"
            )));
        }
        self.process_room_message(message)
    }

    fn process_message_channel_known(&mut self, channel: &str, line: &[u8]) -> Result<()> {
        let actual = self.process_message_ws(line)?;
        ensure_channel(channel, actual)
    }

    fn process_state(&mut self, channel: &str, line: &[u8]) -> Result<()> {
        if channel == STATE_CHANNEL_SUBSCRIBED {
            let subscribed: Vec<String> = serde_json::from_slice(line)?;
            self.subscribed.extend(
                subscribed
                    .into_iter()
                    .filter(|channel| self.filter.allows(channel)),
            );
            return Ok(());
        }
        let Some(pair) = channel
            .strip_prefix(BITBANK_PREFIX_DEPTH_WHOLE)
            .filter(|pair| !pair.is_empty())
        else {
            return Err(StreamStateError::UnsupportedChannel {
                exchange: Exchange::Bitbank.to_string(),
                channel: channel.to_string(),
            });
        };
        if !self.tracks_depth(pair) {
            return Ok(());
        }
        let depth: DepthState = serde_json::from_slice(line)?;
        self.depths.insert(pair.to_string(), depth);
        Ok(())
    }

    fn take_state_snapshot(&self) -> Result<Vec<Snapshot>> {
        self.filter.ensure_inactive()?;
        let mut snapshots = Vec::with_capacity(self.depths.len() + 1);
        snapshots.push(Snapshot::json(STATE_CHANNEL_SUBSCRIBED, &self.subscribed)?);
        for (pair, depth) in &self.depths {
            snapshots.push(Snapshot::json(whole_channel(pair), depth)?);
        }
        Ok(snapshots)
    }

    fn take_snapshot(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::with_capacity(self.subscribed.len() + self.depths.len());
        for channel in &self.subscribed {
            let payload = serde_json::to_vec(&(EVENT_JOIN_ROOM, channel))?;
            snapshots.push(Snapshot::new(channel.as_str(), event_line(&payload)));
        }
        for (pair, depth) in self.depths.iter().filter(|(_, depth)| !depth.is_unfed()) {
            let whole = DepthWhole {
                asks: depth.book.asks_ascending().map(|(p, s)| [*p, *s]).collect(),
                bids: depth.book.bids_descending().map(|(p, s)| [*p, *s]).collect(),
                timestamp: depth.timestamp,
            };
            let channel = whole_channel(pair);
            let event = RoomEvent(
                EVENT_MESSAGE.to_string(),
                RoomMessage {
                    room_name: channel.clone(),
                    message: MessageBody {
                        data: serde_json::to_value(whole)?,
                    },
                },
            );
            let payload = serde_json::to_vec(&event)?;
            snapshots.push(Snapshot::new(channel, event_line(&payload)));
        }
        Ok(snapshots)
    }
}
