//! Exchange stream simulators.
//!
//! A [`Simulator`] consumes the lines of one captured session in log order
//! and keeps the state a live client would have had at that point: the
//! subscribed channels, the order books and any sequence cursors. The state
//! can be written out as private state lines (checkpoints) or as
//! exchange-shaped replay lines that seed a fresh consumer.

pub mod binance;
pub mod bitbank;
pub mod bitfinex;
pub mod bitflyer;
pub mod bitmex;
pub mod liquid;

use std::collections::BTreeSet;

use serde::Serialize;

use crate::channel::{Exchange, decompose_channel};
use crate::config::SimulatorConfig;
use crate::{Result, StreamStateError};

pub use binance::BinanceSimulator;
pub use bitbank::BitbankSimulator;
pub use bitfinex::BitfinexSimulator;
pub use bitflyer::BitflyerSimulator;
pub use bitmex::BitmexSimulator;
pub use liquid::LiquidSimulator;

/// One emitted line and the channel it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub channel: String,
    pub payload: Vec<u8>,
}

impl Snapshot {
    pub fn new(channel: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }

    /// Serializes `value` as the payload.
    pub(crate) fn json<T: Serialize + ?Sized>(channel: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self::new(channel, serde_json::to_vec(value)?))
    }
}

/// Optional allow-list of channels a simulator tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelFilter {
    channels: Option<BTreeSet<String>>,
}

impl ChannelFilter {
    /// A filter that tracks every channel.
    pub fn all() -> Self {
        Self::default()
    }

    /// A filter that tracks only `channels`.
    pub fn only<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: Some(channels.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.channels.is_some()
    }

    pub fn allows(&self, channel: &str) -> bool {
        self.channels
            .as_ref()
            .is_none_or(|channels| channels.contains(channel))
    }

    /// Fails with [`StreamStateError::FilterActive`] on a filtered instance.
    pub(crate) fn ensure_inactive(&self) -> Result<()> {
        if self.is_active() {
            return Err(StreamStateError::FilterActive);
        }
        Ok(())
    }
}

/// State machine shared by every exchange.
///
/// All methods must be called in the original log order. Errors are never
/// recovered internally; the caller decides whether to skip the line or
/// abort the session.
pub trait Simulator: Send {
    /// Processes the connection-start line (usually the connection URL).
    fn process_start(&mut self, _line: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Processes a client-to-server line and returns the channel it targets.
    fn process_send(&mut self, line: &[u8]) -> Result<String>;

    /// Processes a server-to-client websocket line and returns the channel
    /// it belongs to, or [`CHANNEL_UNKNOWN`](crate::channel::CHANNEL_UNKNOWN)
    /// for control frames.
    fn process_message_ws(&mut self, line: &[u8]) -> Result<String>;

    /// Processes a line whose channel is already known (REST responses).
    ///
    /// Fails with [`StreamStateError::ChannelMismatch`] if the line turns
    /// out to belong to another channel.
    fn process_message_channel_known(&mut self, channel: &str, line: &[u8]) -> Result<()>;

    /// Restores one component of state from a line emitted by
    /// [`take_state_snapshot`](Simulator::take_state_snapshot).
    fn process_state(&mut self, channel: &str, line: &[u8]) -> Result<()>;

    /// Serializes the whole state as state lines. Only defined for an
    /// unfiltered simulator.
    fn take_state_snapshot(&self) -> Result<Vec<Snapshot>>;

    /// Serializes the state as exchange-shaped replay lines.
    fn take_snapshot(&self) -> Result<Vec<Snapshot>>;

    /// Feeds every state line in `snapshots` to
    /// [`process_state`](Simulator::process_state).
    fn restore(&mut self, snapshots: &[Snapshot]) -> Result<()> {
        for snapshot in snapshots {
            self.process_state(&snapshot.channel, &snapshot.payload)?;
        }
        Ok(())
    }
}

/// Checks the channel a line resolved to against the asserted one.
pub(crate) fn ensure_channel(expected: &str, actual: String) -> Result<()> {
    if actual != expected {
        return Err(StreamStateError::ChannelMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Translates user-facing channels into the keys `exchange`'s simulator
/// filters on.
///
/// Bitmex subscriptions are acknowledged per table, so per-symbol channels
/// collapse onto their table. Other exchanges use the channels unchanged.
///
/// # Errors
///
/// Returns [`StreamStateError::UnsupportedChannel`] for a channel the
/// exchange never emits.
pub fn to_simulator_channels<S: AsRef<str>>(exchange: Exchange, channels: &[S]) -> Result<Vec<String>> {
    let mut converted = Vec::with_capacity(channels.len());
    for channel in channels {
        let channel = channel.as_ref();
        let parts = decompose_channel(exchange, channel)?;
        match exchange {
            Exchange::Bitmex => converted.push(parts.stream.to_string()),
            _ => converted.push(channel.to_string()),
        }
    }
    if exchange == Exchange::Bitmex {
        converted.sort();
        converted.dedup();
    }
    Ok(converted)
}

/// Creates the simulator for `exchange`.
///
/// `channel_filter` holds user-facing channels; `None` tracks everything.
pub fn get_simulator<S: AsRef<str>>(
    exchange: Exchange,
    channel_filter: Option<&[S]>,
    config: SimulatorConfig,
) -> Result<Box<dyn Simulator>> {
    let filter = match channel_filter {
        Some(channels) => ChannelFilter::only(to_simulator_channels(exchange, channels)?),
        None => ChannelFilter::all(),
    };
    let simulator: Box<dyn Simulator> = match exchange {
        Exchange::Bitmex => Box::new(BitmexSimulator::new(filter)),
        Exchange::Bitflyer => Box::new(BitflyerSimulator::new(filter)),
        Exchange::Bitfinex => Box::new(BitfinexSimulator::new(filter)),
        Exchange::Binance => Box::new(BinanceSimulator::new(filter, config)),
        Exchange::Liquid => Box::new(LiquidSimulator::new(filter)),
        Exchange::Bitbank => Box::new(BitbankSimulator::new(filter)),
    };
    Ok(simulator)
}

/// Like [`get_simulator`], looking the exchange up by name.
///
/// # Errors
///
/// Returns [`StreamStateError::UnsupportedExchange`] for an unknown name.
pub fn get_simulator_by_name<S: AsRef<str>>(
    exchange: &str,
    channel_filter: Option<&[S]>,
    config: SimulatorConfig,
) -> Result<Box<dyn Simulator>> {
    get_simulator(exchange.parse()?, channel_filter, config)
}
