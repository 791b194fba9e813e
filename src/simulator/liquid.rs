//! Liquid (Pusher) simulator.
//!
//! `price_ladders_cash_<pair>_<side>` events carry the whole ladder of one
//! side as a JSON-encoded string, so every event replaces that side.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, info};

use super::{ChannelFilter, Simulator, Snapshot, ensure_channel};
use crate::book::{PriceLevels, apply_level};
use crate::channel::{
    CHANNEL_UNKNOWN, Exchange, LIQUID_PREFIX_LADDERS_CASH, STATE_CHANNEL_SUBSCRIBED,
    decompose_channel,
};
use crate::models::StringLevel;
use crate::models::liquid::{
    EVENT_CONNECTION_ESTABLISHED, EVENT_SUBSCRIBE, EVENT_SUBSCRIPTION_SUCCEEDED, EVENT_UPDATED,
    MessageRoot, SubscribeData,
};
use crate::{Result, StreamStateError};

const PUSHER_EVENT_PREFIX: &str = "pusher";

fn is_ladder_channel(channel: &str) -> bool {
    channel.starts_with(LIQUID_PREFIX_LADDERS_CASH)
        && decompose_channel(Exchange::Liquid, channel).is_ok()
}

fn ladder_from_levels(levels: Vec<StringLevel>) -> PriceLevels {
    let mut ladder = PriceLevels::new();
    for [price, size] in levels {
        apply_level(&mut ladder, price, size);
    }
    ladder
}

/// Levels of a ladder in the order Liquid sends them: buys best (highest)
/// first, sells best (lowest) first.
fn ladder_levels(channel: &str, ladder: &PriceLevels) -> Vec<StringLevel> {
    let levels = ladder.iter().map(|(price, size)| [*price, *size]);
    if channel.ends_with("_buy") {
        levels.rev().collect()
    } else {
        levels.collect()
    }
}

/// Simulator for the Liquid Pusher feed.
#[derive(Debug, Default)]
pub struct LiquidSimulator {
    filter: ChannelFilter,
    subscribed: BTreeSet<String>,
    /// One side ladder per `price_ladders_cash_*` channel.
    ladders: BTreeMap<String, PriceLevels>,
}

impl LiquidSimulator {
    pub fn new(filter: ChannelFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn subscribed(&self) -> &BTreeSet<String> {
        &self.subscribed
    }

    pub fn ladder(&self, channel: &str) -> Option<&PriceLevels> {
        self.ladders.get(channel)
    }

    fn subscribe(&mut self, channel: String) -> Result<String> {
        if !self.filter.allows(&channel) {
            debug!(channel = %channel, "Ignoring filtered subscription");
            return Ok(channel);
        }
        if !self.subscribed.insert(channel.clone()) {
            return Err(StreamStateError::DuplicateSubscription(channel));
        }
        info!(channel = %channel, "Subscribed to channel");
        Ok(channel)
    }

    fn process_ladder(&mut self, channel: &str, data: Option<Value>) -> Result<()> {
        let levels: Vec<StringLevel> = match data {
            Some(Value::String(encoded)) => serde_json::from_str(&encoded)?,
            Some(value) => serde_json::from_value(value)?,
            None => {
                return Err(StreamStateError::MalformedMessage(format!(
                    "{channel}: ladder event without data"
                )));
            }
        };
        self.ladders
            .insert(channel.to_string(), ladder_from_levels(levels));
        Ok(())
    }
}

impl Simulator for LiquidSimulator {
    fn process_send(&mut self, line: &[u8]) -> Result<String> {
        let root: MessageRoot = serde_json::from_slice(line)?;
        if root.event != EVENT_SUBSCRIBE {
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
        let data = root.data.ok_or_else(|| {
            StreamStateError::MalformedMessage("subscribe without data".to_string())
        })?;
        let subscribe: SubscribeData = serde_json::from_value(data)?;
        Ok(subscribe.channel)
    }

    fn process_message_ws(&mut self, line: &[u8]) -> Result<String> {
        let root: MessageRoot = serde_json::from_slice(line)?;
        if root.event == EVENT_SUBSCRIPTION_SUCCEEDED {
            let channel = root.channel.ok_or_else(|| {
                StreamStateError::MalformedMessage("subscription without channel".to_string())
            })?;
            return self.subscribe(channel);
        }
        if root.event == EVENT_CONNECTION_ESTABLISHED || root.event.starts_with(PUSHER_EVENT_PREFIX)
        {
            debug!(event = %root.event, "Control event");
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
        let Some(channel) = root.channel else {
            return Err(StreamStateError::MalformedMessage(format!(
                "event '{}' without channel",
                root.event
            )));
        };
        if is_ladder_channel(&channel) && self.filter.allows(&channel) {
            self.process_ladder(&channel, root.data)?;
        }
        Ok(channel)
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
        if !is_ladder_channel(channel) {
            return Err(StreamStateError::UnsupportedChannel {
                exchange: Exchange::Liquid.to_string(),
                channel: channel.to_string(),
            });
        }
        if !self.filter.allows(channel) {
            return Ok(());
        }
        let levels: Vec<StringLevel> = serde_json::from_slice(line)?;
        self.ladders
            .insert(channel.to_string(), ladder_from_levels(levels));
        Ok(())
    }

    fn take_state_snapshot(&self) -> Result<Vec<Snapshot>> {
        self.filter.ensure_inactive()?;
        let mut snapshots = Vec::with_capacity(self.ladders.len() + 1);
        snapshots.push(Snapshot::json(STATE_CHANNEL_SUBSCRIBED, &self.subscribed)?);
        for (channel, ladder) in &self.ladders {
            snapshots.push(Snapshot::json(
                channel.as_str(),
                &ladder_levels(channel, ladder),
            )?);
        }
        Ok(snapshots)
    }

    fn take_snapshot(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::with_capacity(self.subscribed.len() + self.ladders.len());
        for channel in &self.subscribed {
            let data = serde_json::to_value(SubscribeData {
                channel: channel.clone(),
            })?;
            let root = MessageRoot {
                channel: Some(channel.clone()),
                data: Some(data),
                event: EVENT_SUBSCRIPTION_SUCCEEDED.to_string(),
            };
            snapshots.push(Snapshot::json(channel.as_str(), &root)?);
        }
        for (channel, ladder) in &self.ladders {
            let encoded = serde_json::to_string(&ladder_levels(channel, ladder))?;
            let root = MessageRoot {
                channel: Some(channel.clone()),
                data: Some(Value::String(encoded)),
                event: EVENT_UPDATED.to_string(),
            };
            snapshots.push(Snapshot::json(channel.as_str(), &root)?);
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    const LADDER: &str = "price_ladders_cash_btcjpy_buy";

    fn ladder_line(channel: &str, levels: &str) -> Vec<u8> {
        let data = serde_json::to_string(levels).unwrap();
        format!(r#"{{"channel":"{channel}","data":{data},"event":"updated"}}"#).into_bytes()
    }

    fn subscribed_simulator() -> LiquidSimulator {
        let mut simulator = LiquidSimulator::new(ChannelFilter::all());
        let line = format!(
            r#"{{"channel":"{LADDER}","data":{{}},"event":"pusher_internal:subscription_succeeded"}}"#
        );
        assert_eq!(simulator.process_message_ws(line.as_bytes()).unwrap(), LADDER);
        simulator
    }

    #[test]
    fn send_names_channel() {
        let mut simulator = LiquidSimulator::new(ChannelFilter::all());
        let channel = simulator
            .process_send(br#"{"event":"pusher:subscribe","data":{"channel":"executions_cash_btcjpy"}}"#)
            .unwrap();
        assert_eq!(channel, "executions_cash_btcjpy");
    }

    #[test]
    fn control_events_are_unknown() {
        let mut simulator = LiquidSimulator::new(ChannelFilter::all());
        for line in [
            &br#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"1.2\",\"activity_timeout\":120}"}"#[..],
            br#"{"event":"pusher:pong","data":{}}"#,
        ] {
            assert_eq!(simulator.process_message_ws(line).unwrap(), CHANNEL_UNKNOWN);
        }
    }

    #[test]
    fn every_event_replaces_the_ladder() {
        let mut simulator = subscribed_simulator();
        simulator
            .process_message_ws(&ladder_line(LADDER, r#"[["4500000.0","0.5"],["4499990.0","1.0"]]"#))
            .unwrap();
        assert_eq!(simulator.ladder(LADDER).unwrap().len(), 2);

        let channel = simulator
            .process_message_ws(&ladder_line(LADDER, r#"[["4500010.0","0.2"]]"#))
            .unwrap();
        assert_eq!(channel, LADDER);
        let ladder = simulator.ladder(LADDER).unwrap();
        assert_eq!(ladder.len(), 1);
        assert_eq!(ladder.get(&dec!(4500010)), Some(&dec!(0.2)));
    }

    #[test]
    fn duplicate_subscription_is_rejected() {
        let mut simulator = subscribed_simulator();
        let line = format!(
            r#"{{"channel":"{LADDER}","data":{{}},"event":"pusher_internal:subscription_succeeded"}}"#
        );
        let err = simulator.process_message_ws(line.as_bytes()).unwrap_err();
        assert!(matches!(err, StreamStateError::DuplicateSubscription(_)));
    }

    #[test]
    fn replay_re_encodes_ladder_best_first() {
        let mut simulator = subscribed_simulator();
        simulator
            .process_message_ws(&ladder_line(LADDER, r#"[["4499990.0","1.0"],["4500000.0","0.5"]]"#))
            .unwrap();

        let snapshots = simulator.take_snapshot().unwrap();
        assert_eq!(snapshots.len(), 2);
        let ack: MessageRoot = serde_json::from_slice(&snapshots[0].payload).unwrap();
        assert_eq!(ack.event, EVENT_SUBSCRIPTION_SUCCEEDED);

        let update: MessageRoot = serde_json::from_slice(&snapshots[1].payload).unwrap();
        let Some(Value::String(encoded)) = update.data else {
            panic!("ladder data must be a string");
        };
        assert_eq!(encoded, r#"[["4500000.0","0.5"],["4499990.0","1.0"]]"#);
    }

    #[test]
    fn state_round_trip() {
        let mut simulator = subscribed_simulator();
        simulator
            .process_message_ws(&ladder_line(LADDER, r#"[["4500000.0","0.5"]]"#))
            .unwrap();

        let snapshots = simulator.take_state_snapshot().unwrap();
        let mut restored = LiquidSimulator::new(ChannelFilter::all());
        restored.restore(&snapshots).unwrap();
        assert_eq!(restored.subscribed(), simulator.subscribed());
        assert_eq!(restored.ladder(LADDER), simulator.ladder(LADDER));
    }
}
