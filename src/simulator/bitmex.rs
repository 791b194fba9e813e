//! Bitmex realtime API simulator.
//!
//! Only `orderBookL2` carries state. Its rows are addressed by
//! `(symbol, side, id)`; acknowledgements confirm topics such as
//! `orderBookL2:XBTUSD`, and data frames are resolved to the per-symbol
//! virtual channel `orderBookL2_XBTUSD`.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ChannelFilter, Simulator, Snapshot, ensure_channel};
use crate::channel::{CHANNEL_UNKNOWN, Exchange, STATE_CHANNEL_SUBSCRIBED};
use crate::models::bitmex::{
    OpRequest, OrderBookL2Entry, Side, SubscribeResponse, TABLE_ORDER_BOOK_L2, TableMessage,
};
use crate::{Result, StreamStateError};

const ACTION_PARTIAL: &str = "partial";
const ACTION_INSERT: &str = "insert";
const ACTION_UPDATE: &str = "update";
const ACTION_DELETE: &str = "delete";

/// Plain-text keepalive frames.
const PING: &[u8] = b"ping";
const PONG: &[u8] = b"pong";

/// A resting `orderBookL2` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2Order {
    pub price: Decimal,
    pub size: u64,
}

/// Orders of one side, by id.
pub type L2Side = BTreeMap<i64, L2Order>;

/// Both sides of one symbol's book.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct L2Book {
    pub buys: L2Side,
    pub sells: L2Side,
}

impl L2Book {
    pub fn side(&self, side: Side) -> &L2Side {
        match side {
            Side::Buy => &self.buys,
            Side::Sell => &self.sells,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buys.is_empty() && self.sells.is_empty()
    }

    fn side_mut(&mut self, side: Side) -> &mut L2Side {
        match side {
            Side::Buy => &mut self.buys,
            Side::Sell => &mut self.sells,
        }
    }
}

/// Splits `table:SYMBOL` into its parts.
fn split_topic(topic: &str) -> (&str, Option<&str>) {
    match topic.split_once(':') {
        Some((table, symbol)) => (table, Some(symbol)),
        None => (topic, None),
    }
}

fn virtual_channel(table: &str, symbol: Option<&str>) -> String {
    match symbol {
        Some(symbol) => format!("{table}_{symbol}"),
        None => table.to_string(),
    }
}

fn topic_channel(topic: &str) -> String {
    let (table, symbol) = split_topic(topic);
    virtual_channel(table, symbol)
}

/// Simulator for the Bitmex realtime API.
#[derive(Debug, Default)]
pub struct BitmexSimulator {
    /// Filters on table names.
    filter: ChannelFilter,
    /// Acknowledged topics (`table` or `table:SYMBOL`).
    subscribed: BTreeSet<String>,
    books: BTreeMap<String, L2Book>,
}

impl BitmexSimulator {
    pub fn new(filter: ChannelFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn subscribed(&self) -> &BTreeSet<String> {
        &self.subscribed
    }

    pub fn book(&self, symbol: &str) -> Option<&L2Book> {
        self.books.get(symbol)
    }

    fn process_ack(&mut self, topic: &str) -> Result<String> {
        let (table, _) = split_topic(topic);
        let channel = topic_channel(topic);
        if !self.filter.allows(table) {
            debug!(topic, "Ignoring filtered subscription");
            return Ok(channel);
        }
        if !self.subscribed.insert(topic.to_string()) {
            return Err(StreamStateError::DuplicateSubscription(topic.to_string()));
        }
        info!(channel = %channel, "Subscribed to channel");
        Ok(channel)
    }

    fn process_table(&mut self, message: TableMessage<Value>) -> Result<String> {
        if message.table != TABLE_ORDER_BOOK_L2 {
            let symbols = match &message.data {
                Value::Array(rows) => rows
                    .iter()
                    .filter_map(|row| row.get("symbol").and_then(Value::as_str))
                    .collect(),
                _ => BTreeSet::new(),
            };
            return Ok(resolve_channel(&message.table, &symbols));
        }
        let entries: Vec<OrderBookL2Entry> = serde_json::from_value(message.data)?;
        let symbols: BTreeSet<&str> = entries.iter().map(|e| e.symbol.as_str()).collect();
        let channel = resolve_channel(&message.table, &symbols);
        if self.filter.allows(&message.table) {
            self.apply(&message.action, entries)?;
        }
        Ok(channel)
    }

    fn apply(&mut self, action: &str, entries: Vec<OrderBookL2Entry>) -> Result<()> {
        match action {
            ACTION_PARTIAL => {
                let symbols: BTreeSet<&String> = entries.iter().map(|e| &e.symbol).collect();
                for symbol in symbols {
                    self.books.remove(symbol);
                }
                entries.into_iter().try_for_each(|entry| self.insert(entry))
            }
            ACTION_INSERT => entries.into_iter().try_for_each(|entry| self.insert(entry)),
            ACTION_UPDATE => entries.into_iter().try_for_each(|entry| self.update(entry)),
            ACTION_DELETE => {
                for entry in entries {
                    let Some(book) = self.books.get_mut(&entry.symbol) else {
                        continue;
                    };
                    book.side_mut(entry.side).remove(&entry.id);
                    if book.is_empty() {
                        self.books.remove(&entry.symbol);
                    }
                }
                Ok(())
            }
            other => Err(StreamStateError::MalformedMessage(format!(
                "unknown action '{other}'"
            ))),
        }
    }

    fn insert(&mut self, entry: OrderBookL2Entry) -> Result<()> {
        let (Some(price), Some(size)) = (entry.price, entry.size) else {
            return Err(StreamStateError::MalformedMessage(format!(
                "{} order {} inserted without price or size",
                entry.symbol, entry.id
            )));
        };
        let book = self.books.entry(entry.symbol.clone()).or_default();
        book.side_mut(entry.side).insert(entry.id, L2Order { price, size });

        let opposite = entry.side.opposite();
        let crossed: Vec<i64> = book
            .side(opposite)
            .iter()
            .filter(|(_, order)| match entry.side {
                Side::Buy => order.price < price,
                Side::Sell => order.price > price,
            })
            .map(|(id, _)| *id)
            .collect();
        for id in crossed {
            if let Some(evicted) = book.side_mut(opposite).remove(&id) {
                warn!(
                    symbol = %entry.symbol,
                    id,
                    price = %evicted.price,
                    size = evicted.size,
                    incoming_price = %price,
                    "Evicted crossed order"
                );
            }
        }
        Ok(())
    }

    fn update(&mut self, entry: OrderBookL2Entry) -> Result<()> {
        let Some(size) = entry.size else {
            return Err(StreamStateError::MalformedMessage(format!(
                "{} order {} updated without size",
                entry.symbol, entry.id
            )));
        };
        let order = self
            .books
            .get_mut(&entry.symbol)
            .and_then(|book| book.side_mut(entry.side).get_mut(&entry.id));
        // the price of a row is fixed by its id
        match order {
            Some(order) => order.size = size,
            None => warn!(symbol = %entry.symbol, id = entry.id, "Update for unknown order"),
        }
        Ok(())
    }

    fn entries(&self, symbol: &str, book: &L2Book) -> Vec<OrderBookL2Entry> {
        [Side::Buy, Side::Sell]
            .into_iter()
            .flat_map(|side| {
                book.side(side).iter().map(move |(id, order)| OrderBookL2Entry {
                    symbol: symbol.to_string(),
                    id: *id,
                    side,
                    price: Some(order.price),
                    size: Some(order.size),
                })
            })
            .collect()
    }

    fn all_entries(&self) -> Vec<OrderBookL2Entry> {
        self.books
            .iter()
            .flat_map(|(symbol, book)| self.entries(symbol, book))
            .collect()
    }
}

/// Names the channel of a data frame: the per-symbol virtual channel when
/// every row concerns one symbol, otherwise the table.
fn resolve_channel(table: &str, symbols: &BTreeSet<&str>) -> String {
    match symbols.len() {
        1 => virtual_channel(table, symbols.first().copied()),
        _ => table.to_string(),
    }
}

impl Simulator for BitmexSimulator {
    fn process_send(&mut self, line: &[u8]) -> Result<String> {
        if line == PING {
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
        let request: OpRequest = serde_json::from_slice(line)?;
        match (request.op.as_str(), request.args.as_slice()) {
            ("subscribe", [topic]) => Ok(topic_channel(topic)),
            _ => Ok(CHANNEL_UNKNOWN.to_string()),
        }
    }

    fn process_message_ws(&mut self, line: &[u8]) -> Result<String> {
        if line == PONG {
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
        let value: Value = serde_json::from_slice(line)?;
        if value.get("table").is_some() {
            let message: TableMessage<Value> = serde_json::from_value(value)?;
            return self.process_table(message);
        }
        if value.get("success").and_then(Value::as_bool) == Some(true) {
            if let Some(topic) = value.get("subscribe").and_then(Value::as_str) {
                return self.process_ack(topic);
            }
            debug!(%value, "Ignoring acknowledgement");
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
        if let Some(error) = value.get("error") {
            warn!(%error, "Error frame");
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
        if value.get("info").is_some() {
            debug!(%value, "Info frame");
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
        Err(StreamStateError::MalformedMessage(format!(
            "unrecognized frame: {value}"
        )))
    }

    fn process_message_channel_known(&mut self, channel: &str, line: &[u8]) -> Result<()> {
        let actual = self.process_message_ws(line)?;
        ensure_channel(channel, actual)
    }

    fn process_state(&mut self, channel: &str, line: &[u8]) -> Result<()> {
        match channel {
            STATE_CHANNEL_SUBSCRIBED => {
                let topics: Vec<String> = serde_json::from_slice(line)?;
                for topic in topics {
                    if self.filter.allows(split_topic(&topic).0) {
                        self.subscribed.insert(topic);
                    }
                }
                Ok(())
            }
            TABLE_ORDER_BOOK_L2 => {
                if !self.filter.allows(TABLE_ORDER_BOOK_L2) {
                    return Ok(());
                }
                let entries: Vec<OrderBookL2Entry> = serde_json::from_slice(line)?;
                self.apply(ACTION_PARTIAL, entries)
            }
            _ => Err(StreamStateError::UnsupportedChannel {
                exchange: Exchange::Bitmex.to_string(),
                channel: channel.to_string(),
            }),
        }
    }

    fn take_state_snapshot(&self) -> Result<Vec<Snapshot>> {
        self.filter.ensure_inactive()?;
        Ok(vec![
            Snapshot::json(STATE_CHANNEL_SUBSCRIBED, &self.subscribed)?,
            Snapshot::json(TABLE_ORDER_BOOK_L2, &self.all_entries())?,
        ])
    }

    fn take_snapshot(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::with_capacity(self.subscribed.len() + self.books.len());
        for topic in &self.subscribed {
            snapshots.push(Snapshot::json(
                topic_channel(topic),
                &SubscribeResponse::new(topic),
            )?);
        }
        let has_book_topic = self
            .subscribed
            .iter()
            .any(|topic| split_topic(topic).0 == TABLE_ORDER_BOOK_L2);
        if !has_book_topic {
            return Ok(snapshots);
        }
        for (symbol, book) in &self.books {
            let partial = TableMessage {
                table: TABLE_ORDER_BOOK_L2.to_string(),
                action: ACTION_PARTIAL.to_string(),
                data: self.entries(symbol, book),
            };
            snapshots.push(Snapshot::json(
                virtual_channel(TABLE_ORDER_BOOK_L2, Some(symbol)),
                &partial,
            )?);
        }
        Ok(snapshots)
    }
}
