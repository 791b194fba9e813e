//! Bitfinex websocket v2 simulator.
//!
//! Data frames are `[chanId, payload]` arrays that only name the numeric
//! channel id assigned in the `subscribed` event, so the simulator keeps an
//! id → channel table. Book payloads come in three shapes: a list of
//! orders, a single flattened order, or a control string (`hb`, `cs`).

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ChannelFilter, Simulator, Snapshot, ensure_channel};
use crate::channel::{CHANNEL_UNKNOWN, Exchange, STATE_CHANNEL_SUBSCRIBED, decompose_channel};
use crate::models::bitfinex::{
    BookOrder, EVENT_SUBSCRIBE, EVENT_SUBSCRIBED, EventMessage, FRAME_CHECKSUM, FRAME_HEARTBEAT,
    SubscribeRequest, SubscribedEvent,
};
use crate::{Result, StreamStateError};

const STREAM_BOOK: &str = "book";

/// A book payload after shape normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookFrame {
    Heartbeat,
    Checksum,
    Orders(Vec<BookOrder>),
}

/// Normalizes the payload of a book frame.
///
/// A scalar first element means the exchange flattened a single order; an
/// array first element means a list of orders.
pub fn parse_book_frame(payload: &Value) -> Result<BookFrame> {
    match payload {
        Value::String(s) if s == FRAME_HEARTBEAT => Ok(BookFrame::Heartbeat),
        Value::String(s) if s == FRAME_CHECKSUM => Ok(BookFrame::Checksum),
        Value::Array(items) => match items.first() {
            None => Ok(BookFrame::Orders(Vec::new())),
            Some(Value::Number(_)) => Ok(BookFrame::Orders(vec![BookOrder::deserialize(payload)?])),
            Some(Value::Array(_)) => Ok(BookFrame::Orders(Vec::<BookOrder>::deserialize(payload)?)),
            Some(other) => Err(StreamStateError::MalformedMessage(format!(
                "unexpected book element: {other}"
            ))),
        },
        other => Err(StreamStateError::MalformedMessage(format!(
            "unexpected book payload: {other}"
        ))),
    }
}

/// Resting level of a price-keyed Bitfinex book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookEntry {
    pub count: u64,
    /// Positive for bids, negative for asks.
    pub amount: Decimal,
}

/// One channel's book, keyed by price.
pub type Book = BTreeMap<Decimal, BookEntry>;

fn apply_orders(channel: &str, book: &mut Book, orders: &[BookOrder]) {
    for order in orders {
        let price = order.price();
        if order.count() == 0 {
            book.remove(&price);
            continue;
        }
        let amount = order.amount();
        book.insert(
            price,
            BookEntry {
                count: order.count(),
                amount,
            },
        );

        let crossed: Vec<Decimal> = book
            .iter()
            .filter(|(resting_price, resting)| {
                (amount > Decimal::ZERO && resting.amount < Decimal::ZERO && **resting_price < price)
                    || (amount < Decimal::ZERO
                        && resting.amount > Decimal::ZERO
                        && **resting_price > price)
            })
            .map(|(resting_price, _)| *resting_price)
            .collect();
        for resting_price in crossed {
            if let Some(evicted) = book.remove(&resting_price) {
                warn!(
                    channel,
                    price = %resting_price,
                    amount = %evicted.amount,
                    incoming_price = %price,
                    incoming_amount = %amount,
                    "Evicted crossed order"
                );
            }
        }
    }
}

fn book_orders(book: &Book) -> Vec<BookOrder> {
    book.iter()
        .map(|(price, entry)| BookOrder(*price, entry.count, entry.amount))
        .collect()
}

fn is_book_channel(channel: &str) -> bool {
    decompose_channel(Exchange::Bitfinex, channel).is_ok_and(|parts| parts.stream == STREAM_BOOK)
}

/// Replay form of a book: flattened when it holds exactly one order.
#[derive(Serialize)]
#[serde(untagged)]
enum BookPayload {
    Single(BookOrder),
    Many(Vec<BookOrder>),
}

/// Simulator for Bitfinex websocket v2.
#[derive(Debug, Default)]
pub struct BitfinexSimulator {
    filter: ChannelFilter,
    /// Every acknowledged channel id, tracked or not.
    channels: BTreeMap<i64, String>,
    /// Tracked channels and their ids.
    subscribed: BTreeMap<String, i64>,
    /// Books by channel.
    books: BTreeMap<String, Book>,
}

impl BitfinexSimulator {
    pub fn new(filter: ChannelFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn subscribed(&self) -> &BTreeMap<String, i64> {
        &self.subscribed
    }

    pub fn book(&self, channel: &str) -> Option<&Book> {
        self.books.get(channel)
    }

    fn register(&mut self, channel: String, chan_id: i64) -> Result<()> {
        self.channels.insert(chan_id, channel.clone());
        if !self.filter.allows(&channel) {
            debug!(channel = %channel, chan_id, "Ignoring filtered subscription");
            return Ok(());
        }
        if self.subscribed.contains_key(&channel) {
            return Err(StreamStateError::DuplicateSubscription(channel));
        }
        if is_book_channel(&channel) {
            self.books.entry(channel.clone()).or_default();
        }
        self.subscribed.insert(channel, chan_id);
        Ok(())
    }

    fn process_event(&mut self, event: EventMessage) -> Result<String> {
        match event.event.as_str() {
            EVENT_SUBSCRIBED => {
                let (Some(stream), Some(chan_id), Some(symbol)) =
                    (event.channel, event.chan_id, event.symbol)
                else {
                    return Err(StreamStateError::MalformedMessage(
                        "subscribed event without channel, chanId or symbol".to_string(),
                    ));
                };
                let channel = format!("{stream}_{symbol}");
                self.register(channel.clone(), chan_id)?;
                info!(channel = %channel, chan_id, "Subscribed to channel");
                Ok(channel)
            }
            "error" => {
                warn!(code = ?event.code, msg = ?event.msg, "Error event");
                Ok(CHANNEL_UNKNOWN.to_string())
            }
            other => {
                debug!(event = other, "Ignoring event");
                Ok(CHANNEL_UNKNOWN.to_string())
            }
        }
    }

    fn process_frame(&mut self, items: &[Value]) -> Result<String> {
        let (Some(chan_id), Some(payload)) = (items.first().and_then(Value::as_i64), items.get(1))
        else {
            return Err(StreamStateError::MalformedMessage(
                "data frame without channel id and payload".to_string(),
            ));
        };
        let channel = self
            .channels
            .get(&chan_id)
            .cloned()
            .ok_or_else(|| StreamStateError::UntrackedChannel(chan_id.to_string()))?;
        if payload.as_str() == Some(FRAME_HEARTBEAT) {
            debug!(channel = %channel, "Heartbeat");
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
        if !is_book_channel(&channel) {
            return Ok(channel);
        }
        let orders = match parse_book_frame(payload)? {
            BookFrame::Heartbeat | BookFrame::Checksum => {
                debug!(channel = %channel, "Control frame");
                return Ok(CHANNEL_UNKNOWN.to_string());
            }
            BookFrame::Orders(orders) => orders,
        };
        if self.subscribed.contains_key(&channel) {
            let book = self.books.entry(channel.clone()).or_default();
            apply_orders(&channel, book, &orders);
        }
        Ok(channel)
    }
}

impl Simulator for BitfinexSimulator {
    fn process_send(&mut self, line: &[u8]) -> Result<String> {
        let value: Value = serde_json::from_slice(line)?;
        if value.get("event").and_then(Value::as_str) != Some(EVENT_SUBSCRIBE) {
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
        let request: SubscribeRequest = serde_json::from_value(value)?;
        Ok(format!("{}_{}", request.channel, request.symbol))
    }

    fn process_message_ws(&mut self, line: &[u8]) -> Result<String> {
        let value: Value = serde_json::from_slice(line)?;
        match value {
            Value::Array(items) => self.process_frame(&items),
            Value::Object(_) => {
                let event: EventMessage = serde_json::from_value(value)?;
                self.process_event(event)
            }
            other => Err(StreamStateError::MalformedMessage(format!(
                "unexpected frame: {other}"
            ))),
        }
    }

    fn process_message_channel_known(&mut self, channel: &str, line: &[u8]) -> Result<()> {
        let actual = self.process_message_ws(line)?;
        ensure_channel(channel, actual)
    }

    fn process_state(&mut self, channel: &str, line: &[u8]) -> Result<()> {
        if channel == STATE_CHANNEL_SUBSCRIBED {
            let subscribed: BTreeMap<String, i64> = serde_json::from_slice(line)?;
            for (channel, chan_id) in subscribed {
                self.register(channel, chan_id)?;
            }
            return Ok(());
        }
        if !is_book_channel(channel) {
            return Err(StreamStateError::UnsupportedChannel {
                exchange: Exchange::Bitfinex.to_string(),
                channel: channel.to_string(),
            });
        }
        if !self.filter.allows(channel) {
            return Ok(());
        }
        let orders: Vec<BookOrder> = serde_json::from_slice(line)?;
        let mut book = Book::new();
        apply_orders(channel, &mut book, &orders);
        self.books.insert(channel.to_string(), book);
        Ok(())
    }

    fn take_state_snapshot(&self) -> Result<Vec<Snapshot>> {
        self.filter.ensure_inactive()?;
        let mut snapshots = Vec::with_capacity(self.books.len() + 1);
        snapshots.push(Snapshot::json(STATE_CHANNEL_SUBSCRIBED, &self.subscribed)?);
        for (channel, book) in &self.books {
            snapshots.push(Snapshot::json(channel.as_str(), &book_orders(book))?);
        }
        Ok(snapshots)
    }

    fn take_snapshot(&self) -> Result<Vec<Snapshot>> {
        let mut by_id: Vec<(i64, &String)> = self
            .subscribed
            .iter()
            .map(|(channel, chan_id)| (*chan_id, channel))
            .collect();
        by_id.sort();

        let mut snapshots = Vec::with_capacity(by_id.len() + self.books.len());
        for (chan_id, channel) in by_id {
            let parts = decompose_channel(Exchange::Bitfinex, channel)?;
            let symbol = parts.symbol.unwrap_or_default();
            snapshots.push(Snapshot::json(
                channel.as_str(),
                &SubscribedEvent::new(chan_id, parts.stream, symbol),
            )?);
        }
        for (channel, book) in &self.books {
            let chan_id = *self
                .subscribed
                .get(channel)
                .ok_or_else(|| StreamStateError::UntrackedChannel(channel.clone()))?;
            let mut orders = book_orders(book);
            let payload = if orders.len() == 1 {
                BookPayload::Single(orders.remove(0))
            } else {
                BookPayload::Many(orders)
            };
            snapshots.push(Snapshot::json(channel.as_str(), &(chan_id, payload))?);
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    const SUBSCRIBED_BOOK: &[u8] = br#"{"event":"subscribed","channel":"book","chanId":17082,"symbol":"tBTCUSD","prec":"P0","freq":"F0","len":"25","pair":"BTCUSD"}"#;

    fn subscribed_simulator() -> BitfinexSimulator {
        let mut simulator = BitfinexSimulator::new(ChannelFilter::all());
        let channel = simulator.process_message_ws(SUBSCRIBED_BOOK).unwrap();
        assert_eq!(channel, "book_tBTCUSD");
        simulator
    }

    #[test]
    fn frame_shapes_are_normalized() {
        let single: Value = serde_json::from_str("[7254.7,3,3.3]").unwrap();
        assert_eq!(
            parse_book_frame(&single).unwrap(),
            BookFrame::Orders(vec![BookOrder(dec!(7254.7), 3, dec!(3.3))])
        );

        let many: Value = serde_json::from_str("[[7254.7,3,3.3],[7255,1,-2]]").unwrap();
        let BookFrame::Orders(orders) = parse_book_frame(&many).unwrap() else {
            panic!("expected orders");
        };
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1].amount(), dec!(-2));

        assert_eq!(parse_book_frame(&Value::from("hb")).unwrap(), BookFrame::Heartbeat);
        assert_eq!(parse_book_frame(&Value::from("cs")).unwrap(), BookFrame::Checksum);
        assert!(parse_book_frame(&Value::from("te")).is_err());
        assert!(parse_book_frame(&serde_json::json!([{"price": 1}])).is_err());
    }

    #[test]
    fn flattened_and_list_updates_apply() {
        let mut simulator = subscribed_simulator();
        simulator
            .process_message_ws(b"[17082,[[100,1,2],[101,2,-1.5]]]")
            .unwrap();
        let channel = simulator.process_message_ws(b"[17082,[99.5,1,4]]").unwrap();
        assert_eq!(channel, "book_tBTCUSD");

        let book = simulator.book("book_tBTCUSD").unwrap();
        assert_eq!(book.len(), 3);
        assert_eq!(book[&dec!(101)].amount, dec!(-1.5));

        simulator.process_message_ws(b"[17082,[101,0,-1]]").unwrap();
        assert!(!simulator.book("book_tBTCUSD").unwrap().contains_key(&dec!(101)));
    }

    #[test]
    fn crossed_asks_are_evicted_by_amount_sign() {
        let mut simulator = subscribed_simulator();
        simulator
            .process_message_ws(b"[17082,[[100,1,2],[101,1,-1],[102,1,-1]]]")
            .unwrap();
        // bid at 101.5 crosses the ask resting at 101
        simulator.process_message_ws(b"[17082,[101.5,1,1]]").unwrap();

        let book = simulator.book("book_tBTCUSD").unwrap();
        let prices: Vec<_> = book.keys().copied().collect();
        assert_eq!(prices, vec![dec!(100), dec!(101.5), dec!(102)]);
    }

    #[test]
    fn heartbeat_and_checksum_are_unknown() {
        let mut simulator = subscribed_simulator();
        simulator.process_message_ws(b"[17082,[100,1,2]]").unwrap();
        let before = simulator.book("book_tBTCUSD").cloned();

        assert_eq!(
            simulator.process_message_ws(br#"[17082,"hb"]"#).unwrap(),
            CHANNEL_UNKNOWN
        );
        assert_eq!(
            simulator.process_message_ws(br#"[17082,"cs",-1234567]"#).unwrap(),
            CHANNEL_UNKNOWN
        );
        assert_eq!(simulator.book("book_tBTCUSD").cloned(), before);
    }

    #[test]
    fn events_resolve_to_unknown() {
        let mut simulator = BitfinexSimulator::new(ChannelFilter::all());
        for line in [
            &br#"{"event":"info","version":2,"serverId":"abc","platform":{"status":1}}"#[..],
            br#"{"event":"error","msg":"symbol: invalid","code":10300,"channel":"book","symbol":"tFOO"}"#,
            br#"{"event":"conf","status":"OK"}"#,
        ] {
            assert_eq!(simulator.process_message_ws(line).unwrap(), CHANNEL_UNKNOWN);
        }
        assert!(simulator.subscribed().is_empty());
    }

    #[test]
    fn data_for_unregistered_id_is_an_error() {
        let mut simulator = subscribed_simulator();
        let err = simulator.process_message_ws(b"[5,[100,1,2]]").unwrap_err();
        assert!(matches!(err, StreamStateError::UntrackedChannel(id) if id == "5"));
    }

    #[test]
    fn send_names_channel() {
        let mut simulator = BitfinexSimulator::new(ChannelFilter::all());
        let channel = simulator
            .process_send(br#"{"event":"subscribe","channel":"trades","symbol":"tBTCUSD"}"#)
            .unwrap();
        assert_eq!(channel, "trades_tBTCUSD");
        assert_eq!(
            simulator.process_send(br#"{"event":"ping","cid":1}"#).unwrap(),
            CHANNEL_UNKNOWN
        );
    }

    #[test]
    fn duplicate_subscription_is_rejected() {
        let mut simulator = subscribed_simulator();
        let err = simulator.process_message_ws(SUBSCRIBED_BOOK).unwrap_err();
        assert!(matches!(err, StreamStateError::DuplicateSubscription(_)));
    }

    #[test]
    fn replay_flattens_single_order_books() {
        let mut simulator = subscribed_simulator();
        simulator.process_message_ws(b"[17082,[[100,1,2]]]").unwrap();

        let snapshots = simulator.take_snapshot().unwrap();
        assert_eq!(snapshots.len(), 2);
        let subscribed: Value = serde_json::from_slice(&snapshots[0].payload).unwrap();
        assert_eq!(
            subscribed,
            serde_json::json!({
                "event": "subscribed",
                "channel": "book",
                "chanId": 17082,
                "symbol": "tBTCUSD",
                "pair": "BTCUSD"
            })
        );
        let book: Value = serde_json::from_slice(&snapshots[1].payload).unwrap();
        assert_eq!(book, serde_json::json!([17082, [100.0, 1, 2.0]]));

        simulator.process_message_ws(b"[17082,[99,2,1]]").unwrap();
        let snapshots = simulator.take_snapshot().unwrap();
        let book: Value = serde_json::from_slice(&snapshots[1].payload).unwrap();
        assert_eq!(book, serde_json::json!([17082, [[99.0, 2, 1.0], [100.0, 1, 2.0]]]));
    }

    #[test]
    fn state_round_trip() {
        let mut simulator = subscribed_simulator();
        simulator
            .process_message_ws(br#"{"event":"subscribed","channel":"trades","chanId":9,"symbol":"tBTCUSD","pair":"BTCUSD"}"#)
            .unwrap();
        simulator
            .process_message_ws(b"[17082,[[100,1,2],[101,2,-1.5]]]")
            .unwrap();

        let snapshots = simulator.take_state_snapshot().unwrap();
        let mut restored = BitfinexSimulator::new(ChannelFilter::all());
        restored.restore(&snapshots).unwrap();
        assert_eq!(restored.subscribed(), simulator.subscribed());
        assert_eq!(restored.book("book_tBTCUSD"), simulator.book("book_tBTCUSD"));
        assert_eq!(restored.take_snapshot().unwrap(), simulator.take_snapshot().unwrap());

        // the restored id table resolves data frames
        assert_eq!(restored.process_message_ws(b"[9,[[1,1600000000000,0.5,100]]]").unwrap(), "trades_tBTCUSD");
    }

    #[test]
    fn filtered_state_ignores_other_channels() {
        let mut simulator = BitfinexSimulator::new(ChannelFilter::only(["trade_btcusd"]));
        simulator
            .process_state("book_btcusd", b"[[100,1,2]]")
            .unwrap();
        assert!(simulator.book("book_btcusd").is_none());
        assert!(matches!(
            simulator.take_state_snapshot(),
            Err(StreamStateError::FilterActive)
        ));
    }
}
