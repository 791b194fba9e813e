//! Bitflyer JSON-RPC realtime API simulator.
//!
//! Subscribe results carry only the request id. Board state comes from two
//! channels per product: `lightning_board_snapshot_<product>` replaces the
//! book, `lightning_board_<product>` updates it by price. Both feed one
//! book keyed by product code.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ChannelFilter, Simulator, Snapshot, ensure_channel};
use crate::book::PriceBook;
use crate::channel::{
    BITFLYER_PREFIX_BOARD, BITFLYER_PREFIX_BOARD_SNAPSHOT, CHANNEL_UNKNOWN, Exchange,
    STATE_CHANNEL_SUBSCRIBED, decompose_channel,
};
use crate::models::bitflyer::{
    BoardMessage, BoardOrder, ChannelMessage, METHOD_CHANNEL_MESSAGE, METHOD_SUBSCRIBE,
    RpcResponse, SubscribeRequest,
};
use crate::{Result, StreamStateError};

const STREAM_BOARD_SNAPSHOT: &str = "lightning_board_snapshot";
const STREAM_BOARD: &str = "lightning_board";

fn snapshot_channel(product: &str) -> String {
    format!("{BITFLYER_PREFIX_BOARD_SNAPSHOT}{product}")
}

fn board_channel(product: &str) -> String {
    format!("{BITFLYER_PREFIX_BOARD}{product}")
}

fn apply_board(book: &mut PriceBook, message: &BoardMessage) {
    for order in &message.asks {
        book.apply_ask(order.price, order.size);
    }
    for order in &message.bids {
        book.apply_bid(order.price, order.size);
    }
}

/// Simulator for the Bitflyer realtime API.
#[derive(Debug, Default)]
pub struct BitflyerSimulator {
    filter: ChannelFilter,
    /// Pending subscribe requests by JSON-RPC id.
    requests: HashMap<i64, String>,
    subscribed: BTreeSet<String>,
    /// Board books by product code.
    books: BTreeMap<String, PriceBook>,
}

impl BitflyerSimulator {
    pub fn new(filter: ChannelFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn subscribed(&self) -> &BTreeSet<String> {
        &self.subscribed
    }

    pub fn book(&self, product: &str) -> Option<&PriceBook> {
        self.books.get(product)
    }

    /// A product's book is kept if either board channel passes the filter.
    fn tracks_board(&self, product: &str) -> bool {
        self.filter.allows(&snapshot_channel(product)) || self.filter.allows(&board_channel(product))
    }

    fn process_response(&mut self, response: RpcResponse) -> Result<String> {
        let channel = self
            .requests
            .remove(&response.id)
            .ok_or(StreamStateError::UnknownRequestId(response.id))?;
        if !response.result {
            warn!(channel = %channel, "Subscription rejected");
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
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

    fn process_channel_message(&mut self, message: ChannelMessage<Value>) -> Result<String> {
        let channel = message.params.channel;
        let parts = decompose_channel(Exchange::Bitflyer, &channel)?;
        let (Some(product), STREAM_BOARD_SNAPSHOT | STREAM_BOARD) = (parts.symbol, parts.stream)
        else {
            return Ok(channel);
        };
        if !self.tracks_board(product) {
            return Ok(channel);
        }
        let board: BoardMessage = serde_json::from_value(message.params.message)?;
        if parts.stream == STREAM_BOARD_SNAPSHOT {
            let mut book = PriceBook::new();
            apply_board(&mut book, &board);
            self.books.insert(product.to_string(), book);
        } else if let Some(book) = self.books.get_mut(product) {
            apply_board(book, &board);
        } else {
            debug!(channel = %channel, "Ignoring board update before snapshot");
        }
        Ok(channel)
    }
}

impl Simulator for BitflyerSimulator {
    fn process_send(&mut self, line: &[u8]) -> Result<String> {
        let value: Value = serde_json::from_slice(line)?;
        if value.get("method").and_then(Value::as_str) != Some(METHOD_SUBSCRIBE) {
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
        let request: SubscribeRequest = serde_json::from_value(value)?;
        self.requests
            .insert(request.id, request.params.channel.clone());
        Ok(request.params.channel)
    }

    fn process_message_ws(&mut self, line: &[u8]) -> Result<String> {
        let value: Value = serde_json::from_slice(line)?;
        if value.get("method").and_then(Value::as_str) == Some(METHOD_CHANNEL_MESSAGE) {
            let message: ChannelMessage<Value> = serde_json::from_value(value)?;
            return self.process_channel_message(message);
        }
        if value.get("result").is_some() {
            let response: RpcResponse = serde_json::from_value(value)?;
            return self.process_response(response);
        }
        if let Some(error) = value.get("error") {
            warn!(%error, "Error response");
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
        if channel == STATE_CHANNEL_SUBSCRIBED {
            let subscribed: Vec<String> = serde_json::from_slice(line)?;
            self.subscribed.extend(
                subscribed
                    .into_iter()
                    .filter(|channel| self.filter.allows(channel)),
            );
            return Ok(());
        }
        let parts = decompose_channel(Exchange::Bitflyer, channel)?;
        let (Some(product), STREAM_BOARD_SNAPSHOT) = (parts.symbol, parts.stream) else {
            return Err(StreamStateError::UnsupportedChannel {
                exchange: Exchange::Bitflyer.to_string(),
                channel: channel.to_string(),
            });
        };
        if !self.tracks_board(product) {
            return Ok(());
        }
        let book: PriceBook = serde_json::from_slice(line)?;
        self.books.insert(product.to_string(), book);
        Ok(())
    }

    fn take_state_snapshot(&self) -> Result<Vec<Snapshot>> {
        self.filter.ensure_inactive()?;
        let mut snapshots = Vec::with_capacity(self.books.len() + 1);
        snapshots.push(Snapshot::json(STATE_CHANNEL_SUBSCRIBED, &self.subscribed)?);
        for (product, book) in &self.books {
            snapshots.push(Snapshot::json(snapshot_channel(product), book)?);
        }
        Ok(snapshots)
    }

    fn take_snapshot(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::with_capacity(self.subscribed.len() + self.books.len());
        for (id, channel) in (1..).zip(&self.subscribed) {
            snapshots.push(Snapshot::json(channel.as_str(), &RpcResponse::success(id))?);
        }
        for (product, book) in &self.books {
            let to_order = |(price, size): (&_, &_)| BoardOrder {
                price: *price,
                size: *size,
            };
            let board = BoardMessage {
                mid_price: None,
                bids: book.bids_descending().map(to_order).collect(),
                asks: book.asks_ascending().map(to_order).collect(),
            };
            let channel = snapshot_channel(product);
            let message = ChannelMessage::new(&channel, board);
            snapshots.push(Snapshot::json(channel, &message)?);
        }
        Ok(snapshots)
    }
}
