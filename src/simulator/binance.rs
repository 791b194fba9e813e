//! Binance combined-stream simulator.
//!
//! Depth books are built from two sources that arrive in any relative
//! order: the diff stream (`<symbol>@depth`, `@depth@100ms`,
//! `@depth@1000ms`) and a REST depth response recorded on the
//! `<symbol>@rest_depth` pseudo-channel. Diffs are buffered until the REST
//! response anchors the book; from then on every diff must continue the
//! update-id sequence exactly.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::{ChannelFilter, Simulator, Snapshot, ensure_channel};
use crate::book::PriceBook;
use crate::channel::{
    BINANCE_STREAM_REST_DEPTH, CHANNEL_UNKNOWN, Exchange, STATE_CHANNEL_SUBSCRIBED,
    decompose_channel,
};
use crate::config::SimulatorConfig;
use crate::models::StringLevel;
use crate::models::binance::{
    DepthUpdate, METHOD_SUBSCRIBE, RequestResponse, RestDepth, StreamFrame, SubscribeRequest,
};
use crate::{Result, StreamStateError};

/// Streams carrying depth diffs.
const DIFF_STREAMS: [&str; 3] = ["depth", "depth@100ms", "depth@1000ms"];

fn is_diff_stream(stream: &str) -> bool {
    DIFF_STREAMS.contains(&stream)
}

/// Where a depth book is in the REST/diff synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "buffered", rename_all = "snake_case")]
pub enum SyncState {
    /// No REST response yet; diffs are held in arrival order.
    Buffering(Vec<DepthUpdate>),
    /// REST applied, no diff applied since. The next diff only has to
    /// straddle the cursor.
    Anchored,
    /// Diffs must follow the cursor exactly.
    Live,
}

/// One symbol's depth book and its update-id cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthBook {
    /// Diff stream the book was subscribed through, e.g. `depth@100ms`.
    pub stream: String,
    /// `lastUpdateId` of the REST response, then `u` of the last diff.
    pub last_final_update_id: u64,
    pub sync: SyncState,
    pub book: PriceBook,
}

impl DepthBook {
    fn new(stream: &str) -> Self {
        Self {
            stream: stream.to_string(),
            last_final_update_id: 0,
            sync: SyncState::Buffering(Vec::new()),
            book: PriceBook::new(),
        }
    }

    pub fn is_anchored(&self) -> bool {
        !matches!(self.sync, SyncState::Buffering(_))
    }

    fn push_diff(&mut self, symbol: &str, diff: DepthUpdate, limit: usize) -> Result<()> {
        if let SyncState::Buffering(buffered) = &mut self.sync {
            if buffered.len() >= limit {
                return Err(StreamStateError::BufferOverflow {
                    symbol: symbol.to_string(),
                    limit,
                });
            }
            buffered.push(diff);
            return Ok(());
        }
        self.apply_diff(symbol, &diff)
    }

    fn apply_diff(&mut self, symbol: &str, diff: &DepthUpdate) -> Result<()> {
        let gap = |expected| StreamStateError::SequenceGap {
            symbol: symbol.to_string(),
            expected,
            first_update_id: diff.first_update_id,
            final_update_id: diff.final_update_id,
        };
        // no update can follow u64::MAX
        let expected = self
            .last_final_update_id
            .checked_add(1)
            .ok_or_else(|| gap(u64::MAX))?;
        let in_sequence = match self.sync {
            SyncState::Anchored => {
                diff.first_update_id <= expected && expected <= diff.final_update_id
            }
            _ => diff.first_update_id == expected,
        };
        if !in_sequence {
            return Err(gap(expected));
        }
        apply_levels(&mut self.book, &diff.asks, &diff.bids);
        self.last_final_update_id = diff.final_update_id;
        self.sync = SyncState::Live;
        Ok(())
    }

    /// Replaces the book with `rest` and drains the diff buffer on top of it.
    fn anchor(&mut self, symbol: &str, rest: &RestDepth) -> Result<usize> {
        let buffered = match std::mem::replace(&mut self.sync, SyncState::Anchored) {
            SyncState::Buffering(buffered) => buffered,
            previous => {
                self.sync = previous;
                return Err(StreamStateError::DuplicateSnapshot(symbol.to_string()));
            }
        };
        self.book.clear();
        apply_levels(&mut self.book, &rest.asks, &rest.bids);
        self.last_final_update_id = rest.last_update_id;

        let mut applied = 0;
        for diff in buffered
            .iter()
            .filter(|diff| diff.final_update_id > rest.last_update_id)
        {
            self.apply_diff(symbol, diff)?;
            applied += 1;
        }
        Ok(applied)
    }
}

fn apply_levels(book: &mut PriceBook, asks: &[StringLevel], bids: &[StringLevel]) {
    for [price, size] in asks {
        book.apply_ask(*price, *size);
    }
    for [price, size] in bids {
        book.apply_bid(*price, *size);
    }
}

fn rescaled(value: Decimal, precision: u32) -> Decimal {
    let mut value = value;
    value.rescale(precision);
    value
}

fn rest_depth_channel(symbol: &str) -> String {
    format!("{symbol}@{BINANCE_STREAM_REST_DEPTH}")
}

/// Simulator for Binance combined streams.
#[derive(Debug)]
pub struct BinanceSimulator {
    filter: ChannelFilter,
    config: SimulatorConfig,
    /// Pending subscribe requests by id.
    requests: HashMap<i64, String>,
    subscribed: BTreeSet<String>,
    /// Depth books by lower-case symbol.
    books: BTreeMap<String, DepthBook>,
}

impl BinanceSimulator {
    pub fn new(filter: ChannelFilter, config: SimulatorConfig) -> Self {
        Self {
            filter,
            config,
            requests: HashMap::new(),
            subscribed: BTreeSet::new(),
            books: BTreeMap::new(),
        }
    }

    pub fn subscribed(&self) -> &BTreeSet<String> {
        &self.subscribed
    }

    pub fn book(&self, symbol: &str) -> Option<&DepthBook> {
        self.books.get(symbol)
    }

    fn subscribe(&mut self, channel: &str) -> Result<()> {
        let parts = decompose_channel(Exchange::Binance, channel)?;
        if !self.filter.allows(channel) {
            debug!(channel, "Ignoring filtered subscription");
            return Ok(());
        }
        if !self.subscribed.insert(channel.to_string()) {
            return Err(StreamStateError::DuplicateSubscription(channel.to_string()));
        }
        if let Some(symbol) = parts.symbol.filter(|_| is_diff_stream(parts.stream)) {
            if self.books.contains_key(symbol) {
                return Err(StreamStateError::DuplicateSubscription(channel.to_string()));
            }
            self.books
                .insert(symbol.to_string(), DepthBook::new(parts.stream));
        }
        info!(channel, "Subscribed to channel");
        Ok(())
    }

    fn process_response(&mut self, response: RequestResponse) -> Result<String> {
        if let Some(error) = response.error {
            warn!(id = response.id, %error, "Request failed");
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
        if response.result.is_some() {
            debug!(id = response.id, "Ignoring non-subscribe response");
            return Ok(CHANNEL_UNKNOWN.to_string());
        }
        let channel = self
            .requests
            .remove(&response.id)
            .ok_or(StreamStateError::UnknownRequestId(response.id))?;
        self.subscribe(&channel)?;
        Ok(channel)
    }

    fn process_frame(&mut self, frame: StreamFrame) -> Result<String> {
        let parts = decompose_channel(Exchange::Binance, &frame.stream)?;
        let (Some(symbol), true) = (parts.symbol, is_diff_stream(parts.stream)) else {
            return Ok(frame.stream);
        };
        let diff: DepthUpdate = serde_json::from_value(frame.data)?;
        match self.books.get_mut(symbol) {
            Some(book) => book.push_diff(symbol, diff, self.config.diff_buffer_limit)?,
            None if self.filter.allows(&frame.stream) => {
                return Err(StreamStateError::UntrackedChannel(frame.stream));
            }
            None => {}
        }
        Ok(frame.stream)
    }

    fn process_rest_depth(&mut self, channel: &str, symbol: &str, line: &[u8]) -> Result<()> {
        let rest: RestDepth = serde_json::from_slice(line)?;
        if rest.last_update_id == 0 {
            return Err(StreamStateError::MalformedMessage(format!(
                "{channel}: lastUpdateId is 0"
            )));
        }
        let Some(book) = self.books.get_mut(symbol) else {
            if self.filter.is_active() {
                debug!(channel, "Ignoring depth for filtered symbol");
                return Ok(());
            }
            return Err(StreamStateError::UntrackedChannel(channel.to_string()));
        };
        let applied = book.anchor(symbol, &rest)?;
        info!(
            symbol,
            last_update_id = rest.last_update_id,
            applied,
            "Anchored depth book"
        );
        Ok(())
    }

    fn replay_depth(&self, book: &DepthBook) -> RestDepth {
        let price_precision = self.config.binance_price_precision;
        let quantity_precision = self.config.binance_quantity_precision;
        let level = |(price, size): (&Decimal, &Decimal)| {
            [
                rescaled(*price, price_precision),
                rescaled(*size, quantity_precision),
            ]
        };
        RestDepth {
            last_update_id: book.last_final_update_id,
            bids: book.book.bids_descending().map(level).collect(),
            asks: book.book.asks_ascending().map(level).collect(),
        }
    }
}

impl Simulator for BinanceSimulator {
    fn process_start(&mut self, line: &[u8]) -> Result<()> {
        let raw = std::str::from_utf8(line)
            .map_err(|e| StreamStateError::MalformedMessage(format!("start line: {e}")))?
            .trim();
        if raw.is_empty() {
            return Ok(());
        }
        let url = Url::parse(raw)?;
        let Some((_, streams)) = url.query_pairs().find(|(key, _)| key == "streams") else {
            return Ok(());
        };
        for channel in streams.split('/').filter(|channel| !channel.is_empty()) {
            self.subscribe(channel)?;
        }
        Ok(())
    }

    fn process_send(&mut self, line: &[u8]) -> Result<String> {
        let request: SubscribeRequest = serde_json::from_slice(line)?;
        if request.method != METHOD_SUBSCRIBE {
            return Err(StreamStateError::MalformedMessage(format!(
                "unexpected method '{}'",
                request.method
            )));
        }
        let [channel] = request.params.as_slice() else {
            return Err(StreamStateError::MalformedMessage(format!(
                "subscribe must carry exactly one stream, got {}",
                request.params.len()
            )));
        };
        if request.id == 0 {
            return Err(StreamStateError::MalformedMessage(
                "subscribe request uses id 0".to_string(),
            ));
        }
        self.requests.insert(request.id, channel.clone());
        Ok(channel.clone())
    }

    fn process_message_ws(&mut self, line: &[u8]) -> Result<String> {
        let value: serde_json::Value = serde_json::from_slice(line)?;
        if value.get("stream").is_some() {
            let frame: StreamFrame = serde_json::from_value(value)?;
            return self.process_frame(frame);
        }
        if value.get("id").is_some() {
            let response: RequestResponse = serde_json::from_value(value)?;
            return self.process_response(response);
        }
        Err(StreamStateError::MalformedMessage(format!(
            "neither a stream frame nor a response: {value}"
        )))
    }

    fn process_message_channel_known(&mut self, channel: &str, line: &[u8]) -> Result<()> {
        let parts = decompose_channel(Exchange::Binance, channel)?;
        match parts.symbol {
            Some(symbol) if parts.stream == BINANCE_STREAM_REST_DEPTH => {
                self.process_rest_depth(channel, symbol, line)
            }
            _ => {
                let actual = self.process_message_ws(line)?;
                ensure_channel(channel, actual)
            }
        }
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
        let parts = decompose_channel(Exchange::Binance, channel)?;
        let Some(symbol) = parts.symbol.filter(|_| parts.stream == BINANCE_STREAM_REST_DEPTH)
        else {
            return Err(StreamStateError::UnsupportedChannel {
                exchange: Exchange::Binance.to_string(),
                channel: channel.to_string(),
            });
        };
        let book: DepthBook = serde_json::from_slice(line)?;
        if !self.filter.allows(&format!("{symbol}@{}", book.stream)) {
            return Ok(());
        }
        self.books.insert(symbol.to_string(), book);
        Ok(())
    }

    fn take_state_snapshot(&self) -> Result<Vec<Snapshot>> {
        self.filter.ensure_inactive()?;
        let mut snapshots = Vec::with_capacity(self.books.len() + 1);
        snapshots.push(Snapshot::json(STATE_CHANNEL_SUBSCRIBED, &self.subscribed)?);
        for (symbol, book) in &self.books {
            snapshots.push(Snapshot::json(rest_depth_channel(symbol), book)?);
        }
        Ok(snapshots)
    }

    fn take_snapshot(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::with_capacity(self.subscribed.len() + self.books.len());
        for (id, channel) in (1..).zip(&self.subscribed) {
            snapshots.push(Snapshot::json(
                channel.as_str(),
                &SubscribeRequest::new(channel, id),
            )?);
        }
        for (symbol, book) in self.books.iter().filter(|(_, book)| book.is_anchored()) {
            snapshots.push(Snapshot::json(
                rest_depth_channel(symbol),
                &self.replay_depth(book),
            )?);
        }
        Ok(snapshots)
    }
}
