//! Channel taxonomy.
//!
//! Every exchange encodes the symbol and the stream type into one channel
//! string in its own way. This module decomposes those strings and sorts
//! channels into the cost groups used for transfer accounting. Both
//! functions are total over the shapes each exchange emits and return
//! [`StreamStateError::UnsupportedChannel`] for anything else.

use std::fmt;
use std::str::FromStr;

use crate::{Result, StreamStateError};

/// Reserved state-line channel carrying the serialized subscription set.
pub const STATE_CHANNEL_SUBSCRIBED: &str = "!subscribed";

/// Placeholder channel for frames that carry no classifiable channel.
pub const CHANNEL_UNKNOWN: &str = "!unknown";

/// Binance pseudo-stream carrying REST depth responses.
pub const BINANCE_STREAM_REST_DEPTH: &str = "rest_depth";

pub const BITFLYER_PREFIX_BOARD_SNAPSHOT: &str = "lightning_board_snapshot_";
pub const BITFLYER_PREFIX_BOARD: &str = "lightning_board_";
pub const BITFLYER_PREFIX_EXECUTIONS: &str = "lightning_executions_";
pub const BITFLYER_PREFIX_TICKER: &str = "lightning_ticker_";

pub const LIQUID_PREFIX_LADDERS_CASH: &str = "price_ladders_cash_";
pub const LIQUID_PREFIX_EXECUTIONS_CASH: &str = "executions_cash_";
pub const LIQUID_PREFIX_PRODUCT_CASH: &str = "product_cash_";

pub const BITBANK_PREFIX_DEPTH_WHOLE: &str = "depth_whole_";
pub const BITBANK_PREFIX_DEPTH_DIFF: &str = "depth_diff_";
pub const BITBANK_PREFIX_TRANSACTIONS: &str = "transactions_";
pub const BITBANK_PREFIX_TICKER: &str = "ticker_";

/// Exchanges with a simulator implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Exchange {
    Bitmex,
    Bitflyer,
    Bitfinex,
    Binance,
    Liquid,
    Bitbank,
}

impl Exchange {
    /// Every supported exchange, in declaration order.
    pub const ALL: [Exchange; 6] = [
        Exchange::Bitmex,
        Exchange::Bitflyer,
        Exchange::Bitfinex,
        Exchange::Binance,
        Exchange::Liquid,
        Exchange::Bitbank,
    ];

    /// Returns the lower-case name used in dataset paths and requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Bitmex => "bitmex",
            Exchange::Bitflyer => "bitflyer",
            Exchange::Bitfinex => "bitfinex",
            Exchange::Binance => "binance",
            Exchange::Liquid => "liquid",
            Exchange::Bitbank => "bitbank",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = StreamStateError;

    fn from_str(s: &str) -> Result<Self> {
        Exchange::ALL
            .into_iter()
            .find(|exchange| exchange.as_str() == s)
            .ok_or_else(|| StreamStateError::UnsupportedExchange(s.to_string()))
    }
}

/// Cost category a channel's traffic is billed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelGroup {
    Orderbook,
    Trade,
    Other,
}

/// A channel split into its symbol and stream type.
///
/// `symbol` is `None` for channels that are not scoped to one instrument
/// (for example a Bitmex table subscribed for every symbol).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelParts<'a> {
    pub symbol: Option<&'a str>,
    pub stream: &'a str,
}

impl<'a> ChannelParts<'a> {
    fn new(symbol: &'a str, stream: &'a str) -> Self {
        Self {
            symbol: Some(symbol),
            stream,
        }
    }
}

fn unsupported(exchange: Exchange, channel: &str) -> StreamStateError {
    StreamStateError::UnsupportedChannel {
        exchange: exchange.to_string(),
        channel: channel.to_string(),
    }
}

/// Splits `raw` into symbol and stream following `exchange`'s naming scheme.
///
/// # Errors
///
/// Returns [`StreamStateError::UnsupportedChannel`] if `raw` does not have a
/// shape the exchange is known to emit.
pub fn decompose_channel(exchange: Exchange, raw: &str) -> Result<ChannelParts<'_>> {
    let parts = match exchange {
        Exchange::Binance => raw
            .split_once('@')
            .filter(|(symbol, stream)| !symbol.is_empty() && !stream.is_empty())
            .map(|(symbol, stream)| ChannelParts::new(symbol, stream)),
        Exchange::Bitmex => decompose_bitmex(raw),
        Exchange::Bitfinex => raw
            .split_once('_')
            .filter(|(stream, symbol)| !stream.is_empty() && !symbol.is_empty())
            .map(|(stream, symbol)| ChannelParts::new(symbol, stream)),
        Exchange::Bitflyer => decompose_prefixed(
            raw,
            &[
                BITFLYER_PREFIX_BOARD_SNAPSHOT,
                BITFLYER_PREFIX_BOARD,
                BITFLYER_PREFIX_EXECUTIONS,
                BITFLYER_PREFIX_TICKER,
            ],
        ),
        Exchange::Liquid => decompose_liquid(raw),
        Exchange::Bitbank => decompose_prefixed(
            raw,
            &[
                BITBANK_PREFIX_DEPTH_WHOLE,
                BITBANK_PREFIX_DEPTH_DIFF,
                BITBANK_PREFIX_TRANSACTIONS,
                BITBANK_PREFIX_TICKER,
            ],
        ),
    };
    parts.ok_or_else(|| unsupported(exchange, raw))
}

/// Bitmex channels are a table name, optionally followed by `_SYMBOL`.
/// Tables themselves may contain underscores (`orderBookL2_25`), so only an
/// upper-case suffix is taken as the symbol.
fn decompose_bitmex(raw: &str) -> Option<ChannelParts<'_>> {
    let is_table = |s: &str| {
        s.chars().next().is_some_and(|c| c.is_ascii_lowercase())
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    if let Some((table, symbol)) = raw.rsplit_once('_') {
        let is_symbol = symbol.chars().next().is_some_and(|c| c.is_ascii_uppercase())
            && symbol
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if is_symbol && is_table(table) {
            return Some(ChannelParts::new(symbol, table));
        }
    }
    is_table(raw).then_some(ChannelParts {
        symbol: None,
        stream: raw,
    })
}

/// Liquid ladders are per side: `price_ladders_cash_<pair>_<buy|sell>`.
fn decompose_liquid(raw: &str) -> Option<ChannelParts<'_>> {
    if let Some(rest) = raw.strip_prefix(LIQUID_PREFIX_LADDERS_CASH) {
        let (pair, side) = rest.rsplit_once('_')?;
        if pair.is_empty() || !matches!(side, "buy" | "sell") {
            return None;
        }
        let stream_len = LIQUID_PREFIX_LADDERS_CASH.len() - 1;
        return Some(ChannelParts::new(pair, &raw[..stream_len]));
    }
    if let Some(rest) = raw.strip_prefix(LIQUID_PREFIX_PRODUCT_CASH) {
        let (pair, id) = rest.rsplit_once('_')?;
        if pair.is_empty() || id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let stream_len = LIQUID_PREFIX_PRODUCT_CASH.len() - 1;
        return Some(ChannelParts::new(pair, &raw[..stream_len]));
    }
    decompose_prefixed(raw, &[LIQUID_PREFIX_EXECUTIONS_CASH])
}

/// Matches `raw` against `prefixes` (longest-specific first); the stream is
/// the prefix without its trailing `_`, the symbol the remainder.
fn decompose_prefixed<'a>(raw: &'a str, prefixes: &[&str]) -> Option<ChannelParts<'a>> {
    prefixes.iter().find_map(|prefix| {
        let symbol = raw.strip_prefix(prefix).filter(|s| !s.is_empty())?;
        Some(ChannelParts::new(symbol, &raw[..prefix.len() - 1]))
    })
}

/// Returns the cost group `channel` belongs to on `exchange`.
///
/// # Errors
///
/// Returns [`StreamStateError::UnsupportedChannel`] if the channel cannot be
/// decomposed.
pub fn classify_cost_group(exchange: Exchange, channel: &str) -> Result<ChannelGroup> {
    let stream = decompose_channel(exchange, channel)?.stream;
    let group = match exchange {
        Exchange::Binance => {
            if stream == "trade" || stream == "aggTrade" {
                ChannelGroup::Trade
            } else if stream.starts_with("depth") || stream == BINANCE_STREAM_REST_DEPTH {
                ChannelGroup::Orderbook
            } else {
                ChannelGroup::Other
            }
        }
        Exchange::Bitmex => {
            if stream.starts_with("orderBook") {
                ChannelGroup::Orderbook
            } else if stream == "trade" {
                ChannelGroup::Trade
            } else {
                ChannelGroup::Other
            }
        }
        Exchange::Bitfinex => match stream {
            "book" => ChannelGroup::Orderbook,
            "trades" => ChannelGroup::Trade,
            _ => ChannelGroup::Other,
        },
        Exchange::Bitflyer => match stream {
            "lightning_board_snapshot" | "lightning_board" => ChannelGroup::Orderbook,
            "lightning_executions" => ChannelGroup::Trade,
            _ => ChannelGroup::Other,
        },
        Exchange::Liquid => match stream {
            "price_ladders_cash" => ChannelGroup::Orderbook,
            "executions_cash" => ChannelGroup::Trade,
            _ => ChannelGroup::Other,
        },
        Exchange::Bitbank => match stream {
            "depth_whole" | "depth_diff" => ChannelGroup::Orderbook,
            "transactions" => ChannelGroup::Trade,
            _ => ChannelGroup::Other,
        },
    };
    Ok(group)
}
