//! Crate-level error types.
//!
//! [`StreamStateError`] unifies every failure a simulator can report behind
//! a single enum so callers can match on the variant they care about while
//! still using the `?` operator.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StreamStateError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum StreamStateError {
    /// A configuration value could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A start line did not contain a parseable connection URL.
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    /// A line parsed as JSON but did not have the shape the exchange uses.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// No simulator exists for the named exchange.
    #[error("exchange '{0}' is not supported")]
    UnsupportedExchange(String),

    /// The channel name does not match any shape the exchange emits.
    #[error("{exchange}: unsupported channel '{channel}'")]
    UnsupportedChannel { exchange: String, channel: String },

    /// A depth diff did not continue the update-id sequence of its symbol.
    #[error("{symbol}: sequence gap, expected update {expected}, got {first_update_id}..={final_update_id}")]
    SequenceGap {
        symbol: String,
        expected: u64,
        first_update_id: u64,
        final_update_id: u64,
    },

    /// Too many diffs arrived before the anchoring REST snapshot.
    #[error("{symbol}: stream desynchronized, more than {limit} diffs buffered")]
    BufferOverflow { symbol: String, limit: usize },

    /// A line asserted to belong to one channel resolved to another.
    #[error("channel differs: {actual}, expected: {expected}")]
    ChannelMismatch { expected: String, actual: String },

    /// A subscription was acknowledged for a channel already tracked.
    #[error("subscription to '{0}' acknowledged twice")]
    DuplicateSubscription(String),

    /// A full snapshot arrived for a book that is already anchored.
    #[error("snapshot for '{0}' received twice")]
    DuplicateSnapshot(String),

    /// A data frame referenced a channel with no state allocated for it.
    #[error("no state for channel '{0}'")]
    UntrackedChannel(String),

    /// A subscribe acknowledgement referenced a request never sent.
    #[error("no subscribe request with id {0}")]
    UnknownRequestId(i64),

    /// State snapshots are only defined for unfiltered simulators.
    #[error("channel filter is enabled")]
    FilterActive,
}
