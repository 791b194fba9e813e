//! Exchange stream state reconstruction.
//!
//! Replays captured websocket sessions from Bitmex, Bitflyer, Bitfinex,
//! Binance, Liquid and Bitbank line by line, keeping the subscription set
//! and order books a live client would have held. The reconstructed state
//! can be checkpointed as private state lines or re-emitted as
//! exchange-shaped messages that let a replay start mid-stream.

pub mod book;
pub mod channel;
pub mod config;
pub mod error;
pub mod models;
pub mod simulator;

pub use channel::Exchange;
pub use config::SimulatorConfig;
pub use error::{Result, StreamStateError};
pub use simulator::{ChannelFilter, Simulator, Snapshot, get_simulator, get_simulator_by_name};
