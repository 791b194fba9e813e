//! Wire models for the captured exchange streams.
//!
//! One module per exchange. Types are used in both directions: parsing
//! captured lines and re-emitting exchange-shaped replay lines, so field
//! names and number/string encodings follow each exchange's own format.

pub mod binance;
pub mod bitbank;
pub mod bitfinex;
pub mod bitflyer;
pub mod bitmex;
pub mod liquid;

use rust_decimal::Decimal;

/// A `["price", "size"]` pair as sent by exchanges that quote decimals as
/// strings (Binance, Liquid, Bitbank). Deserialization also accepts numbers.
pub type StringLevel = [Decimal; 2];
