//! Price-keyed order book shared by the Binance, Bitflyer, Liquid and
//! Bitbank simulators.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One side of a price-keyed book: price → resting size.
pub type PriceLevels = BTreeMap<Decimal, Decimal>;

/// Applies one `(price, size)` level update.
///
/// A zero size removes the level (no-op when absent); any other size sets
/// the level to exactly that size.
pub fn apply_level(levels: &mut PriceLevels, price: Decimal, size: Decimal) {
    if size.is_zero() {
        levels.remove(&price);
    } else {
        levels.insert(price, size);
    }
}

/// Two-sided price-keyed book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBook {
    #[serde(with = "levels_as_pairs")]
    pub asks: PriceLevels,
    #[serde(with = "levels_as_pairs")]
    pub bids: PriceLevels,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_ask(&mut self, price: Decimal, size: Decimal) {
        apply_level(&mut self.asks, price, size);
    }

    pub fn apply_bid(&mut self, price: Decimal, size: Decimal) {
        apply_level(&mut self.bids, price, size);
    }

    /// Drops every level on both sides.
    pub fn clear(&mut self) {
        self.asks.clear();
        self.bids.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }

    /// Asks from best (lowest) to worst.
    pub fn asks_ascending(&self) -> impl Iterator<Item = (&Decimal, &Decimal)> {
        self.asks.iter()
    }

    /// Bids from best (highest) to worst.
    pub fn bids_descending(&self) -> impl Iterator<Item = (&Decimal, &Decimal)> {
        self.bids.iter().rev()
    }
}

/// State-line encoding of [`PriceLevels`] as an ordered list of
/// `["price", "size"]` string pairs, so no precision is lost on restore.
pub(crate) mod levels_as_pairs {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{PriceLevels, apply_level};

    pub fn serialize<S: Serializer>(levels: &PriceLevels, serializer: S) -> Result<S::Ok, S::Error> {
        let pairs: Vec<[String; 2]> = levels
            .iter()
            .map(|(price, size)| [price.to_string(), size.to_string()])
            .collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PriceLevels, D::Error> {
        let pairs = Vec::<[Decimal; 2]>::deserialize(deserializer)?;
        let mut levels = PriceLevels::new();
        for [price, size] in pairs {
            apply_level(&mut levels, price, size);
        }
        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn zero_size_removes_level_and_is_noop_when_absent() {
        let mut levels = PriceLevels::new();
        apply_level(&mut levels, dec!(10.0), dec!(0));
        assert!(levels.is_empty());

        apply_level(&mut levels, dec!(10.0), dec!(5));
        apply_level(&mut levels, dec!(10.0), dec!(0.000));
        assert!(levels.is_empty());
    }

    #[test]
    fn nonzero_size_overwrites_regardless_of_prior_value() {
        let mut levels = PriceLevels::new();
        apply_level(&mut levels, dec!(10.0), dec!(5));
        apply_level(&mut levels, dec!(10), dec!(3));
        assert_eq!(levels.len(), 1);
        assert_eq!(levels.get(&dec!(10.00)), Some(&dec!(3)));
    }

    #[test]
    fn sides_iterate_best_first() {
        let mut book = PriceBook::new();
        book.apply_bid(dec!(99), dec!(1));
        book.apply_bid(dec!(100), dec!(2));
        book.apply_ask(dec!(102), dec!(1));
        book.apply_ask(dec!(101), dec!(2));

        let bids: Vec<_> = book.bids_descending().map(|(p, _)| *p).collect();
        let asks: Vec<_> = book.asks_ascending().map(|(p, _)| *p).collect();
        assert_eq!(bids, vec![dec!(100), dec!(99)]);
        assert_eq!(asks, vec![dec!(101), dec!(102)]);
    }

    #[test]
    fn state_encoding_keeps_exact_text() {
        let mut book = PriceBook::new();
        book.apply_ask(dec!(0.00012300), dec!(1.50));
        book.apply_bid(dec!(0.00012000), dec!(7));

        let encoded = serde_json::to_string(&book).unwrap();
        assert_eq!(
            encoded,
            r#"{"asks":[["0.00012300","1.50"]],"bids":[["0.00012000","7"]]}"#
        );
        let decoded: PriceBook = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, book);
    }
}
