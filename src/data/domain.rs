use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

use crate::impl_numeric_newtype;

// ================================================================================================
// Domain Strong Types (NewTypes)
// ================================================================================================

/// Ticker of a tradable instrument (e.g. `"GOOG"` or a synthetic `"STOCK_1"`).
///
/// Cheap to clone: the name is shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(pub Arc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Represents a price level in the quote currency.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Price(pub f64);
impl_numeric_newtype!(Price, f64);

/// Daily price extremes of one instrument.
///
/// `high` is the ask used for buying, `low` the bid used for selling and for
/// valuing holdings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PricePoint {
    pub high: Price,
    pub low: Price,
}

impl PricePoint {
    pub fn new(high: f64, low: f64) -> Self {
        Self {
            high: Price(high),
            low: Price(low),
        }
    }

    /// A point without spread, as produced by the sinusoid generator.
    pub fn flat(value: f64) -> Self {
        Self::new(value, value)
    }
}

/// Shaped learning signal for one transition.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Reward(pub f64);
impl_numeric_newtype!(Reward, f64);
