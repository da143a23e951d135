//! Price data consumed by sessions: the [`PriceSource`](source::PriceSource)
//! contract, an in-memory table and the synthetic generators used for training.

pub mod domain;
pub mod noise;
pub mod sinusoid;
pub mod source;
pub mod table;
