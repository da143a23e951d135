//! Trading simulator and Q-learning trainer.
//!
//! A [`Session`](session::Session) steps an [`Agent`](agent::Agent) through a
//! date range of daily prices, buying, selling or holding one instrument per
//! day. [`Training`](training::Training) runs epochs of randomized sessions and
//! fits the agent's value model on backward TD targets.

mod macros;

pub mod agent;
pub mod codec;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod portfolio;
pub mod prelude;
pub mod session;
pub mod simulation;
pub mod training;

use rand::{SeedableRng, rngs::StdRng};

/// Seeded generator when a seed is given, OS-seeded otherwise.
pub(crate) fn build_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}
