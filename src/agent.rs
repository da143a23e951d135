pub mod q_learning;

use rand::{rngs::StdRng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, sync::Arc};
use strum::{Display, EnumString};

use crate::{
    build_rng,
    codec::{Action, StateCodec, StateRecord},
    error::{AgentError, QtradeResult},
    training::EpisodeData,
};

// ============================================================================
//  Core Agent Definitions
// ============================================================================

/// Identifies which policy produced a trajectory in logs and reports.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    Default,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentIdentifier {
    /// A custom user-defined agent.
    #[strum(to_string = "{0}")]
    Named(Arc<String>),

    QLearning,

    #[default]
    Random,
}

/// A trading policy: picks one of the legal actions for an encoded state.
pub trait Agent {
    /// Decide on an action among `legal_actions` for the current state.
    ///
    /// The returned action must be an element of `legal_actions`.
    fn pick_action(
        &mut self,
        state: &StateRecord,
        legal_actions: &[Action],
    ) -> QtradeResult<Action>;

    /// Instruments and lookback the agent observes.
    fn codec(&self) -> &StateCodec;

    /// Optional agent name for logging/debugging.
    fn identifier(&self) -> AgentIdentifier {
        AgentIdentifier::Named(Arc::new(
            "UnnamedAgent: override Agent::identifier()".to_string(),
        ))
    }
}

impl Agent for Box<dyn Agent> {
    fn pick_action(
        &mut self,
        state: &StateRecord,
        legal_actions: &[Action],
    ) -> QtradeResult<Action> {
        (**self).pick_action(state, legal_actions)
    }

    fn codec(&self) -> &StateCodec {
        (**self).codec()
    }

    fn identifier(&self) -> AgentIdentifier {
        (**self).identifier()
    }
}

/// An agent whose policy improves from completed episodes.
///
/// Training is an offline batch step: it is only ever called between epochs,
/// never while a session is querying the agent.
pub trait Learner: Agent {
    /// Learns from a full epoch of episodes. Returns the number of samples fitted.
    fn train(&mut self, episodes: &[EpisodeData]) -> QtradeResult<usize>;

    /// Probability of picking a uniformly random legal action.
    fn exploration(&self) -> f64;

    fn set_exploration(&mut self, exploration: f64) -> QtradeResult<()>;

    fn is_trained(&self) -> bool;
}

pub(crate) fn check_probability(name: &str, value: f64) -> QtradeResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AgentError::InvalidConfig(format!(
            "{name} must be in [0, 1], got {value}"
        ))
        .into());
    }
    Ok(())
}

/// Picks uniformly among `legal_actions`.
pub(crate) fn choose_random(rng: &mut StdRng, legal_actions: &[Action]) -> QtradeResult<Action> {
    legal_actions
        .choose(rng)
        .cloned()
        .ok_or_else(|| AgentError::EmptyActionSet("random choice".to_string()).into())
}

// ============================================================================
//  Baseline
// ============================================================================

/// Uniformly random policy, useful as a baseline and for exercising sessions.
#[derive(Debug, Clone)]
pub struct RandomAgent {
    codec: StateCodec,
    rng: StdRng,
}

impl RandomAgent {
    pub fn new(codec: StateCodec) -> Self {
        Self {
            codec,
            rng: build_rng(None),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = build_rng(Some(seed));
        self
    }
}

impl Agent for RandomAgent {
    fn pick_action(
        &mut self,
        _state: &StateRecord,
        legal_actions: &[Action],
    ) -> QtradeResult<Action> {
        choose_random(&mut self.rng, legal_actions)
    }

    fn codec(&self) -> &StateCodec {
        &self.codec
    }

    fn identifier(&self) -> AgentIdentifier {
        AgentIdentifier::Random
    }
}
