use rand::{Rng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    agent::{Agent, AgentIdentifier, Learner, check_probability, choose_random},
    build_rng,
    codec::{Action, StateActionRecord, StateCodec, StateRecord},
    data::domain::Symbol,
    error::{AgentError, ModelError, QtradeResult},
    model::Model,
    portfolio::Portfolio,
    training::EpisodeData,
};

// ================================================================================================
// Configuration
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub symbols: Vec<Symbol>,
    /// Trailing days of prices included in each state.
    pub lookback: usize,
    /// α in `(0, 1]`.
    pub learning_rate: f64,
    /// γ in `[0, 1]`.
    pub discount_rate: f64,
    /// ε in `[0, 1]`.
    pub exploration: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl AgentConfig {
    pub fn new(symbols: impl IntoIterator<Item = impl Into<Symbol>>, lookback: usize) -> Self {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            lookback,
            learning_rate: 0.1,
            discount_rate: 0.9,
            exploration: 0.1,
            seed: None,
        }
    }

    pub fn with_learning_rate(self, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            ..self
        }
    }

    pub fn with_discount_rate(self, discount_rate: f64) -> Self {
        Self {
            discount_rate,
            ..self
        }
    }

    pub fn with_exploration(self, exploration: f64) -> Self {
        Self {
            exploration,
            ..self
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self
        }
    }

    pub fn validate(&self) -> QtradeResult<()> {
        if self.symbols.is_empty() {
            return Err(
                AgentError::InvalidConfig("at least one symbol must be tracked".to_string()).into(),
            );
        }
        if self.lookback == 0 {
            return Err(AgentError::InvalidConfig("lookback must be at least 1".to_string()).into());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(AgentError::InvalidConfig(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            ))
            .into());
        }
        check_probability("discount_rate", self.discount_rate)?;
        check_probability("exploration", self.exploration)
    }

    pub fn codec(&self) -> StateCodec {
        StateCodec::new(self.symbols.clone(), self.lookback)
    }
}

// ================================================================================================
// TD targets
// ================================================================================================

/// Backward one-step TD targets over one episode.
///
/// `target[t] = q[t] + α (r[t] + γ target[t+1] − q[t])`, where the last
/// transition bootstraps from its own `q`.
pub fn compute_td_targets(
    q_values: &[f64],
    rewards: &[f64],
    learning_rate: f64,
    discount_rate: f64,
) -> QtradeResult<Vec<f64>> {
    if q_values.len() != rewards.len() {
        return Err(AgentError::InvalidBatch(format!(
            "{} q-values for {} rewards",
            q_values.len(),
            rewards.len()
        ))
        .into());
    }

    let mut targets = vec![0.0; q_values.len()];
    let Some(last) = q_values.len().checked_sub(1) else {
        return Ok(targets);
    };

    let mut next = q_values[last];
    for t in (0..=last).rev() {
        let q = q_values[t];
        targets[t] = q + learning_rate * (rewards[t] + discount_rate * next - q);
        next = targets[t];
    }

    Ok(targets)
}

// ================================================================================================
// Agent
// ================================================================================================

/// ε-greedy agent over a learned action-value function.
#[derive(Debug)]
pub struct QLearningAgent<M = Box<dyn Model>> {
    codec: StateCodec,
    learning_rate: f64,
    discount_rate: f64,
    exploration: f64,
    model: M,
    trained: bool,
    rng: StdRng,
}

impl<M: Model> QLearningAgent<M> {
    pub fn new(config: &AgentConfig, model: M) -> QtradeResult<Self> {
        config.validate()?;
        Ok(Self {
            codec: config.codec(),
            learning_rate: config.learning_rate,
            discount_rate: config.discount_rate,
            exploration: config.exploration,
            trained: model.is_trained(),
            model,
            rng: build_rng(config.seed),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = build_rng(Some(seed));
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn discount_rate(&self) -> f64 {
        self.discount_rate
    }

    /// Greedy choice and its predicted value.
    ///
    /// Untrained agents, and trained ones whose best prediction is exactly
    /// zero, pick uniformly at random and report a value of `0.0`. Ties keep
    /// the first action in `legal_actions`.
    pub fn pick_best_action(
        &mut self,
        state: &StateRecord,
        legal_actions: &[Action],
    ) -> QtradeResult<(Action, f64)> {
        if legal_actions.is_empty() {
            return Err(AgentError::EmptyActionSet("best action".to_string()).into());
        }
        if !self.trained {
            return Ok((choose_random(&mut self.rng, legal_actions)?, 0.0));
        }

        let records = self.codec.encode_state_actions(state, legal_actions);
        let values = self.model.predict(&records)?;
        if values.len() != legal_actions.len() {
            return Err(ModelError::DimensionMismatch {
                expected: legal_actions.len(),
                got: values.len(),
            }
            .into());
        }

        let mut best = 0;
        for (idx, value) in values.iter().enumerate() {
            if !value.is_finite() {
                return Err(ModelError::NonFinite(format!(
                    "value of {} is {value}",
                    legal_actions[idx]
                ))
                .into());
            }
            if *value > values[best] {
                best = idx;
            }
        }

        let best_value = values[best];
        if best_value == 0.0 {
            warn!(
                candidates = legal_actions.len(),
                "Best predicted value is exactly zero, falling back to a random action"
            );
            return Ok((choose_random(&mut self.rng, legal_actions)?, 0.0));
        }

        debug!(action = %legal_actions[best], value = best_value, "Picked best action");
        Ok((legal_actions[best].clone(), best_value))
    }

    /// State-action records and TD targets for every transition of one episode.
    ///
    /// Transition `t` re-encodes the state on the date of record `t` from the
    /// portfolio of record `t - 1`, paired with the action taken that day.
    pub fn build_training_rows(
        &self,
        episode: &EpisodeData,
    ) -> QtradeResult<(Vec<StateActionRecord>, Vec<f64>)> {
        let transitions = episode.trajectory.transitions().count();
        if transitions != episode.rewards.len() {
            return Err(AgentError::InvalidBatch(format!(
                "{transitions} transitions but {} rewards",
                episode.rewards.len()
            ))
            .into());
        }

        let records = episode
            .trajectory
            .transitions()
            .map(|(before, after)| {
                let action = after.action.as_ref().ok_or_else(|| {
                    AgentError::InvalidBatch(format!("no action recorded on {}", after.date))
                })?;
                let portfolio = Portfolio::from_parts(before.balance, before.holdings.clone())?;
                let state = self.codec.observe(&*episode.source, after.date, &portfolio)?;
                Ok(self.codec.encode_state_action(&state, action))
            })
            .collect::<QtradeResult<Vec<_>>>()?;

        let q_values = if self.trained {
            self.model.predict(&records)?
        } else {
            vec![0.0; records.len()]
        };
        let rewards = episode.rewards.iter().map(|r| r.0).collect::<Vec<_>>();
        let targets =
            compute_td_targets(&q_values, &rewards, self.learning_rate, self.discount_rate)?;

        Ok((records, targets))
    }
}

impl<M: Model> Agent for QLearningAgent<M> {
    fn pick_action(
        &mut self,
        state: &StateRecord,
        legal_actions: &[Action],
    ) -> QtradeResult<Action> {
        if self.rng.random::<f64>() < self.exploration {
            return choose_random(&mut self.rng, legal_actions);
        }
        self.pick_best_action(state, legal_actions)
            .map(|(action, _)| action)
    }

    fn codec(&self) -> &StateCodec {
        &self.codec
    }

    fn identifier(&self) -> AgentIdentifier {
        AgentIdentifier::QLearning
    }
}

impl<M: Model> Learner for QLearningAgent<M> {
    #[tracing::instrument(skip_all, fields(episodes = episodes.len()))]
    fn train(&mut self, episodes: &[EpisodeData]) -> QtradeResult<usize> {
        let mut records = Vec::new();
        let mut targets = Vec::new();
        for episode in episodes {
            let (episode_records, episode_targets) = self.build_training_rows(episode)?;
            records.extend(episode_records);
            targets.extend(episode_targets);
        }

        if records.is_empty() {
            warn!("No transitions to learn from, skipping fit");
            return Ok(0);
        }

        self.model.fit(&records, &targets)?;
        self.trained = true;

        info!(samples = records.len(), "Fitted value model");
        Ok(records.len())
    }

    fn exploration(&self) -> f64 {
        self.exploration
    }

    fn set_exploration(&mut self, exploration: f64) -> QtradeResult<()> {
        check_probability("exploration", exploration)?;
        self.exploration = exploration;
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::NaiveDate;

    use super::*;
    use crate::{
        codec::Decision,
        data::{
            domain::{PricePoint, Reward},
            table::PriceTable,
        },
        error::QtradeError,
        session::{Session, SessionConfig},
    };

    // ========================================================================
    // Fixtures
    // ========================================================================

    /// Scores each record by a fixed function and remembers what it was fitted on.
    #[derive(Debug, Default)]
    struct StubModel {
        trained: bool,
        score: Option<fn(&[f64]) -> f64>,
        fitted: Arc<Mutex<Vec<(Vec<StateActionRecord>, Vec<f64>)>>>,
    }

    impl Model for StubModel {
        fn predict(&self, records: &[StateActionRecord]) -> QtradeResult<Vec<f64>> {
            let score = self.score.unwrap_or(|_| 0.0);
            Ok(records.iter().map(|r| score(r.values())).collect())
        }

        fn fit(&mut self, records: &[StateActionRecord], targets: &[f64]) -> QtradeResult<()> {
            self.fitted
                .lock()
                .unwrap()
                .push((records.to_vec(), targets.to_vec()));
            self.trained = true;
            Ok(())
        }

        fn is_trained(&self) -> bool {
            self.trained
        }
    }

    fn config() -> AgentConfig {
        AgentConfig::new(["A", "B"], 1)
            .with_exploration(0.0)
            .with_seed(5)
    }

    fn state() -> StateRecord {
        serde_json::from_str("[100.0, 0.0, 0.0, 1.0, 1.0, 2.0, 2.0]").unwrap()
    }

    fn legal() -> Vec<Action> {
        vec![
            Action::hold(2),
            Action::single(2, 0, Decision::Buy),
            Action::single(2, 1, Decision::Buy),
        ]
    }

    /// Values the last two fields (the action) as `10 * a + b`.
    fn action_score(values: &[f64]) -> f64 {
        let n = values.len();
        10.0 * values[n - 2] + values[n - 1]
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, day).unwrap()
    }

    fn flat_table(price: f64) -> Arc<PriceTable> {
        let rows = (1..=10).map(|d| (date(d), PricePoint::flat(price))).collect::<Vec<_>>();
        Arc::new(
            PriceTable::from_rows([(Symbol::from("A"), rows.clone()), (Symbol::from("B"), rows)])
                .unwrap(),
        )
    }

    // ========================================================================
    // TD targets
    // ========================================================================

    #[test]
    fn td_targets_follow_the_backward_recursion() {
        let targets = compute_td_targets(&[1.0, 2.0, 3.0], &[0.1, 0.2, 0.3], 0.1, 0.9).unwrap();

        let t2 = 3.0 + 0.1 * (0.3 + 0.9 * 3.0 - 3.0);
        let t1 = 2.0 + 0.1 * (0.2 + 0.9 * t2 - 2.0);
        let t0 = 1.0 + 0.1 * (0.1 + 0.9 * t1 - 1.0);
        assert!((targets[2] - t2).abs() < 1e-9);
        assert!((targets[1] - t1).abs() < 1e-9);
        assert!((targets[0] - t0).abs() < 1e-9);

        assert!((targets[2] - 3.0).abs() < 1e-9);
        assert!((targets[1] - 2.09).abs() < 1e-9);
        assert!((targets[0] - 1.0981).abs() < 1e-9);
    }

    #[test]
    fn td_targets_handle_empty_and_mismatched_input() {
        assert!(compute_td_targets(&[], &[], 0.5, 0.5).unwrap().is_empty());
        assert!(matches!(
            compute_td_targets(&[1.0], &[], 0.5, 0.5),
            Err(QtradeError::Agent(AgentError::InvalidBatch(_)))
        ));
    }

    #[test]
    fn long_episodes_do_not_recurse() {
        let q = vec![0.5; 100_000];
        let r = vec![0.01; 100_000];
        let targets = compute_td_targets(&q, &r, 0.5, 0.99).unwrap();
        assert_eq!(targets.len(), 100_000);
        assert!(targets.iter().all(|t| t.is_finite()));
    }

    // ========================================================================
    // Action selection
    // ========================================================================

    #[test]
    fn untrained_agent_picks_randomly_with_zero_value() {
        let mut agent = QLearningAgent::new(&config(), StubModel::default()).unwrap();
        for _ in 0..20 {
            let (action, value) = agent.pick_best_action(&state(), &legal()).unwrap();
            assert!(legal().contains(&action));
            assert_eq!(value, 0.0);
        }
    }

    #[test]
    fn trained_agent_picks_the_highest_value() {
        let model = StubModel {
            trained: true,
            score: Some(action_score),
            ..Default::default()
        };
        let mut agent = QLearningAgent::new(&config(), model).unwrap();

        let (action, value) = agent.pick_best_action(&state(), &legal()).unwrap();
        assert_eq!(action, Action::single(2, 0, Decision::Buy));
        assert_eq!(value, 10.0);
        assert_eq!(agent.pick_action(&state(), &legal()).unwrap(), action);
    }

    #[test]
    fn ties_keep_the_first_action() {
        let model = StubModel {
            trained: true,
            score: Some(|_| 1.5),
            ..Default::default()
        };
        let mut agent = QLearningAgent::new(&config(), model).unwrap();
        let (action, _) = agent.pick_best_action(&state(), &legal()).unwrap();
        assert_eq!(action, Action::hold(2));
    }

    #[test]
    fn all_zero_values_fall_back_to_random() {
        let model = StubModel {
            trained: true,
            ..Default::default()
        };
        let mut agent = QLearningAgent::new(&config(), model).unwrap();

        let picks = (0..40)
            .map(|_| agent.pick_best_action(&state(), &legal()).unwrap().0)
            .collect::<Vec<_>>();
        assert!(picks.iter().all(|a| legal().contains(a)));
        assert!(picks.iter().any(|a| *a != Action::hold(2)));
    }

    #[test]
    fn full_exploration_ignores_the_model() {
        let model = StubModel {
            trained: true,
            score: Some(action_score),
            ..Default::default()
        };
        let mut agent = QLearningAgent::new(&config().with_exploration(1.0), model).unwrap();

        let picks = (0..40)
            .map(|_| agent.pick_action(&state(), &legal()).unwrap())
            .collect::<Vec<_>>();
        assert!(picks.iter().any(|a| *a != Action::single(2, 0, Decision::Buy)));
    }

    #[test]
    fn invalid_rates_are_rejected() {
        assert!(QLearningAgent::new(&config().with_learning_rate(0.0), StubModel::default()).is_err());
        assert!(QLearningAgent::new(&config().with_discount_rate(1.5), StubModel::default()).is_err());
        assert!(QLearningAgent::new(&config().with_exploration(-0.1), StubModel::default()).is_err());
        assert!(AgentConfig::new(Vec::<&str>::new(), 1).validate().is_err());

        let mut agent = QLearningAgent::new(&config(), StubModel::default()).unwrap();
        assert!(agent.set_exploration(2.0).is_err());
        assert_eq!(agent.exploration(), 0.0);
    }

    // ========================================================================
    // Training
    // ========================================================================

    fn episode(agent: &mut QLearningAgent<StubModel>) -> EpisodeData {
        let source = flat_table(10.0);
        let trajectory = Session::new(
            source.clone(),
            agent,
            SessionConfig::new(date(3), date(6), 100.0),
        )
        .unwrap()
        .run_to_end()
        .unwrap();
        let rewards = vec![Reward(0.1), Reward(0.2), Reward(0.3), Reward(0.4)];
        EpisodeData {
            source,
            trajectory,
            rewards,
        }
    }

    #[test]
    fn training_fits_one_row_per_transition_and_sets_the_flag() {
        let fitted = Arc::new(Mutex::new(Vec::new()));
        let model = StubModel {
            fitted: fitted.clone(),
            ..Default::default()
        };
        let mut agent = QLearningAgent::new(&config(), model).unwrap();
        let episodes = [episode(&mut agent), episode(&mut agent)];

        assert!(!agent.is_trained());
        let samples = agent.train(&episodes).unwrap();
        assert!(agent.is_trained());
        assert_eq!(samples, 8);

        let calls = fitted.lock().unwrap();
        assert_eq!(calls.len(), 1, "one fit per training call");
        let (records, targets) = &calls[0];
        assert_eq!(records.len(), 8);
        assert!(records.iter().all(|r| r.len() == agent.codec().state_action_len()));

        // untrained q-values are zero, so targets are pure discounted rewards
        let expected = compute_td_targets(&[0.0; 4], &[0.1, 0.2, 0.3, 0.4], 0.1, 0.9).unwrap();
        assert_eq!(&targets[..4], expected.as_slice());
    }

    #[test]
    fn training_rows_use_the_portfolio_before_each_action() {
        let mut agent = QLearningAgent::new(&config(), StubModel::default()).unwrap();
        let data = episode(&mut agent);
        let (records, _) = agent.build_training_rows(&data).unwrap();

        for (record, (before, after)) in records.iter().zip(data.trajectory.transitions()) {
            assert_eq!(record.values()[0], before.balance);
            let action = after.action.as_ref().unwrap();
            let n = record.len();
            assert_eq!(record.values()[n - 2], action.decisions()[0].value() as f64);
            assert_eq!(record.values()[n - 1], action.decisions()[1].value() as f64);
        }
    }

    #[test]
    fn mismatched_rewards_are_rejected() {
        let mut agent = QLearningAgent::new(&config(), StubModel::default()).unwrap();
        let mut data = episode(&mut agent);
        data.rewards.pop();
        assert!(agent.train(&[data]).is_err());
        assert!(!agent.is_trained());
    }
}
