//! Epoch loop that turns randomized sessions into training batches.
//!
//! Each epoch runs `batch_size` sessions over freshly perturbed price views,
//! shapes their net-worth changes into rewards and hands the whole batch to the
//! agent's learning step. Epochs are strictly sequential.

use std::{sync::Arc, time::Instant};

use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use rand::{Rng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    agent::Learner,
    build_rng,
    data::{
        domain::{Reward, Symbol},
        noise::PriceNoise,
        source::PriceSource,
        table::PriceTable,
    },
    error::{EnvError, QtradeResult},
    session::{Session, SessionConfig, trajectory::Trajectory},
};

// ================================================================================================
// Reward shaping
// ================================================================================================

/// Squashes daily net-worth growth into `(-1, 1)`.
///
/// `reward = 2 / (2 + expm1(-steepness * (growth - bias))) - 1`, with growth
/// measured relative to the session's starting balance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardShaping {
    /// Growth a day must beat to earn a positive reward.
    pub bias: f64,
    pub steepness: f64,
}

impl Default for RewardShaping {
    fn default() -> Self {
        Self {
            bias: 0.01,
            steepness: 75.0,
        }
    }
}

impl RewardShaping {
    pub fn reward(&self, growth: f64) -> Reward {
        let rate = growth - self.bias;
        Reward(2.0 / (2.0 + (-rate * self.steepness).exp_m1()) - 1.0)
    }

    /// One reward per transition of `trajectory`.
    pub fn rewards(&self, trajectory: &Trajectory) -> Vec<Reward> {
        let initial = trajectory.initial_balance();
        trajectory
            .net_worths()
            .tuple_windows()
            .map(|(before, after)| {
                let growth = if initial > 0.0 {
                    (after - before) / initial
                } else {
                    0.0
                };
                self.reward(growth)
            })
            .collect()
    }
}

/// Rewards for every trajectory of an epoch, in order.
pub fn generate_rewards(trajectories: &[Trajectory], shaping: &RewardShaping) -> Vec<Vec<Reward>> {
    trajectories.iter().map(|t| shaping.rewards(t)).collect()
}

// ================================================================================================
// Configuration
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub name: String,
    #[serde(with = "crate::config::date_format")]
    pub min_start_date: NaiveDate,
    #[serde(with = "crate::config::date_format")]
    pub max_end_date: NaiveDate,
    /// Bounds on the number of trading days after a session's first date.
    pub min_session_duration: usize,
    pub max_session_duration: usize,
    pub min_start_balance: f64,
    pub max_start_balance: f64,
    /// Sessions per epoch.
    pub batch_size: usize,
    pub epochs: usize,
    /// Relative price noise applied to every session's view.
    pub variance: f64,
    /// ε forced on the agent while training.
    pub exploration: f64,
    #[serde(default)]
    pub reward: RewardShaping,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub progress: bool,
}

impl TrainingConfig {
    pub fn new(name: impl Into<String>, min_start_date: NaiveDate, max_end_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            min_start_date,
            max_end_date,
            min_session_duration: 10,
            max_session_duration: 30,
            min_start_balance: 1_000.0,
            max_start_balance: 10_000.0,
            batch_size: 10,
            epochs: 10,
            variance: 0.0,
            exploration: 0.1,
            reward: RewardShaping::default(),
            seed: None,
            progress: false,
        }
    }

    pub fn with_session_duration(self, min: usize, max: usize) -> Self {
        Self {
            min_session_duration: min,
            max_session_duration: max,
            ..self
        }
    }

    pub fn with_start_balance(self, min: f64, max: f64) -> Self {
        Self {
            min_start_balance: min,
            max_start_balance: max,
            ..self
        }
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    pub fn with_epochs(self, epochs: usize) -> Self {
        Self { epochs, ..self }
    }

    pub fn with_variance(self, variance: f64) -> Self {
        Self { variance, ..self }
    }

    pub fn with_exploration(self, exploration: f64) -> Self {
        Self {
            exploration,
            ..self
        }
    }

    pub fn with_reward(self, reward: RewardShaping) -> Self {
        Self { reward, ..self }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self
        }
    }

    pub fn with_progress(self, progress: bool) -> Self {
        Self { progress, ..self }
    }

    pub fn validate(&self) -> QtradeResult<()> {
        let fail = |msg: String| -> QtradeResult<()> { Err(EnvError::InvalidConfig(msg).into()) };

        if self.min_start_date > self.max_end_date {
            return fail(format!(
                "min_start_date {} is after max_end_date {}",
                self.min_start_date, self.max_end_date
            ));
        }
        if self.min_session_duration > self.max_session_duration {
            return fail(format!(
                "min_session_duration {} exceeds max_session_duration {}",
                self.min_session_duration, self.max_session_duration
            ));
        }
        let balances_ok = self.min_start_balance.is_finite()
            && self.max_start_balance.is_finite()
            && 0.0 < self.min_start_balance
            && self.min_start_balance <= self.max_start_balance;
        if !balances_ok {
            return fail(format!(
                "start balance bounds must satisfy 0 < min <= max, got [{}, {}]",
                self.min_start_balance, self.max_start_balance
            ));
        }
        if self.batch_size == 0 || self.epochs == 0 {
            return fail("batch_size and epochs must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.exploration) {
            return fail(format!("exploration must be in [0, 1], got {}", self.exploration));
        }
        PriceNoise::new(self.variance)?;
        Ok(())
    }
}

// ================================================================================================
// Episodes & Reports
// ================================================================================================

/// Everything the learning step needs from one finished session.
#[derive(Debug, Clone)]
pub struct EpisodeData {
    /// The exact price view the session traded on.
    pub source: Arc<PriceTable>,
    pub trajectory: Trajectory,
    /// One reward per transition of `trajectory`.
    pub rewards: Vec<Reward>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub sessions: usize,
    /// Training rows handed to the model.
    pub samples: usize,
    pub mean_reward: f64,
    /// Mean of `final net worth / starting balance - 1` over the epoch's sessions.
    pub mean_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub name: String,
    pub epochs: Vec<EpochSummary>,
}

impl TrainingReport {
    pub fn total_samples(&self) -> usize {
        self.epochs.iter().map(|e| e.samples).sum()
    }

    pub fn last(&self) -> Option<&EpochSummary> {
        self.epochs.last()
    }
}

/// Window of one sampled session.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SessionPlan {
    /// First date of the perturbed view: the session start minus the lookback.
    view_start: NaiveDate,
    session: SessionConfig,
}

// ================================================================================================
// Training
// ================================================================================================

/// Runs [`TrainingConfig::epochs`] epochs of randomized sessions against one learner.
pub struct Training<'a, L: Learner + ?Sized> {
    source: Arc<dyn PriceSource>,
    agent: &'a mut L,
    config: TrainingConfig,
    noise: PriceNoise,
    symbols: Vec<Symbol>,
    dates: Vec<NaiveDate>,
    rng: StdRng,
}

impl<'a, L: Learner + ?Sized> Training<'a, L> {
    /// Validates the configuration against the source's dates in
    /// `[min_start_date, max_end_date]`.
    ///
    /// # Errors
    /// [`EnvError::InvalidConfig`] when even the shortest session plus the agent's
    /// lookback does not fit into the available dates.
    pub fn new(
        source: Arc<dyn PriceSource>,
        agent: &'a mut L,
        config: TrainingConfig,
    ) -> QtradeResult<Self> {
        config.validate()?;
        let noise = PriceNoise::new(config.variance)?;
        let dates = source.dates_between(config.min_start_date, config.max_end_date);
        let lookback = agent.codec().lookback();

        let required = lookback + config.min_session_duration + 1;
        if dates.len() < required {
            return Err(EnvError::InvalidConfig(format!(
                "'{}' needs at least {required} dates (lookback {lookback} + minimum duration {} + 1), \
                 but only {} are available between {} and {}",
                config.name,
                config.min_session_duration,
                dates.len(),
                config.min_start_date,
                config.max_end_date
            ))
            .into());
        }

        Ok(Self {
            symbols: agent.codec().symbols().to_vec(),
            rng: build_rng(config.seed),
            source,
            agent,
            config,
            noise,
            dates,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    #[tracing::instrument(skip(self), fields(name = %self.config.name, epochs = self.config.epochs))]
    pub fn run(&mut self) -> QtradeResult<TrainingReport> {
        let bar = progress_bar(self.config.epochs as u64, self.config.progress)?;
        bar.set_message(self.config.name.clone());

        let mut epochs = Vec::with_capacity(self.config.epochs);
        for epoch in 0..self.config.epochs {
            epochs.push(self.run_epoch(epoch)?);
            bar.inc(1);
        }

        bar.finish_with_message(format!("{} complete", self.config.name));
        Ok(TrainingReport {
            name: self.config.name.clone(),
            epochs,
        })
    }

    #[tracing::instrument(skip(self))]
    fn run_epoch(&mut self, epoch: usize) -> QtradeResult<EpochSummary> {
        let started = Instant::now();
        self.agent.set_exploration(self.config.exploration)?;

        let mut episodes = Vec::with_capacity(self.config.batch_size);
        for session_idx in 0..self.config.batch_size {
            let plan = self.plan_session();
            let view = Arc::new(self.noise.perturb(
                &*self.source,
                &self.symbols,
                plan.view_start,
                plan.session.end_date,
                &mut self.rng,
            )?);

            let trajectory =
                Session::new(view.clone(), &mut *self.agent, plan.session)?.run_to_end()?;
            let rewards = self.config.reward.rewards(&trajectory);
            debug!(
                session_idx,
                start = %plan.session.start_date,
                end = %plan.session.end_date,
                balance = plan.session.starting_balance,
                "Finished training session"
            );

            episodes.push(EpisodeData {
                source: view,
                trajectory,
                rewards,
            });
        }

        let samples = self.agent.train(&episodes)?;
        let summary = summarize(epoch, samples, &episodes);

        info!(
            epoch = epoch + 1,
            of = self.config.epochs,
            samples,
            mean_reward = summary.mean_reward,
            mean_return = summary.mean_return,
            elapsed = %humantime::format_duration(started.elapsed()),
            "Epoch completed"
        );
        Ok(summary)
    }

    /// Samples a duration, a start index with a full lookback before it and a balance.
    fn plan_session(&mut self) -> SessionPlan {
        let lookback = self.agent.codec().lookback();
        let last = self.dates.len() - 1;

        let longest = self.config.max_session_duration.min(last - lookback);
        let duration = self
            .rng
            .random_range(self.config.min_session_duration..=longest);
        let start_idx = self.rng.random_range(lookback..=last - duration);

        let starting_balance = self
            .rng
            .random_range(self.config.min_start_balance..=self.config.max_start_balance);

        SessionPlan {
            view_start: self.dates[start_idx - lookback],
            session: SessionConfig::new(
                self.dates[start_idx],
                self.dates[start_idx + duration],
                starting_balance,
            ),
        }
    }
}

fn summarize(epoch: usize, samples: usize, episodes: &[EpisodeData]) -> EpochSummary {
    let rewards = episodes.iter().flat_map(|e| e.rewards.iter().map(|r| r.0));
    let (reward_sum, reward_count) = rewards.fold((0.0, 0usize), |(s, n), r| (s + r, n + 1));
    let mean_return = if episodes.is_empty() {
        0.0
    } else {
        episodes.iter().map(|e| e.trajectory.total_return()).sum::<f64>() / episodes.len() as f64
    };

    EpochSummary {
        epoch,
        sessions: episodes.len(),
        samples,
        mean_reward: if reward_count == 0 {
            0.0
        } else {
            reward_sum / reward_count as f64
        },
        mean_return,
    }
}

// ================================================================================================
// Helper Functions
// ================================================================================================

fn progress_bar(capacity: u64, visible: bool) -> QtradeResult<ProgressBar> {
    let bar = ProgressBar::new(capacity);
    if !visible {
        bar.set_draw_target(ProgressDrawTarget::hidden());
    }
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} epochs ({eta_precise}) {msg}")
            .map_err(EnvError::ProgressBar)?
            .progress_chars("#>-"));
    Ok(bar)
}
