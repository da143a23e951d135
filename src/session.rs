pub mod trajectory;

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, info};

use crate::{
    agent::Agent,
    codec::StateCodec,
    data::source::PriceSource,
    error::{DataError, EnvError, QtradeResult, SystemError},
    portfolio::Portfolio,
    session::trajectory::{Trajectory, TrajectoryRecord},
};

// ================================================================================================
// Configuration & Lifecycle
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(with = "crate::config::date_format")]
    pub start_date: NaiveDate,
    #[serde(with = "crate::config::date_format")]
    pub end_date: NaiveDate,
    pub starting_balance: f64,
}

impl SessionConfig {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, starting_balance: f64) -> Self {
        Self {
            start_date,
            end_date,
            starting_balance,
        }
    }
}

/// Lifecycle of a [`Session`].
///
/// ```text
/// Initialized --run()--> Running --(all dates traded)--> Completed
/// ```
///
/// A data error during `run()` leaves the session in `Running`; it can neither
/// be resumed nor restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionStatus {
    Initialized,
    Running,
    Completed,
}

// ================================================================================================
// Session
// ================================================================================================

/// One episode: steps an agent through every available date in `[start, end]`.
pub struct Session<'a, A: Agent + ?Sized> {
    source: Arc<dyn PriceSource>,
    agent: &'a mut A,
    codec: StateCodec,
    config: SessionConfig,
    status: SessionStatus,
    portfolio: Portfolio,
    trajectory: Trajectory,
}

impl<'a, A: Agent + ?Sized> Session<'a, A> {
    /// Prepares a session with an all-cash portfolio over the agent's instruments.
    ///
    /// `source` must hold the session's dates plus the agent's lookback before them.
    pub fn new(
        source: Arc<dyn PriceSource>,
        agent: &'a mut A,
        config: SessionConfig,
    ) -> QtradeResult<Self> {
        if config.start_date > config.end_date {
            return Err(DataError::InvalidDateRange {
                start: config.start_date,
                end: config.end_date,
            }
            .into());
        }

        let codec = agent.codec().clone();
        let portfolio = Portfolio::new(config.starting_balance, codec.instruments())?;
        let day_zero = config.start_date.pred_opt().ok_or_else(|| {
            SystemError::IndexOutOfBounds(format!("no day before {}", config.start_date))
        })?;

        let trajectory = Trajectory::new(
            codec.symbols().to_vec(),
            TrajectoryRecord {
                date: day_zero,
                balance: portfolio.balance(),
                net_worth: portfolio.balance(),
                holdings: portfolio.holdings().into(),
                action: None,
                fills: smallvec::smallvec![0; codec.instruments()],
            },
        );

        Ok(Self {
            source,
            agent,
            codec,
            config,
            status: SessionStatus::Initialized,
            portfolio,
            trajectory,
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    /// Trades every available date of the configured range in ascending order.
    ///
    /// # Errors
    /// [`EnvError::InvalidState`] unless the session is freshly initialized. Data
    /// lookups fail with [`DataError::NotFound`] or [`DataError::InsufficientHistory`].
    #[tracing::instrument(
        skip(self),
        fields(agent = %self.agent.identifier(), start = %self.config.start_date, end = %self.config.end_date)
    )]
    pub fn run(&mut self) -> QtradeResult<&Trajectory> {
        self.check_run_status()?;
        self.status = SessionStatus::Running;

        let dates = self
            .source
            .dates_between(self.config.start_date, self.config.end_date);
        for date in dates {
            self.step(date)?;
        }

        self.status = SessionStatus::Completed;
        info!(
            days = self.trajectory.num_transitions(),
            net_worth = self.trajectory.final_net_worth(),
            "Session completed"
        );
        Ok(&self.trajectory)
    }

    /// Runs the session and hands back its trajectory.
    pub fn run_to_end(mut self) -> QtradeResult<Trajectory> {
        self.run()?;
        Ok(self.trajectory)
    }

    /// The trajectory of a completed session.
    pub fn into_trajectory(self) -> QtradeResult<Trajectory> {
        match self.status {
            SessionStatus::Completed => Ok(self.trajectory),
            status => Err(EnvError::InvalidState(format!(
                "Trajectory is only available once the session is completed (status: {status})"
            ))
            .into()),
        }
    }

    fn step(&mut self, date: NaiveDate) -> QtradeResult<()> {
        let prices = self.codec.prices_on(&*self.source, date)?;
        let legal_actions = self.codec.legal_actions(&self.portfolio, &prices);
        let state = self.codec.observe(&*self.source, date, &self.portfolio)?;

        let action = self.agent.pick_action(&state, &legal_actions)?;
        if !legal_actions.contains(&action) {
            return Err(SystemError::InvariantViolation(format!(
                "agent picked {action} on {date}, which is not a legal action"
            ))
            .into());
        }

        let fills = self.portfolio.execute(&action, &prices)?;
        let record = TrajectoryRecord {
            date,
            balance: self.portfolio.balance(),
            net_worth: self.portfolio.net_worth(&prices),
            holdings: self.portfolio.holdings().into(),
            action: Some(action),
            fills,
        };
        debug!(
            %date,
            action = ?record.action,
            balance = record.balance,
            net_worth = record.net_worth,
            "Executed step"
        );

        self.trajectory.push(record);
        Ok(())
    }

    fn check_run_status(&self) -> QtradeResult<()> {
        use SessionStatus::*;
        match self.status {
            Initialized => Ok(()),
            Running => Err(EnvError::InvalidState(
                "Session is already running or was aborted. Construct a new session.".to_string(),
            )
            .into()),
            Completed => Err(EnvError::InvalidState(
                "Session is completed. Construct a new session per episode.".to_string(),
            )
            .into()),
        }
    }
}
