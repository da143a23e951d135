use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    agent::Learner,
    data::source::PriceSource,
    error::{DataError, QtradeResult},
    session::{Session, SessionConfig, trajectory::Trajectory},
};

/// Evaluation run of a trained agent over a fixed date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub name: String,
    #[serde(with = "crate::config::date_format")]
    pub start_date: NaiveDate,
    #[serde(with = "crate::config::date_format")]
    pub end_date: NaiveDate,
    pub starting_balance: f64,
}

impl SimulationConfig {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, starting_balance: f64) -> Self {
        Self {
            name: String::new(),
            start_date,
            end_date,
            starting_balance,
        }
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub name: String,
    /// First traded date, after the lookback at the start of the range.
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub starting_balance: f64,
    pub final_net_worth: f64,
    pub total_return: f64,
    pub trajectory: Trajectory,
}

/// Runs one greedy session: exploration is forced to zero and restored afterwards.
pub struct Simulation<'a, L: Learner + ?Sized> {
    source: Arc<dyn PriceSource>,
    agent: &'a mut L,
    config: SimulationConfig,
    session: SessionConfig,
}

impl<'a, L: Learner + ?Sized> Simulation<'a, L> {
    /// Moves the start forward to the first date with a full lookback inside the range.
    ///
    /// # Errors
    /// [`DataError::InsufficientHistory`] if the range holds no more than the lookback.
    pub fn new(
        source: Arc<dyn PriceSource>,
        agent: &'a mut L,
        config: SimulationConfig,
    ) -> QtradeResult<Self> {
        if config.start_date > config.end_date {
            return Err(DataError::InvalidDateRange {
                start: config.start_date,
                end: config.end_date,
            }
            .into());
        }

        let lookback = agent.codec().lookback();
        let dates = source.dates_between(config.start_date, config.end_date);
        let start = dates.get(lookback).copied().ok_or(DataError::InsufficientHistory {
            date: config.end_date,
            requested: lookback + 1,
            available: dates.len(),
        })?;

        let session = SessionConfig::new(start, config.end_date, config.starting_balance);
        Ok(Self {
            source,
            agent,
            config,
            session,
        })
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session
    }

    #[tracing::instrument(skip(self), fields(name = %self.config.name, start = %self.session.start_date))]
    pub fn run(self) -> QtradeResult<SimulationReport> {
        let exploration = self.agent.exploration();
        self.agent.set_exploration(0.0)?;

        let outcome = Session::new(self.source, &mut *self.agent, self.session)
            .and_then(|session| session.run_to_end());
        self.agent.set_exploration(exploration)?;
        let trajectory = outcome?;

        let report = SimulationReport {
            name: self.config.name,
            start_date: self.session.start_date,
            end_date: self.session.end_date,
            starting_balance: self.session.starting_balance,
            final_net_worth: trajectory.final_net_worth(),
            total_return: trajectory.total_return(),
            trajectory,
        };
        info!(
            final_net_worth = report.final_net_worth,
            total_return = report.total_return,
            "Simulation completed"
        );
        Ok(report)
    }
}
