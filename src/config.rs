//! JSON experiment files and the pipeline that runs them.
//!
//! An experiment names a data source, a value model and an agent, then lists
//! the trainings to run in order and an optional final simulation.

pub mod date_format;

use std::{fs, path::Path, sync::Arc};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    agent::q_learning::{AgentConfig, QLearningAgent},
    build_rng,
    data::{
        noise::PriceNoise, sinusoid::SinusoidGenerator, source::PriceSource, table::PriceTable,
    },
    error::{DataError, EnvError, IoError, QtradeResult},
    model::ModelConfig,
    simulation::{Simulation, SimulationConfig, SimulationReport},
    training::{Training, TrainingConfig, TrainingReport},
};

// ================================================================================================
// Data sources
// ================================================================================================

/// Where prices come from. Sources are built explicitly and passed around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSourceConfig {
    /// One sine wave per symbol.
    Sinusoid { symbols: SinusoidGenerator },
    /// The child source with multiplicative noise on every price.
    Randomized {
        variance: f64,
        child: Box<DataSourceConfig>,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl DataSourceConfig {
    pub fn validate(&self) -> QtradeResult<()> {
        match self {
            Self::Sinusoid { symbols } => symbols.validate(),
            Self::Randomized {
                variance, child, ..
            } => {
                PriceNoise::new(*variance)?;
                child.validate()
            }
        }
    }

    /// Materializes every price in `[start, end]`.
    pub fn build(&self, start: NaiveDate, end: NaiveDate) -> QtradeResult<PriceTable> {
        match self {
            Self::Sinusoid { symbols } => symbols.generate(start, end),
            Self::Randomized {
                variance,
                child,
                seed,
            } => {
                let parent = child.build(start, end)?;
                let symbols = parent.symbols().cloned().collect::<Vec<_>>();
                let mut rng = build_rng(*seed);
                PriceNoise::new(*variance)?.perturb(&parent, &symbols, start, end, &mut rng)
            }
        }
    }
}

// ================================================================================================
// Experiment
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub model: ModelConfig,
    pub data_source: DataSourceConfig,
    #[serde(default)]
    pub trainings: Vec<TrainingConfig>,
    #[serde(default)]
    pub simulation: Option<SimulationConfig>,
}

impl ExperimentConfig {
    pub fn from_json_str(json: &str) -> QtradeResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(IoError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> QtradeResult<Self> {
        let json = fs::read_to_string(path.as_ref()).map_err(IoError::from)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> QtradeResult<String> {
        Ok(serde_json::to_string_pretty(self).map_err(IoError::from)?)
    }

    pub fn validate(&self) -> QtradeResult<()> {
        self.agent.validate()?;
        self.model.validate()?;
        self.data_source.validate()?;
        self.trainings.iter().try_for_each(TrainingConfig::validate)?;
        if self.trainings.is_empty() && self.simulation.is_none() {
            return Err(EnvError::InvalidConfig(
                "experiment has neither trainings nor a simulation".to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Smallest range covering every training and the simulation.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let ranges = self
            .trainings
            .iter()
            .map(|t| (t.min_start_date, t.max_end_date))
            .chain(self.simulation.iter().map(|s| (s.start_date, s.end_date)));
        ranges.reduce(|(s1, e1), (s2, e2)| (s1.min(s2), e1.max(e2)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentReport {
    pub trainings: Vec<TrainingReport>,
    pub simulation: Option<SimulationReport>,
}

/// Builds source, model and agent from `config`, runs every training in order,
/// then the simulation.
#[tracing::instrument(skip_all, fields(trainings = config.trainings.len()))]
pub fn run_experiment(config: &ExperimentConfig) -> QtradeResult<ExperimentReport> {
    config.validate()?;
    let (start, end) = config.date_range().ok_or_else(|| {
        EnvError::InvalidConfig("experiment has no date range".to_string())
    })?;

    let table = config.data_source.build(start, end)?;
    if let Some(missing) = config.agent.symbols.iter().find(|s| !table.contains_symbol(s)) {
        return Err(DataError::UnknownSymbol(missing.to_string()).into());
    }
    let source: Arc<dyn PriceSource> = Arc::new(table);
    info!(%start, %end, dates = source.available_dates().len(), "Prepared price data");

    let codec = config.agent.codec();
    let model = config.model.build(codec.state_action_len())?;
    let mut agent = QLearningAgent::new(&config.agent, model)?;

    let mut trainings = Vec::with_capacity(config.trainings.len());
    for training in &config.trainings {
        trainings.push(Training::new(source.clone(), &mut agent, training.clone())?.run()?);
    }

    let simulation = config
        .simulation
        .clone()
        .map(|sim| Simulation::new(source.clone(), &mut agent, sim)?.run())
        .transpose()?;

    Ok(ExperimentReport {
        trainings,
        simulation,
    })
}
