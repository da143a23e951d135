// 1. Traits
pub use crate::agent::{Agent, Learner};
pub use crate::data::source::PriceSource;
pub use crate::model::Model;

// 2. The Core "Loop" Types
pub use crate::codec::{Action, Decision, StateActionRecord, StateCodec, StateRecord};
pub use crate::portfolio::{Fills, Portfolio};
pub use crate::session::{
    Session, SessionConfig, SessionStatus,
    trajectory::{Trajectory, TrajectoryRecord},
};

// 3. Agents & Models
pub use crate::agent::{
    AgentIdentifier, RandomAgent,
    q_learning::{AgentConfig, QLearningAgent, compute_td_targets},
};
pub use crate::model::{ModelConfig, linear::LinearModel, mlp::MlpModel};

// 4. Price Data
pub use crate::data::domain::{Price, PricePoint, Reward, Symbol};
pub use crate::data::noise::PriceNoise;
pub use crate::data::sinusoid::{SinusoidGenerator, SinusoidParams};
pub use crate::data::table::PriceTable;

// 5. Errors
pub use crate::error::{
    AgentError, DataError, EnvError, IoError, ModelError, QtradeError, QtradeResult, SystemError,
};

// 6. Training, Evaluation & Configs
pub use crate::config::{DataSourceConfig, ExperimentConfig, ExperimentReport, run_experiment};
pub use crate::simulation::{Simulation, SimulationConfig, SimulationReport};
pub use crate::training::{
    EpisodeData, EpochSummary, RewardShaping, Training, TrainingConfig, TrainingReport,
    generate_rewards,
};
