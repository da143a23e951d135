#![allow(dead_code)]

use std::sync::{Arc, Once};

use chrono::NaiveDate;
use qtrade::prelude::*;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test subscriber once per binary. Honors `RUST_LOG`.
pub fn setup_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// `days` consecutive days from 2020-01-01 with `high == low == price` for every symbol.
pub fn setup_flat_source(symbols: &[&str], price: f64, days: u32) -> Arc<dyn PriceSource> {
    let rows = (0..days)
        .map(|i| {
            let date = ymd(2020, 1, 1) + chrono::Days::new(i as u64);
            (date, PricePoint::flat(price))
        })
        .collect::<Vec<_>>();
    let table =
        PriceTable::from_rows(symbols.iter().map(|s| (Symbol::from(*s), rows.clone()))).unwrap();
    Arc::new(table)
}

/// Two out-of-phase sine waves over 2015, one point per calendar day.
pub fn setup_sinusoid_source() -> Arc<PriceTable> {
    let table = SinusoidGenerator::new()
        .with_symbol(
            "STOCK_1",
            SinusoidParams {
                period: 40.0,
                anchor_date: ymd(2015, 1, 1),
                delta: 100.0,
                magnitude: 30.0,
            },
        )
        .with_symbol(
            "STOCK_2",
            SinusoidParams {
                period: 25.0,
                anchor_date: ymd(2015, 1, 10),
                delta: 60.0,
                magnitude: 10.0,
            },
        )
        .generate(ymd(2015, 1, 1), ymd(2015, 12, 31))
        .unwrap();
    Arc::new(table)
}

pub fn setup_agent_config(symbols: &[&str], lookback: usize) -> AgentConfig {
    AgentConfig::new(symbols.iter().copied(), lookback)
        .with_learning_rate(0.1)
        .with_discount_rate(0.9)
        .with_exploration(0.0)
        .with_seed(7)
}

pub fn setup_linear_agent(config: &AgentConfig) -> QLearningAgent {
    let model = ModelConfig::Linear {
        learning_rate: 0.01,
        passes: 20,
        l2_penalty: 1e-4,
        seed: Some(7),
    }
    .build(config.codec().state_action_len())
    .unwrap();
    QLearningAgent::new(config, model).unwrap()
}

/// Replays a fixed list of actions, holding once the script runs out.
#[derive(Debug)]
pub struct ScriptedAgent {
    codec: StateCodec,
    script: Vec<Action>,
    step: usize,
}

impl ScriptedAgent {
    pub fn new(codec: StateCodec, script: Vec<Action>) -> Self {
        Self {
            codec,
            script,
            step: 0,
        }
    }
}

impl Agent for ScriptedAgent {
    fn pick_action(
        &mut self,
        _state: &StateRecord,
        legal_actions: &[Action],
    ) -> QtradeResult<Action> {
        let wanted = self
            .script
            .get(self.step)
            .cloned()
            .unwrap_or_else(|| Action::hold(self.codec.instruments()));
        self.step += 1;
        Ok(if legal_actions.contains(&wanted) {
            wanted
        } else {
            Action::hold(self.codec.instruments())
        })
    }

    fn codec(&self) -> &StateCodec {
        &self.codec
    }

    fn identifier(&self) -> AgentIdentifier {
        AgentIdentifier::Named(Arc::new("Scripted".to_string()))
    }
}

/// Deterministic model: scores a record by its action fields, counts fits.
#[derive(Debug, Default)]
pub struct StubModel {
    pub weights: Vec<f64>,
    pub fits: usize,
}

impl Model for StubModel {
    fn predict(&self, records: &[StateActionRecord]) -> QtradeResult<Vec<f64>> {
        Ok(records
            .iter()
            .map(|r| {
                let values = r.values();
                let tail = &values[values.len() - self.weights.len()..];
                tail.iter().zip(&self.weights).map(|(x, w)| x * w).sum()
            })
            .collect())
    }

    fn fit(&mut self, _records: &[StateActionRecord], _targets: &[f64]) -> QtradeResult<()> {
        self.fits += 1;
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.fits > 0
    }
}
