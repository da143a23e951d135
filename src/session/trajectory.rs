use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{codec::Action, data::domain::Symbol, portfolio::Fills};

/// Portfolio snapshot taken after the day's action was executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub date: NaiveDate,
    pub balance: f64,
    /// Balance plus holdings valued at the day's low.
    pub net_worth: f64,
    pub holdings: SmallVec<[u64; 4]>,
    /// `None` only on the synthetic day-zero record.
    pub action: Option<Action>,
    /// Units actually executed per instrument.
    pub fills: Fills,
}

/// Date-ordered records of one finished session.
///
/// Record 0 is "day zero": the day before the first traded date, holding the
/// starting balance and no position. Every later record is one traded date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    symbols: Vec<Symbol>,
    records: Vec<TrajectoryRecord>,
}

impl Trajectory {
    pub(crate) fn new(symbols: Vec<Symbol>, day_zero: TrajectoryRecord) -> Self {
        Self {
            symbols,
            records: vec![day_zero],
        }
    }

    pub(crate) fn push(&mut self, record: TrajectoryRecord) {
        self.records.push(record);
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn records(&self) -> &[TrajectoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of traded dates.
    pub fn num_transitions(&self) -> usize {
        self.records.len().saturating_sub(1)
    }

    pub fn initial_balance(&self) -> f64 {
        self.records.first().map(|r| r.balance).unwrap_or_default()
    }

    pub fn final_net_worth(&self) -> f64 {
        self.records.last().map(|r| r.net_worth).unwrap_or_default()
    }

    pub fn net_worths(&self) -> impl Iterator<Item = f64> + '_ {
        self.records.iter().map(|r| r.net_worth)
    }

    /// `(before, after)` pairs, one per traded date.
    pub fn transitions(&self) -> impl Iterator<Item = (&TrajectoryRecord, &TrajectoryRecord)> {
        self.records.iter().tuple_windows()
    }

    /// Relative change of net worth over the whole session.
    pub fn total_return(&self) -> f64 {
        let initial = self.initial_balance();
        if initial > 0.0 {
            self.final_net_worth() / initial - 1.0
        } else {
            0.0
        }
    }
}
