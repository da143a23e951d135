use std::fmt;

use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, EnumIter, EnumString};

use crate::{
    data::{
        domain::{PricePoint, Symbol},
        source::PriceSource,
    },
    error::{AgentError, DataError, QtradeResult, SystemError},
    portfolio::Portfolio,
};

// ================================================================================================
// Actions
// ================================================================================================

/// What to do with one instrument on one date.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum Decision {
    /// Liquidate the whole holding at the day's low.
    Sell,
    #[default]
    Hold,
    /// Spend the balance on as many whole units as the day's high allows.
    Buy,
}

impl Decision {
    pub fn value(self) -> i8 {
        match self {
            Decision::Sell => -1,
            Decision::Hold => 0,
            Decision::Buy => 1,
        }
    }

    pub fn from_value(value: i8) -> QtradeResult<Self> {
        match value {
            -1 => Ok(Decision::Sell),
            0 => Ok(Decision::Hold),
            1 => Ok(Decision::Buy),
            other => Err(AgentError::InvalidBatch(format!(
                "action entries must be -1, 0 or 1, got {other}"
            ))
            .into()),
        }
    }
}

/// One decision per tracked instrument, in the codec's symbol order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(SmallVec<[Decision; 4]>);

impl Action {
    /// The all-zero action.
    pub fn hold(instruments: usize) -> Self {
        Self(SmallVec::from_elem(Decision::Hold, instruments))
    }

    /// An action touching only instrument `idx`.
    pub fn single(instruments: usize, idx: usize, decision: Decision) -> Self {
        let mut action = Self::hold(instruments);
        if let Some(slot) = action.0.get_mut(idx) {
            *slot = decision;
        }
        action
    }

    pub fn from_values(values: &[i8]) -> QtradeResult<Self> {
        values
            .iter()
            .map(|v| Decision::from_value(*v))
            .collect::<QtradeResult<SmallVec<_>>>()
            .map(Self)
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_hold(&self) -> bool {
        self.0.iter().all(|d| *d == Decision::Hold)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().map(|d| d.value()).join(", "))
    }
}

// ================================================================================================
// Records
// ================================================================================================

/// Flat numeric snapshot of the portfolio and the lookback window.
///
/// Layout (see [`StateCodec::state_field_names`]): balance, quantity owned per
/// instrument, then per instrument the high and low of each lookback day from
/// oldest to newest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateRecord(Vec<f64>);

impl StateRecord {
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A [`StateRecord`] followed by the action vector: the unit a model scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateActionRecord(Vec<f64>);

impl StateActionRecord {
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f64>> for StateActionRecord {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

// ================================================================================================
// Codec
// ================================================================================================

/// Converts portfolio and price facts into model inputs and enumerates legal moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCodec {
    symbols: Vec<Symbol>,
    lookback: usize,
}

impl StateCodec {
    pub fn new(symbols: Vec<Symbol>, lookback: usize) -> Self {
        Self { symbols, lookback }
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn instruments(&self) -> usize {
        self.symbols.len()
    }

    pub fn state_len(&self) -> usize {
        1 + self.instruments() * (1 + 2 * self.lookback)
    }

    pub fn state_action_len(&self) -> usize {
        self.state_len() + self.instruments()
    }

    /// Names of the [`StateRecord`] fields, in record order.
    pub fn state_field_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.state_len());
        names.push("balance".to_string());
        names.extend(self.symbols.iter().map(|s| format!("{s}_owned")));
        for symbol in &self.symbols {
            for days_ago in (1..=self.lookback).rev() {
                names.push(format!("{symbol}_high_{days_ago}_days_ago"));
                names.push(format!("{symbol}_low_{days_ago}_days_ago"));
            }
        }
        names
    }

    /// Names of the [`StateActionRecord`] fields, in record order.
    pub fn state_action_field_names(&self) -> Vec<String> {
        let mut names = self.state_field_names();
        names.extend(self.symbols.iter().map(|s| format!("{s}_action")));
        names
    }

    /// Encodes a state from explicit per-instrument windows (oldest first).
    ///
    /// # Errors
    /// [`DataError::InsufficientHistory`] if any window is shorter than the lookback.
    pub fn encode_state(
        &self,
        date: NaiveDate,
        portfolio: &Portfolio,
        history: &[Vec<PricePoint>],
    ) -> QtradeResult<StateRecord> {
        self.check_portfolio(portfolio)?;
        if history.len() != self.instruments() {
            return Err(SystemError::InvariantViolation(format!(
                "expected {} price windows, got {}",
                self.instruments(),
                history.len()
            ))
            .into());
        }

        let mut values = Vec::with_capacity(self.state_len());
        values.push(portfolio.balance());
        values.extend(portfolio.holdings().iter().map(|q| *q as f64));

        for window in history {
            if window.len() < self.lookback {
                return Err(DataError::InsufficientHistory {
                    date,
                    requested: self.lookback,
                    available: window.len(),
                }
                .into());
            }
            // the most recent `lookback` days, oldest first
            for point in &window[window.len() - self.lookback..] {
                values.push(point.high.0);
                values.push(point.low.0);
            }
        }

        Ok(StateRecord(values))
    }

    /// Fetches the lookback windows before `date` from `source` and encodes them.
    pub fn observe(
        &self,
        source: &(impl PriceSource + ?Sized),
        date: NaiveDate,
        portfolio: &Portfolio,
    ) -> QtradeResult<StateRecord> {
        let history = self
            .symbols
            .iter()
            .map(|symbol| source.window(date, self.lookback, symbol))
            .collect::<QtradeResult<Vec<_>>>()?;
        self.encode_state(date, portfolio, &history)
    }

    /// Prices of every tracked instrument on `date`, in symbol order.
    pub fn prices_on(
        &self,
        source: &(impl PriceSource + ?Sized),
        date: NaiveDate,
    ) -> QtradeResult<SmallVec<[PricePoint; 4]>> {
        self.symbols
            .iter()
            .map(|symbol| source.price_for_date(date, symbol))
            .collect()
    }

    /// Hold first, then for each instrument its sell (if owned) and its buy (if affordable).
    ///
    /// Every returned action touches at most one instrument.
    pub fn legal_actions(&self, portfolio: &Portfolio, prices: &[PricePoint]) -> Vec<Action> {
        let n = self.instruments();
        let mut actions = vec![Action::hold(n)];

        for (idx, price) in prices.iter().enumerate().take(n) {
            if portfolio.holding(idx) > 0 {
                actions.push(Action::single(n, idx, Decision::Sell));
            }
            if price.high.0 > 0.0 && price.high.0 <= portfolio.balance() {
                actions.push(Action::single(n, idx, Decision::Buy));
            }
        }

        actions
    }

    pub fn encode_state_action(&self, state: &StateRecord, action: &Action) -> StateActionRecord {
        let mut values = Vec::with_capacity(state.len() + action.len());
        values.extend_from_slice(state.values());
        values.extend(action.decisions().iter().map(|d| d.value() as f64));
        StateActionRecord(values)
    }

    /// One record per candidate action, all sharing `state`.
    pub fn encode_state_actions(
        &self,
        state: &StateRecord,
        actions: &[Action],
    ) -> Vec<StateActionRecord> {
        actions
            .iter()
            .map(|action| self.encode_state_action(state, action))
            .collect()
    }

    fn check_portfolio(&self, portfolio: &Portfolio) -> QtradeResult<()> {
        if portfolio.holdings().len() != self.instruments() {
            return Err(SystemError::InvariantViolation(format!(
                "portfolio tracks {} instruments, codec tracks {}",
                portfolio.holdings().len(),
                self.instruments()
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::table::PriceTable, error::QtradeError};

    // ========================================================================
    // Fixtures
    // ========================================================================

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 3, day).unwrap()
    }

    fn codec() -> StateCodec {
        StateCodec::new(vec![Symbol::from("A"), Symbol::from("B")], 2)
    }

    fn table() -> PriceTable {
        let rows = |base: f64| {
            (1..=4)
                .map(|d| (date(d), PricePoint::new(base + d as f64, base + d as f64 - 0.5)))
                .collect::<Vec<_>>()
        };
        PriceTable::from_rows([(Symbol::from("A"), rows(10.0)), (Symbol::from("B"), rows(20.0))])
            .unwrap()
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    #[test]
    fn state_layout_matches_field_names() {
        let codec = codec();
        let portfolio = Portfolio::from_parts(100.0, vec![3, 0]).unwrap();
        let state = codec.observe(&table(), date(3), &portfolio).unwrap();

        assert_eq!(state.len(), codec.state_len());
        assert_eq!(
            codec.state_field_names(),
            vec![
                "balance",
                "A_owned",
                "B_owned",
                "A_high_2_days_ago",
                "A_low_2_days_ago",
                "A_high_1_days_ago",
                "A_low_1_days_ago",
                "B_high_2_days_ago",
                "B_low_2_days_ago",
                "B_high_1_days_ago",
                "B_low_1_days_ago",
            ]
        );
        assert_eq!(
            state.values(),
            &[100.0, 3.0, 0.0, 11.0, 10.5, 12.0, 11.5, 21.0, 20.5, 22.0, 21.5]
        );
    }

    #[test]
    fn encoding_is_deterministic() {
        let codec = codec();
        let portfolio = Portfolio::from_parts(50.0, vec![1, 2]).unwrap();
        let a = codec.observe(&table(), date(4), &portfolio).unwrap();
        let b = codec.observe(&table(), date(4), &portfolio).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn short_history_is_rejected() {
        let codec = codec();
        let portfolio = Portfolio::new(100.0, 2).unwrap();

        let err = codec.observe(&table(), date(2), &portfolio).unwrap_err();
        assert!(matches!(
            err,
            QtradeError::Data(DataError::InsufficientHistory { requested: 2, .. })
        ));

        let short = vec![vec![PricePoint::flat(1.0)], vec![PricePoint::flat(1.0)]];
        assert!(codec.encode_state(date(2), &portfolio, &short).is_err());
    }

    #[test]
    fn state_action_appends_action_values() {
        let codec = codec();
        let portfolio = Portfolio::new(10.0, 2).unwrap();
        let state = codec.observe(&table(), date(3), &portfolio).unwrap();
        let action = Action::single(2, 1, Decision::Sell);

        let record = codec.encode_state_action(&state, &action);
        assert_eq!(record.len(), codec.state_action_len());
        assert_eq!(&record.values()[..state.len()], state.values());
        assert_eq!(&record.values()[state.len()..], &[0.0, -1.0]);
        assert_eq!(codec.state_action_field_names().last().unwrap(), "B_action");
    }

    // ========================================================================
    // Legal actions
    // ========================================================================

    #[test]
    fn hold_is_always_legal() {
        let codec = codec();
        let broke = Portfolio::new(0.0, 2).unwrap();
        let prices = [PricePoint::new(10.0, 9.0), PricePoint::new(20.0, 19.0)];

        assert_eq!(codec.legal_actions(&broke, &prices), vec![Action::hold(2)]);
    }

    #[test]
    fn sells_require_holdings_and_buys_require_affordable_ask() {
        let codec = codec();
        let portfolio = Portfolio::from_parts(15.0, vec![0, 4]).unwrap();
        let prices = [PricePoint::new(15.0, 9.0), PricePoint::new(20.0, 19.0)];

        let actions = codec.legal_actions(&portfolio, &prices);
        assert_eq!(
            actions,
            vec![
                Action::hold(2),
                Action::single(2, 0, Decision::Buy),
                Action::single(2, 1, Decision::Sell),
            ]
        );
        assert!(
            actions
                .iter()
                .all(|a| a.decisions().iter().filter(|d| **d != Decision::Hold).count() <= 1)
        );
    }

    #[test]
    fn action_values_round_trip_and_display() {
        let action = Action::from_values(&[0, -1, 1]).unwrap();
        assert_eq!(action.to_string(), "[0, -1, 1]");
        assert!(Action::from_values(&[2]).is_err());
        assert!(Action::hold(3).is_hold());
    }
}
