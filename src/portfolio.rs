use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    codec::{Action, Decision},
    data::domain::PricePoint,
    error::{AgentError, QtradeResult, SystemError},
};

/// Signed units executed per instrument in one step: `-owned` on a sell,
/// `+units` on a buy, `0` otherwise.
pub type Fills = SmallVec<[i64; 4]>;

/// Cash balance plus whole-unit holdings, one slot per tracked instrument.
///
/// Holdings are positional: slot `i` belongs to the `i`-th symbol of the
/// [`StateCodec`](crate::codec::StateCodec) the portfolio is used with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    balance: f64,
    holdings: SmallVec<[u64; 4]>,
}

impl Portfolio {
    /// Creates an all-cash portfolio tracking `instruments` instruments.
    pub fn new(balance: f64, instruments: usize) -> QtradeResult<Self> {
        Self::from_parts(balance, SmallVec::from_elem(0, instruments))
    }

    pub fn from_parts(
        balance: f64,
        holdings: impl Into<SmallVec<[u64; 4]>>,
    ) -> QtradeResult<Self> {
        if !(balance.is_finite() && balance >= 0.0) {
            return Err(AgentError::InvalidConfig(format!(
                "balance must be a finite non-negative amount, got {balance}"
            ))
            .into());
        }
        Ok(Self {
            balance,
            holdings: holdings.into(),
        })
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn holdings(&self) -> &[u64] {
        &self.holdings
    }

    pub fn holding(&self, idx: usize) -> u64 {
        self.holdings.get(idx).copied().unwrap_or_default()
    }

    /// Balance plus every holding valued at the day's low price.
    pub fn net_worth(&self, prices: &[PricePoint]) -> f64 {
        self.balance
            + self
                .holdings
                .iter()
                .zip(prices)
                .map(|(qty, price)| *qty as f64 * price.low.0)
                .sum::<f64>()
    }

    /// Applies `action` at the given day's prices.
    ///
    /// Sells liquidate the whole holding at the low, buys spend as much of the
    /// balance as whole units at the high allow. Instruments are processed in
    /// slot order, so a sell earlier in the vector funds a buy later in it.
    pub fn execute(&mut self, action: &Action, prices: &[PricePoint]) -> QtradeResult<Fills> {
        let n = self.holdings.len();
        if action.len() != n || prices.len() != n {
            return Err(SystemError::InvariantViolation(format!(
                "portfolio tracks {n} instruments, got action of {} and {} prices",
                action.len(),
                prices.len()
            ))
            .into());
        }

        let mut fills = Fills::from_elem(0, n);

        for (idx, decision) in action.decisions().iter().enumerate() {
            let price = prices[idx];
            match decision {
                Decision::Sell => {
                    let units = self.holdings[idx];
                    self.balance += units as f64 * price.low.0;
                    self.holdings[idx] = 0;
                    fills[idx] = -(units as i64);
                }
                Decision::Buy if price.high.0 > 0.0 => {
                    let units = (self.balance / price.high.0).floor() as u64;
                    let cost = units as f64 * price.high.0;
                    // floor() keeps cost <= balance up to rounding; never let it dip below zero
                    self.balance = (self.balance - cost).max(0.0);
                    self.holdings[idx] += units;
                    fills[idx] = units as i64;
                }
                Decision::Buy | Decision::Hold => {}
            }
        }

        Ok(fills)
    }
}
