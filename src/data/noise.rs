use std::collections::BTreeMap;

use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    data::{
        domain::{PricePoint, Symbol},
        source::PriceSource,
        table::PriceTable,
    },
    error::{DataError, QtradeResult},
};

/// Multiplicative uniform noise applied on top of an already prepared source.
///
/// Each high and low is scaled independently by `1 + U(-variance, variance)`; the
/// larger result becomes the new high so the spread never inverts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceNoise {
    pub variance: f64,
}

impl PriceNoise {
    pub fn new(variance: f64) -> QtradeResult<Self> {
        if !(0.0..1.0).contains(&variance) {
            return Err(DataError::InvalidConfig(format!(
                "noise variance must be in [0, 1), got {variance}"
            ))
            .into());
        }
        Ok(Self { variance })
    }

    /// Materializes a perturbed copy of `parent` restricted to `[start, end]`.
    pub fn perturb<R: Rng>(
        &self,
        parent: &(impl PriceSource + ?Sized),
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
        rng: &mut R,
    ) -> QtradeResult<PriceTable> {
        if start > end {
            return Err(DataError::InvalidDateRange { start, end }.into());
        }

        let dates = parent.dates_between(start, end);
        let mut series = BTreeMap::new();

        for symbol in symbols {
            let points = dates
                .iter()
                .map(|date| {
                    let point = parent.price_for_date(*date, symbol)?;
                    Ok(self.jitter(point, rng))
                })
                .collect::<QtradeResult<Vec<_>>>()?;
            series.insert(symbol.clone(), points);
        }

        PriceTable::new(dates, series)
    }

    fn jitter<R: Rng>(&self, point: PricePoint, rng: &mut R) -> PricePoint {
        let v = self.variance;
        let high = point.high.0 * (1.0 + rng.random_range(-v..=v));
        let low = point.low.0 * (1.0 + rng.random_range(-v..=v));
        PricePoint::new(high.max(low), high.min(low))
    }
}
