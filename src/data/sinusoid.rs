use std::{collections::BTreeMap, f64::consts::TAU};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    data::{
        domain::{PricePoint, Symbol},
        table::PriceTable,
    },
    error::{DataError, QtradeResult},
};

/// Shape of one synthetic sine-wave price series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SinusoidParams {
    /// Length of one full oscillation, in calendar days.
    pub period: f64,
    /// Date at which the wave crosses `delta` going up.
    #[serde(with = "crate::config::date_format")]
    pub anchor_date: NaiveDate,
    /// Mean price level.
    pub delta: f64,
    /// Amplitude around `delta`.
    pub magnitude: f64,
}

impl SinusoidParams {
    pub fn value_at(&self, date: NaiveDate) -> f64 {
        let days = (date - self.anchor_date).num_days() as f64;
        (days * TAU / self.period).sin() * self.magnitude + self.delta
    }
}

/// Generates one price point per calendar day following a sine wave per symbol.
///
/// Generated points carry no spread (`high == low`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinusoidGenerator {
    symbols: BTreeMap<Symbol, SinusoidParams>,
}

impl SinusoidGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbol(mut self, symbol: impl Into<Symbol>, params: SinusoidParams) -> Self {
        self.symbols.insert(symbol.into(), params);
        self
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.keys()
    }

    pub fn validate(&self) -> QtradeResult<()> {
        if self.symbols.is_empty() {
            return Err(DataError::InvalidConfig("sinusoid source has no symbols".to_string()).into());
        }
        for (symbol, params) in &self.symbols {
            if !(params.period.is_finite() && params.period > 0.0) {
                return Err(DataError::InvalidConfig(format!(
                    "period of '{symbol}' must be positive, got {}",
                    params.period
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Materializes every calendar day in `[start, end]`.
    pub fn generate(&self, start: NaiveDate, end: NaiveDate) -> QtradeResult<PriceTable> {
        self.validate()?;
        if start > end {
            return Err(DataError::InvalidDateRange { start, end }.into());
        }

        let day_count = (end - start).num_days() as usize + 1;
        let dates = start.iter_days().take(day_count).collect::<Vec<_>>();

        let series = self
            .symbols
            .iter()
            .map(|(symbol, params)| {
                let points = dates
                    .iter()
                    .map(|date| PricePoint::flat(params.value_at(*date)))
                    .collect();
                (symbol.clone(), points)
            })
            .collect();

        PriceTable::new(dates, series)
    }
}
