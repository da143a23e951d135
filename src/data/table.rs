use std::collections::BTreeMap;

use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    data::{
        domain::{PricePoint, Symbol},
        source::PriceSource,
    },
    error::{DataError, QtradeResult},
};

/// In-memory price data: one ascending date axis shared by every symbol.
///
/// All series are aligned with the date axis, so a lookup is a binary search
/// on the dates followed by a direct index into the series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    dates: Vec<NaiveDate>,
    series: BTreeMap<Symbol, Vec<PricePoint>>,
}

impl PriceTable {
    /// Creates a table from an ascending date axis and one aligned series per symbol.
    pub fn new(
        dates: Vec<NaiveDate>,
        series: BTreeMap<Symbol, Vec<PricePoint>>,
    ) -> QtradeResult<Self> {
        if let Some((earlier, later)) = dates.iter().tuple_windows().find(|(a, b)| a >= b) {
            return Err(DataError::InvalidConfig(format!(
                "dates must be strictly ascending, found {earlier} before {later}"
            ))
            .into());
        }

        for (symbol, points) in &series {
            if points.len() != dates.len() {
                return Err(DataError::MisalignedSeries {
                    symbol: symbol.to_string(),
                    expected: dates.len(),
                    got: points.len(),
                }
                .into());
            }
        }

        Ok(Self { dates, series })
    }

    /// Builds a table from `(date, point)` rows per symbol.
    ///
    /// Every symbol must provide exactly the same dates; rows may be unordered.
    pub fn from_rows(
        rows: impl IntoIterator<Item = (Symbol, Vec<(NaiveDate, PricePoint)>)>,
    ) -> QtradeResult<Self> {
        let mut dates: Option<Vec<NaiveDate>> = None;
        let mut series = BTreeMap::new();

        for (symbol, mut points) in rows {
            points.sort_by_key(|(date, _)| *date);
            let symbol_dates = points.iter().map(|(date, _)| *date).collect::<Vec<_>>();

            let axis = dates.get_or_insert_with(|| symbol_dates.clone());
            if *axis != symbol_dates {
                return Err(DataError::InvalidConfig(format!(
                    "dates of '{symbol}' differ from the other symbols"
                ))
                .into());
            }

            series.insert(symbol, points.into_iter().map(|(_, p)| p).collect());
        }

        Self::new(dates.unwrap_or_default(), series)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.series.keys()
    }

    pub fn contains_symbol(&self, symbol: &Symbol) -> bool {
        self.series.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Points of `symbol` aligned with [`PriceSource::available_dates`].
    pub fn series(&self, symbol: &Symbol) -> QtradeResult<&[PricePoint]> {
        self.series
            .get(symbol)
            .map(Vec::as_slice)
            .ok_or_else(|| DataError::UnknownSymbol(symbol.to_string()).into())
    }

    /// Copy of the rows inside `[start, end]` for the requested symbols.
    pub fn slice<'a>(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        symbols: impl IntoIterator<Item = &'a Symbol>,
    ) -> QtradeResult<Self> {
        if start > end {
            return Err(DataError::InvalidDateRange { start, end }.into());
        }

        let from = self.dates.partition_point(|d| *d < start);
        let to = self.dates.partition_point(|d| *d <= end);

        let series = symbols
            .into_iter()
            .map(|symbol| {
                let points = self.series(symbol)?;
                Ok((symbol.clone(), points[from..to].to_vec()))
            })
            .collect::<QtradeResult<BTreeMap<_, _>>>()?;

        Self::new(self.dates[from..to].to_vec(), series)
    }

    fn index_of(&self, date: NaiveDate, symbol: &Symbol) -> QtradeResult<usize> {
        self.dates.binary_search(&date).map_err(|_| {
            DataError::NotFound {
                date,
                symbol: symbol.to_string(),
            }
            .into()
        })
    }

    fn points(&self, date: NaiveDate, symbol: &Symbol) -> QtradeResult<&[PricePoint]> {
        self.series.get(symbol).map(Vec::as_slice).ok_or_else(|| {
            DataError::NotFound {
                date,
                symbol: symbol.to_string(),
            }
            .into()
        })
    }
}

impl PriceSource for PriceTable {
    fn price_for_date(&self, date: NaiveDate, symbol: &Symbol) -> QtradeResult<PricePoint> {
        let points = self.points(date, symbol)?;
        let idx = self.index_of(date, symbol)?;
        Ok(points[idx])
    }

    fn window(
        &self,
        date: NaiveDate,
        num_days: usize,
        symbol: &Symbol,
    ) -> QtradeResult<Vec<PricePoint>> {
        let points = self.points(date, symbol)?;
        let end = self.index_of(date, symbol)?;

        if end < num_days {
            return Err(DataError::InsufficientHistory {
                date,
                requested: num_days,
                available: end,
            }
            .into());
        }

        Ok(points[end - num_days..end].to_vec())
    }

    fn available_dates(&self) -> &[NaiveDate] {
        &self.dates
    }
}
