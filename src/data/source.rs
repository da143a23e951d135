use std::{fmt::Debug, sync::Arc};

use chrono::NaiveDate;

use crate::{
    data::domain::{PricePoint, Symbol},
    error::QtradeResult,
};

/// Read access to prepared daily price data.
///
/// Implementations must be fully materialized before they are handed to a
/// [`Session`](crate::session::Session): every lookup is synchronous.
pub trait PriceSource: Debug + Send + Sync {
    /// Price extremes of `symbol` on `date`.
    ///
    /// # Errors
    /// [`DataError::NotFound`](crate::error::DataError::NotFound) if the date or
    /// symbol is not part of the prepared data.
    fn price_for_date(&self, date: NaiveDate, symbol: &Symbol) -> QtradeResult<PricePoint>;

    /// The `num_days` trading days strictly before `date`, oldest first.
    ///
    /// # Errors
    /// [`DataError::InsufficientHistory`](crate::error::DataError::InsufficientHistory)
    /// if fewer than `num_days` prepared days precede `date`.
    fn window(
        &self,
        date: NaiveDate,
        num_days: usize,
        symbol: &Symbol,
    ) -> QtradeResult<Vec<PricePoint>>;

    /// All prepared trading dates in ascending order.
    fn available_dates(&self) -> &[NaiveDate];

    /// Prepared trading dates inside `[start, end]`, ascending.
    fn dates_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        self.available_dates()
            .iter()
            .copied()
            .filter(|date| (start..=end).contains(date))
            .collect()
    }
}

impl<T: PriceSource + ?Sized> PriceSource for Arc<T> {
    fn price_for_date(&self, date: NaiveDate, symbol: &Symbol) -> QtradeResult<PricePoint> {
        (**self).price_for_date(date, symbol)
    }

    fn window(
        &self,
        date: NaiveDate,
        num_days: usize,
        symbol: &Symbol,
    ) -> QtradeResult<Vec<PricePoint>> {
        (**self).window(date, num_days, symbol)
    }

    fn available_dates(&self) -> &[NaiveDate] {
        (**self).available_dates()
    }
}
