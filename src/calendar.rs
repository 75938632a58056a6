//! Rebalance calendar: quarter boundaries shared by the universe builder,
//! the walk-forward simulator and the equity curve.

use crate::types::Date;
use chrono::{Datelike, NaiveDate};

/// Calendar of rebalance boundaries
pub trait RebalanceCalendar: Send + Sync {
    /// Check if a date is a rebalance boundary
    fn is_boundary(&self, date: Date) -> bool;

    /// First boundary strictly after `date`
    fn next_boundary(&self, date: Date) -> Date;

    /// All boundaries in `[start, end]`. A `start` that is not itself a boundary is
    /// still included as the first element.
    fn boundaries_between(&self, start: Date, end: Date) -> Vec<Date> {
        let mut dates = Vec::new();
        if start > end {
            return dates;
        }

        dates.push(start);
        let mut current = self.next_boundary(start);
        while current <= end {
            dates.push(current);
            current = self.next_boundary(current);
        }

        dates
    }
}

/// Calendar-quarter boundaries (Jan 1, Apr 1, Jul 1, Oct 1)
#[derive(Debug, Clone, Copy, Default)]
pub struct QuarterlyCalendar;

impl QuarterlyCalendar {
    pub fn new() -> Self {
        Self
    }

    /// First day of the quarter containing `date`
    pub fn quarter_start(date: Date) -> Date {
        let month = (date.month0() / 3) * 3 + 1;
        NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
    }

    /// Boundaries from `{start_year}-01-01` through `{end_year}-12-31`
    pub fn year_range(&self, start_year: i32, end_year: i32) -> Vec<Date> {
        match (
            NaiveDate::from_ymd_opt(start_year, 1, 1),
            NaiveDate::from_ymd_opt(end_year, 12, 31),
        ) {
            (Some(start), Some(end)) => self.boundaries_between(start, end),
            _ => Vec::new(),
        }
    }
}

impl RebalanceCalendar for QuarterlyCalendar {
    fn is_boundary(&self, date: Date) -> bool {
        date.day() == 1 && matches!(date.month(), 1 | 4 | 7 | 10)
    }

    fn next_boundary(&self, date: Date) -> Date {
        let start = Self::quarter_start(date);
        let (year, month) = if start.month() == 10 {
            (start.year() + 1, 1)
        } else {
            (start.year(), start.month() + 3)
        };
        NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> Date {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_quarter_start() {
        assert_eq!(QuarterlyCalendar::quarter_start(d(2024, 5, 17)), d(2024, 4, 1));
        assert_eq!(QuarterlyCalendar::quarter_start(d(2024, 12, 31)), d(2024, 10, 1));
        assert_eq!(QuarterlyCalendar::quarter_start(d(2024, 1, 1)), d(2024, 1, 1));
    }

    #[test]
    fn test_next_boundary_rolls_year() {
        let cal = QuarterlyCalendar::new();
        assert_eq!(cal.next_boundary(d(2024, 11, 3)), d(2025, 1, 1));
        assert_eq!(cal.next_boundary(d(2024, 1, 1)), d(2024, 4, 1));
    }

    #[test]
    fn test_year_range() {
        let cal = QuarterlyCalendar::new();
        let dates = cal.year_range(2005, 2006);
        assert_eq!(dates.len(), 8);
        assert_eq!(dates[0], d(2005, 1, 1));
        assert_eq!(dates[7], d(2006, 10, 1));
        assert!(dates.iter().all(|q| cal.is_boundary(*q)));
    }

    #[test]
    fn test_non_boundary_start_is_included() {
        let cal = QuarterlyCalendar::new();
        let dates = cal.boundaries_between(d(2020, 2, 15), d(2020, 7, 1));
        assert_eq!(dates, vec![d(2020, 2, 15), d(2020, 4, 1), d(2020, 7, 1)]);
    }

    #[test]
    fn test_empty_when_reversed() {
        let cal = QuarterlyCalendar::new();
        assert!(cal.boundaries_between(d(2021, 1, 1), d(2020, 1, 1)).is_empty());
    }
}
