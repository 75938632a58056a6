//! Run report: every unit of work that was skipped, and why

use crate::error::BacktestError;
use crate::types::{Date, Symbol};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The unit of work a skip applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipUnit {
    Security(Symbol),
    Category { symbol: Symbol, category: String },
    Quarter(Date),
    Date(Date),
}

impl fmt::Display for SkipUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipUnit::Security(symbol) => write!(f, "security {}", symbol),
            SkipUnit::Category { symbol, category } => {
                write!(f, "category {} of {}", category, symbol)
            }
            SkipUnit::Quarter(date) => write!(f, "quarter {}", date),
            SkipUnit::Date(date) => write!(f, "date {}", date),
        }
    }
}

/// A skipped unit with its reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skip {
    pub unit: SkipUnit,
    pub reason: String,
}

impl Skip {
    pub fn new(unit: SkipUnit, reason: impl Into<String>) -> Self {
        Self {
            unit,
            reason: reason.into(),
        }
    }

    pub fn from_error(unit: SkipUnit, error: &BacktestError) -> Self {
        Self::new(unit, error.to_string())
    }
}

/// Aggregated skips across a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    skips: Vec<Skip>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a skip and log it
    pub fn skip(&mut self, unit: SkipUnit, reason: impl Into<String>) {
        let skip = Skip::new(unit, reason);
        log::warn!("Skipping {}: {}", skip.unit, skip.reason);
        self.skips.push(skip);
    }

    pub fn push(&mut self, skip: Skip) {
        self.skips.push(skip);
    }

    pub fn merge(&mut self, other: RunReport) {
        self.skips.extend(other.skips);
    }

    pub fn skips(&self) -> &[Skip] {
        &self.skips
    }

    pub fn is_clean(&self) -> bool {
        self.skips.is_empty()
    }

    pub fn skipped_securities(&self) -> Vec<&str> {
        self.skips
            .iter()
            .filter_map(|s| match &s.unit {
                SkipUnit::Security(symbol) => Some(symbol.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn skipped_quarters(&self) -> Vec<Date> {
        self.skips
            .iter()
            .filter_map(|s| match s.unit {
                SkipUnit::Quarter(date) => Some(date),
                _ => None,
            })
            .collect()
    }

    pub fn count_categories(&self) -> usize {
        self.skips
            .iter()
            .filter(|s| matches!(s.unit, SkipUnit::Category { .. }))
            .count()
    }

    pub fn count_dates(&self) -> usize {
        self.skips
            .iter()
            .filter(|s| matches!(s.unit, SkipUnit::Date(_)))
            .count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run Report:")?;
        writeln!(f, "  Skipped securities: {}", self.skipped_securities().len())?;
        writeln!(f, "  Skipped categories: {}", self.count_categories())?;
        writeln!(f, "  Skipped quarters:   {}", self.skipped_quarters().len())?;
        writeln!(f, "  Skipped dates:      {}", self.count_dates())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_report_counts() {
        let q = NaiveDate::from_ymd_opt(2023, 4, 1).unwrap();
        let mut report = RunReport::new();
        assert!(report.is_clean());

        report.skip(SkipUnit::Security("ENRN".into()), "no quality data");
        report.skip(SkipUnit::Quarter(q), "empty training set");
        report.skip(
            SkipUnit::Category {
                symbol: "AAPL".into(),
                category: "style".into(),
            },
            "no date column",
        );

        assert_eq!(report.skipped_securities(), vec!["ENRN"]);
        assert_eq!(report.skipped_quarters(), vec![q]);
        assert_eq!(report.count_categories(), 1);
        assert_eq!(report.count_dates(), 0);
        assert!(report.to_string().contains("Skipped quarters:   1"));
    }

    #[test]
    fn test_skip_from_error() {
        let err = BacktestError::ModelError("singular".into());
        let skip = Skip::from_error(SkipUnit::Date(NaiveDate::MIN), &err);
        assert!(skip.reason.contains("singular"));
    }
}
