//! Backtest configuration

use crate::error::{BacktestError, Result};
use crate::panel::{AlignConfig, AxisMode};
use crate::types::Date;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Everything the backtest takes from the outside world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// First date of factor data
    pub start_date: Date,
    /// Last date of factor data and of the simulation
    pub end_date: Date,
    /// Training uses dates before this; predictions start here
    pub train_end_date: Date,
    /// Predictions before this date are tagged as validation, the rest as test
    pub validation_end_date: Option<Date>,
    /// Picks per quarter
    pub top_k: usize,
    /// Cumulative importance kept by feature selection
    pub importance_threshold: f64,
    /// Concurrent per-security workers
    pub max_workers: usize,
    /// Days a price lookup may reach back over non-trading days
    pub price_lookback_days: i64,
    pub initial_equity: f64,
    /// Category whose absence disqualifies a security
    pub anchor_category: String,
    pub axis: AxisMode,
    /// First year of the universe timeline (defaults to the start date's year)
    pub universe_start_year: Option<i32>,
    /// Last year of the universe timeline (defaults to the end date's year)
    pub universe_end_year: Option<i32>,
    pub benchmark_symbol: String,
    /// Panel columns never used as model features
    pub excluded_features: Vec<String>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            start_date: ymd(2020, 1, 1),
            end_date: ymd(2024, 12, 31),
            train_end_date: ymd(2023, 1, 1),
            validation_end_date: Some(ymd(2024, 10, 1)),
            top_k: 20,
            importance_threshold: 0.80,
            max_workers: 10,
            price_lookback_days: 10,
            initial_equity: 100.0,
            anchor_category: "quality".to_string(),
            axis: AxisMode::Union,
            universe_start_year: None,
            universe_end_year: None,
            benchmark_symbol: "^GSPC".to_string(),
            excluded_features: Vec::new(),
        }
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Date {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

impl BacktestConfig {
    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.start_date >= self.end_date {
            return Err(BacktestError::ConfigError(format!(
                "start date {} must be before end date {}",
                self.start_date, self.end_date
            )));
        }
        if self.train_end_date <= self.start_date || self.train_end_date > self.end_date {
            return Err(BacktestError::ConfigError(format!(
                "train end date {} must lie in ({}, {}]",
                self.train_end_date, self.start_date, self.end_date
            )));
        }
        if let Some(validation_end) = self.validation_end_date {
            if validation_end < self.train_end_date || validation_end > self.end_date {
                return Err(BacktestError::ConfigError(format!(
                    "validation end date {} must lie in [{}, {}]",
                    validation_end, self.train_end_date, self.end_date
                )));
            }
        }
        if self.top_k == 0 {
            return Err(BacktestError::ConfigError("top_k must be positive".to_string()));
        }
        if !(self.importance_threshold > 0.0 && self.importance_threshold <= 1.0) {
            return Err(BacktestError::ConfigError(format!(
                "importance threshold must be in (0, 1], got {}",
                self.importance_threshold
            )));
        }
        if self.max_workers == 0 {
            return Err(BacktestError::ConfigError(
                "max_workers must be positive".to_string(),
            ));
        }
        if self.price_lookback_days < 0 {
            return Err(BacktestError::ConfigError(
                "price_lookback_days must not be negative".to_string(),
            ));
        }
        if !(self.initial_equity.is_finite() && self.initial_equity > 0.0) {
            return Err(BacktestError::ConfigError(format!(
                "initial equity must be positive, got {}",
                self.initial_equity
            )));
        }
        if self.anchor_category.trim().is_empty() {
            return Err(BacktestError::ConfigError(
                "anchor category must be named".to_string(),
            ));
        }
        let (first, last) = self.universe_years();
        if first > last {
            return Err(BacktestError::ConfigError(format!(
                "universe start year {} is after end year {}",
                first, last
            )));
        }
        Ok(())
    }

    /// Year range covered by the universe timeline
    pub fn universe_years(&self) -> (i32, i32) {
        (
            self.universe_start_year.unwrap_or(self.start_date.year()),
            self.universe_end_year.unwrap_or(self.end_date.year()),
        )
    }

    pub fn align_config(&self) -> AlignConfig {
        AlignConfig {
            anchor_category: self.anchor_category.clone(),
            axis: self.axis,
        }
    }

    /// Parse and validate a TOML document
    #[cfg(feature = "cli")]
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| BacktestError::ConfigError(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "cli")]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}
