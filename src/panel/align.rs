//! Panel merge/alignment
//!
//! Merges every factor category of one security onto a single date axis.
//! Lower-frequency categories (quarterly filings) are carried forward onto
//! higher-frequency dates (daily prices); nothing is ever carried backward.

use super::table::{CategoryOutput, CategorySet, FactorTable};
use super::{ColumnKey, PanelRow, SecurityPanel};
use crate::error::{BacktestError, Result};
use crate::report::{Skip, SkipUnit};
use crate::types::Date;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which dates make up the aligned panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisMode {
    /// Every date present in any category
    #[default]
    Union,
    /// Only the anchor category's dates; other categories are sampled as-of them
    Anchor,
}

/// Alignment settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignConfig {
    /// Category whose presence decides whether the security is usable at all
    pub anchor_category: String,
    pub axis: AxisMode,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            anchor_category: "quality".to_string(),
            axis: AxisMode::Union,
        }
    }
}

/// Aligned panel plus the categories that could not be merged
#[derive(Debug, Clone, PartialEq)]
pub struct Aligned {
    pub panel: SecurityPanel,
    pub skipped: Vec<Skip>,
}

/// Align all categories of `symbol` and keep rows with `start <= date <= end`.
///
/// Fails with `DataUnavailable` when the anchor category is missing or empty;
/// the caller drops the security. Categories without a date index are skipped
/// and reported in [`Aligned::skipped`].
pub fn align(
    symbol: &str,
    categories: &CategorySet,
    start: Date,
    end: Date,
    config: &AlignConfig,
) -> Result<Aligned> {
    if start > end {
        return Err(BacktestError::ConfigError(format!(
            "alignment window start {} is after end {}",
            start, end
        )));
    }

    let anchor = match categories.get(&config.anchor_category) {
        Some(CategoryOutput::Table(table)) if !table.is_empty() => table,
        _ => {
            return Err(BacktestError::DataUnavailable(format!(
                "no {} factors for {}",
                config.anchor_category, symbol
            )))
        }
    };

    let mut skipped = Vec::new();
    let mut tables: Vec<(&str, &FactorTable)> = vec![(config.anchor_category.as_str(), anchor)];
    for (name, output) in categories.iter() {
        if name == config.anchor_category {
            continue;
        }
        match output {
            CategoryOutput::Table(table) => tables.push((name, table)),
            CategoryOutput::Scalars(_) => {
                let err = BacktestError::missing_column(name, "date");
                log::warn!("Skipping {} for {}: {}", name, symbol, err);
                skipped.push(Skip::from_error(category_unit(symbol, name), &err));
            }
            CategoryOutput::Unavailable(reason) => {
                log::warn!("Skipping {} for {}: {}", name, symbol, reason);
                skipped.push(Skip::new(category_unit(symbol, name), reason.clone()));
            }
        }
    }

    let axis: Vec<Date> = match config.axis {
        AxisMode::Anchor => anchor.dates().collect::<Vec<_>>(),
        AxisMode::Union => tables
            .iter()
            .flat_map(|(_, t)| t.dates())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>(),
    }
    .into_iter()
    .filter(|d| *d >= start && *d <= end)
    .collect();

    let mut keys: Vec<ColumnKey> = Vec::new();
    let mut rows: Vec<PanelRow> = axis
        .iter()
        .map(|date| PanelRow {
            date: *date,
            symbol: symbol.to_string(),
            values: Vec::new(),
        })
        .collect();

    for (name, table) in &tables {
        // anchor columns carry no origin and are never qualified
        let origin = if *name == config.anchor_category { "" } else { *name };
        keys.extend(
            table
                .columns()
                .iter()
                .map(|column| ColumnKey::new(origin, column.as_str())),
        );
        for (row, filled) in rows.iter_mut().zip(table.as_of(&axis)) {
            row.values.extend(filled);
        }
    }

    log::debug!(
        "Aligned {}: {} categories, {} columns, {} rows",
        symbol,
        tables.len(),
        keys.len(),
        rows.len()
    );

    Ok(Aligned {
        panel: SecurityPanel::from_keys(symbol.to_string(), keys, rows),
        skipped,
    })
}

fn category_unit(symbol: &str, category: &str) -> SkipUnit {
    SkipUnit::Category {
        symbol: symbol.to_string(),
        category: category.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use std::collections::BTreeMap;

    fn d(y: i32, m: u32, day: u32) -> Date {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn quality() -> FactorTable {
        let mut table = FactorTable::new(["roe"]);
        table.insert_raw(d(2023, 12, 31), &[0.10]).unwrap();
        table.insert_raw(d(2024, 3, 31), &[0.12]).unwrap();
        table
    }

    fn market() -> FactorTable {
        let mut table = FactorTable::new(["close"]);
        let mut date = d(2024, 3, 28);
        for i in 0..6 {
            table.insert_raw(date, &[100.0 + i as f64]).unwrap();
            date += Duration::days(1);
        }
        table
    }

    fn categories() -> CategorySet {
        CategorySet::new()
            .with("quality", CategoryOutput::Table(quality()))
            .with("market", CategoryOutput::Table(market()))
    }

    #[test]
    fn test_union_axis_carries_quarterly_forward() {
        let aligned = align(
            "AAPL",
            &categories(),
            d(2024, 1, 1),
            d(2024, 12, 31),
            &AlignConfig::default(),
        )
        .unwrap();
        let panel = aligned.panel;

        assert_eq!(panel.columns(), &["roe".to_string(), "close".to_string()]);
        // 6 market dates; 2024-03-31 is one of them, 2023-12-31 is outside the window
        assert_eq!(panel.len(), 6);
        assert_eq!(panel.value(d(2024, 3, 28), "roe"), Some(0.10));
        assert_eq!(panel.value(d(2024, 3, 31), "roe"), Some(0.12));
        assert_eq!(panel.value(d(2024, 4, 2), "roe"), Some(0.12));
        assert!(aligned.skipped.is_empty());
    }

    #[test]
    fn test_anchor_axis_samples_as_of() {
        let config = AlignConfig {
            axis: AxisMode::Anchor,
            ..AlignConfig::default()
        };
        let panel = align("AAPL", &categories(), d(2023, 1, 1), d(2024, 12, 31), &config)
            .unwrap()
            .panel;

        assert_eq!(panel.dates(), vec![d(2023, 12, 31), d(2024, 3, 31)]);
        assert_eq!(panel.value(d(2023, 12, 31), "close"), None);
        assert_eq!(panel.value(d(2024, 3, 31), "close"), Some(103.0));
    }

    #[test]
    fn test_missing_anchor_drops_security() {
        let set = CategorySet::new().with("market", CategoryOutput::Table(market()));
        let err = align("XYZ", &set, d(2024, 1, 1), d(2024, 12, 31), &AlignConfig::default())
            .unwrap_err();
        assert!(matches!(err, BacktestError::DataUnavailable(_)));

        let empty = CategorySet::new().with("quality", CategoryOutput::Table(FactorTable::new(["roe"])));
        assert!(align("XYZ", &empty, d(2024, 1, 1), d(2024, 12, 31), &AlignConfig::default()).is_err());
    }

    #[test]
    fn test_non_table_categories_skipped() {
        let mut scalars = BTreeMap::new();
        scalars.insert("beta".to_string(), 1.1);
        let set = categories()
            .with("style", CategoryOutput::Scalars(scalars))
            .with("risk", CategoryOutput::Unavailable("division by zero".into()));

        let aligned = align("AAPL", &set, d(2024, 1, 1), d(2024, 12, 31), &AlignConfig::default())
            .unwrap();
        assert_eq!(aligned.skipped.len(), 2);
        assert_eq!(aligned.panel.columns().len(), 2);
    }

    #[test]
    fn test_colliding_columns_are_prefixed() {
        let mut growth = FactorTable::new(["roe"]);
        growth.insert_raw(d(2024, 3, 31), &[0.5]).unwrap();
        let set = categories().with("growth", CategoryOutput::Table(growth));

        let panel = align("AAPL", &set, d(2024, 1, 1), d(2024, 12, 31), &AlignConfig::default())
            .unwrap()
            .panel;
        assert!(panel.columns().contains(&"growth_roe".to_string()));
    }

    #[test]
    fn test_alignment_is_deterministic() {
        let a = align("AAPL", &categories(), d(2024, 1, 1), d(2024, 12, 31), &AlignConfig::default())
            .unwrap();
        let b = align("AAPL", &categories(), d(2024, 1, 1), d(2024, 12, 31), &AlignConfig::default())
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_reversed_window_is_config_error() {
        let err = align("AAPL", &categories(), d(2025, 1, 1), d(2024, 1, 1), &AlignConfig::default())
            .unwrap_err();
        assert!(matches!(err, BacktestError::ConfigError(_)));
    }
}
