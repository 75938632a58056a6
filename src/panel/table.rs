//! Date-indexed factor tables produced per security per category

use crate::error::{BacktestError, Result};
use crate::types::Date;
use std::collections::BTreeMap;

/// A single factor value; `None` marks a missing observation
pub type FactorValue = Option<f64>;

/// Factor table for one security and one category.
///
/// Holds at most one row per date. Inserting a second row for a date replaces
/// the earlier one. NaN and infinite values are stored as missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactorTable {
    columns: Vec<String>,
    rows: BTreeMap<Date, Vec<FactorValue>>,
}

impl FactorTable {
    /// Create an empty table with the given columns
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: BTreeMap::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Insert a row. Fails when the value count does not match the column count.
    pub fn insert(&mut self, date: Date, values: Vec<FactorValue>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(BacktestError::DataUnavailable(format!(
                "row for {} has {} values, table has {} columns",
                date,
                values.len(),
                self.columns.len()
            )));
        }
        let values = values
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        self.rows.insert(date, values);
        Ok(())
    }

    /// Insert a row from raw floats, treating NaN as missing
    pub fn insert_raw(&mut self, date: Date, values: &[f64]) -> Result<()> {
        self.insert(date, values.iter().map(|v| Some(*v)).collect())
    }

    /// Rows in ascending date order
    pub fn iter(&self) -> impl Iterator<Item = (&Date, &Vec<FactorValue>)> {
        self.rows.iter()
    }

    pub fn dates(&self) -> impl Iterator<Item = Date> + '_ {
        self.rows.keys().copied()
    }

    pub fn get(&self, date: Date, column: &str) -> FactorValue {
        let idx = self.column_index(column)?;
        self.rows.get(&date).and_then(|row| row[idx])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of every column carried forward onto `axis` (ascending).
    ///
    /// Each output cell holds the latest non-missing source value dated on or
    /// before the axis date, or `None` if there is none yet. Values never move
    /// backward in time.
    pub fn as_of(&self, axis: &[Date]) -> Vec<Vec<FactorValue>> {
        let mut last: Vec<FactorValue> = vec![None; self.columns.len()];
        let mut source = self.rows.iter().peekable();
        let mut out = Vec::with_capacity(axis.len());

        for date in axis {
            while let Some((_, values)) = source.next_if(|(d, _)| *d <= date) {
                for (slot, value) in last.iter_mut().zip(values) {
                    if value.is_some() {
                        *slot = *value;
                    }
                }
            }
            out.push(last.clone());
        }

        out
    }
}

/// What a factor category produced for one security
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryOutput {
    /// Date-indexed table, mergeable onto the panel
    Table(FactorTable),
    /// Scalar values without a date; cannot be aligned
    Scalars(BTreeMap<String, f64>),
    /// The category failed; carries the reason
    Unavailable(String),
}

impl CategoryOutput {
    pub fn as_table(&self) -> Option<&FactorTable> {
        match self {
            CategoryOutput::Table(table) => Some(table),
            _ => None,
        }
    }
}

impl From<Result<FactorTable>> for CategoryOutput {
    fn from(result: Result<FactorTable>) -> Self {
        match result {
            Ok(table) => CategoryOutput::Table(table),
            Err(e) => CategoryOutput::Unavailable(e.to_string()),
        }
    }
}

/// Category outputs for one security, in merge order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategorySet {
    categories: Vec<(String, CategoryOutput)>,
}

impl CategorySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a category, keeping first-insertion order
    pub fn insert(&mut self, name: impl Into<String>, output: CategoryOutput) {
        let name = name.into();
        match self.categories.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = output,
            None => self.categories.push((name, output)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, output: CategoryOutput) -> Self {
        self.insert(name, output);
        self
    }

    pub fn get(&self, name: &str) -> Option<&CategoryOutput> {
        self.categories
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, output)| output)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CategoryOutput)> {
        self.categories.iter().map(|(n, o)| (n.as_str(), o))
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> Date {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_nan_is_missing() {
        let mut table = FactorTable::new(["roe"]);
        table.insert_raw(d(2024, 3, 31), &[f64::NAN]).unwrap();
        assert_eq!(table.get(d(2024, 3, 31), "roe"), None);
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let mut table = FactorTable::new(["a", "b"]);
        assert!(table.insert_raw(d(2024, 1, 1), &[1.0]).is_err());
    }

    #[test]
    fn test_as_of_carries_forward_per_column() {
        let mut table = FactorTable::new(["a", "b"]);
        table.insert(d(2024, 1, 1), vec![Some(1.0), Some(10.0)]).unwrap();
        table.insert(d(2024, 1, 3), vec![Some(2.0), None]).unwrap();

        let axis = [d(2023, 12, 31), d(2024, 1, 1), d(2024, 1, 2), d(2024, 1, 4)];
        let filled = table.as_of(&axis);

        assert_eq!(filled[0], vec![None, None]);
        assert_eq!(filled[1], vec![Some(1.0), Some(10.0)]);
        assert_eq!(filled[2], vec![Some(1.0), Some(10.0)]);
        assert_eq!(filled[3], vec![Some(2.0), Some(10.0)]);
    }

    #[test]
    fn test_category_set_keeps_order() {
        let set = CategorySet::new()
            .with("quality", CategoryOutput::Unavailable("x".into()))
            .with("value", CategoryOutput::Unavailable("y".into()))
            .with("quality", CategoryOutput::Unavailable("z".into()));

        let names: Vec<&str> = set.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["quality", "value"]);
        assert_eq!(
            set.get("quality"),
            Some(&CategoryOutput::Unavailable("z".into()))
        );
    }
}
