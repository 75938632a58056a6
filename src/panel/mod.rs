//! Security and multi-security factor panels
//!
//! A [`SecurityPanel`] is the aligned, date-indexed view of every factor
//! category for one symbol. A [`MasterPanel`] concatenates them across the
//! universe; a [`LabeledPanel`] adds the forward-return class label.

pub mod align;
pub mod table;

pub use align::{align, AlignConfig, AxisMode};
pub use table::{CategoryOutput, CategorySet, FactorTable, FactorValue};

use crate::types::{ClassLabel, Date, Symbol};
use hashbrown::HashMap;
use std::collections::BTreeSet;

/// One (date, symbol) observation
#[derive(Debug, Clone, PartialEq)]
pub struct PanelRow {
    pub date: Date,
    pub symbol: Symbol,
    pub values: Vec<FactorValue>,
}

/// Where a panel column came from: the producing category and its own
/// column name. Anchor columns have an empty origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnKey {
    pub origin: String,
    pub column: String,
}

impl ColumnKey {
    pub fn new(origin: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            column: column.into(),
        }
    }
}

/// Panel column names for a set of keys.
///
/// A column name produced by more than one category is qualified as
/// `{category}_{column}` for every non-anchor producer. The result depends only
/// on the keys, never on which producer came first.
pub fn resolve_column_names(keys: &[ColumnKey]) -> Vec<String> {
    let mut producers: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for key in keys {
        producers
            .entry(key.column.as_str())
            .or_default()
            .insert(key.origin.as_str());
    }

    keys.iter()
        .map(|key| {
            let shared = producers
                .get(key.column.as_str())
                .map_or(false, |origins| origins.len() > 1);
            if shared && !key.origin.is_empty() {
                format!("{}_{}", key.origin, key.column)
            } else {
                key.column.clone()
            }
        })
        .collect()
}

/// Aligned factor panel for one security
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityPanel {
    pub symbol: Symbol,
    keys: Vec<ColumnKey>,
    columns: Vec<String>,
    rows: Vec<PanelRow>,
}

impl SecurityPanel {
    /// Panel whose columns all belong to the anchor
    pub fn new(symbol: Symbol, columns: Vec<String>, rows: Vec<PanelRow>) -> Self {
        let keys = columns.iter().map(|c| ColumnKey::new("", c.as_str())).collect();
        Self {
            symbol,
            keys,
            columns,
            rows,
        }
    }

    pub fn from_keys(symbol: Symbol, keys: Vec<ColumnKey>, rows: Vec<PanelRow>) -> Self {
        let columns = resolve_column_names(&keys);
        Self {
            symbol,
            keys,
            columns,
            rows,
        }
    }

    pub fn keys(&self) -> &[ColumnKey] {
        &self.keys
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in ascending date order, one per date
    pub fn rows(&self) -> &[PanelRow] {
        &self.rows
    }

    pub fn dates(&self) -> Vec<Date> {
        self.rows.iter().map(|r| r.date).collect()
    }

    pub fn value(&self, date: Date, column: &str) -> FactorValue {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows
            .binary_search_by_key(&date, |r| r.date)
            .ok()
            .and_then(|i| self.rows[i].values[idx])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Concatenated panel across the universe, sorted by (date, symbol)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterPanel {
    columns: Vec<String>,
    rows: Vec<PanelRow>,
}

impl MasterPanel {
    /// Build from raw parts; rows are re-sorted and padded/truncated to the column count
    pub fn from_parts(columns: Vec<String>, mut rows: Vec<PanelRow>) -> Self {
        for row in &mut rows {
            row.values.resize(columns.len(), None);
        }
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.symbol.cmp(&b.symbol)));
        Self { columns, rows }
    }

    /// Concatenate security panels onto the union of their columns.
    ///
    /// Columns are identified by [`ColumnKey`] and named over the whole
    /// universe, so a column holds one category's values for every security
    /// even when another category failed for some of them. Column order is
    /// first appearance over panels sorted by symbol, so the result does not
    /// depend on the order workers finished in.
    pub fn concat(mut panels: Vec<SecurityPanel>) -> Self {
        panels.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let mut keys: Vec<ColumnKey> = Vec::new();
        let mut positions: HashMap<ColumnKey, usize> = HashMap::new();
        for panel in &panels {
            for key in &panel.keys {
                if !positions.contains_key(key) {
                    positions.insert(key.clone(), keys.len());
                    keys.push(key.clone());
                }
            }
        }
        let columns = resolve_column_names(&keys);

        let mut rows = Vec::with_capacity(panels.iter().map(SecurityPanel::len).sum());
        for panel in &panels {
            let mapping: Vec<usize> = panel
                .keys
                .iter()
                .filter_map(|key| positions.get(key).copied())
                .collect();
            for row in &panel.rows {
                let mut values = vec![None; keys.len()];
                for (src, dst) in mapping.iter().enumerate() {
                    values[*dst] = row.values.get(src).copied().flatten();
                }
                rows.push(PanelRow {
                    date: row.date,
                    symbol: row.symbol.clone(),
                    values,
                });
            }
        }

        Self::from_parts(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> &[PanelRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn symbols(&self) -> BTreeSet<Symbol> {
        self.rows.iter().map(|r| r.symbol.clone()).collect()
    }

    /// Rows with `start <= date <= end`
    pub fn restrict(&self, start: Date, end: Date) -> Self {
        self.filter(|row| row.date >= start && row.date <= end)
    }

    pub fn filter(&self, keep: impl Fn(&PanelRow) -> bool) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }
}

/// Panel row with its realized class label
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRow {
    pub row: PanelRow,
    pub target: ClassLabel,
}

impl LabeledRow {
    pub fn date(&self) -> Date {
        self.row.date
    }

    pub fn symbol(&self) -> &str {
        &self.row.symbol
    }
}

/// Master panel rows that carry a defined forward-return label
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledPanel {
    columns: Vec<String>,
    rows: Vec<LabeledRow>,
}

impl LabeledPanel {
    pub fn new(columns: Vec<String>, mut rows: Vec<LabeledRow>) -> Self {
        rows.sort_by(|a, b| {
            a.row
                .date
                .cmp(&b.row.date)
                .then_with(|| a.row.symbol.cmp(&b.row.symbol))
        });
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[LabeledRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> Date {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn panel(symbol: &str, columns: &[&str], rows: &[(Date, Vec<FactorValue>)]) -> SecurityPanel {
        SecurityPanel::new(
            symbol.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|(date, values)| PanelRow {
                    date: *date,
                    symbol: symbol.to_string(),
                    values: values.clone(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_concat_unions_columns() {
        let b = panel("MSFT", &["close", "pe"], &[(d(2024, 1, 2), vec![Some(370.0), Some(35.0)])]);
        let a = panel("AAPL", &["close"], &[(d(2024, 1, 2), vec![Some(185.0)])]);

        let master = MasterPanel::concat(vec![b, a]);
        assert_eq!(master.columns(), &["close".to_string(), "pe".to_string()]);
        assert_eq!(master.rows()[0].symbol, "AAPL");
        assert_eq!(master.rows()[0].values, vec![Some(185.0), None]);
        assert_eq!(master.rows()[1].values, vec![Some(370.0), Some(35.0)]);
    }

    fn pe(value: f64) -> CategoryOutput {
        let mut table = FactorTable::new(["pe"]);
        table.insert_raw(d(2024, 3, 31), &[value]).unwrap();
        CategoryOutput::Table(table)
    }

    #[test]
    fn test_concat_keeps_categories_apart_when_one_failed() {
        let mut quality = FactorTable::new(["roe"]);
        quality.insert_raw(d(2024, 3, 31), &[0.2]).unwrap();

        let aapl = CategorySet::new()
            .with("quality", CategoryOutput::Table(quality.clone()))
            .with("value", pe(10.0))
            .with("growth", pe(999.0));
        let msft = CategorySet::new()
            .with("quality", CategoryOutput::Table(quality))
            .with("value", CategoryOutput::Unavailable("no filings".into()))
            .with("growth", pe(777.0));

        let panels: Vec<SecurityPanel> = [("AAPL", aapl), ("MSFT", msft)]
            .iter()
            .map(|(symbol, set)| {
                align(symbol, set, d(2024, 1, 1), d(2024, 12, 31), &AlignConfig::default())
                    .unwrap()
                    .panel
            })
            .collect();
        // on its own MSFT only has one pe
        assert_eq!(panels[1].columns(), &["roe".to_string(), "pe".to_string()]);

        let master = MasterPanel::concat(panels);
        assert_eq!(
            master.columns(),
            &["roe".to_string(), "value_pe".to_string(), "growth_pe".to_string()]
        );
        let value = master.column_index("value_pe").unwrap();
        let growth = master.column_index("growth_pe").unwrap();
        assert_eq!(master.rows()[0].values[value], Some(10.0));
        assert_eq!(master.rows()[0].values[growth], Some(999.0));
        assert_eq!(master.rows()[1].symbol, "MSFT");
        assert_eq!(master.rows()[1].values[value], None);
        assert_eq!(master.rows()[1].values[growth], Some(777.0));
    }

    #[test]
    fn test_column_names_ignore_producer_order() {
        let keys = vec![
            ColumnKey::new("growth", "pe"),
            ColumnKey::new("", "roe"),
            ColumnKey::new("value", "pe"),
            ColumnKey::new("market", "close"),
        ];
        assert_eq!(
            resolve_column_names(&keys),
            vec!["growth_pe", "roe", "value_pe", "close"]
        );

        let anchored = vec![ColumnKey::new("", "roe"), ColumnKey::new("growth", "roe")];
        assert_eq!(resolve_column_names(&anchored), vec!["roe", "growth_roe"]);
    }

    #[test]
    fn test_concat_is_order_independent() {
        let a = panel("AAPL", &["close"], &[(d(2024, 1, 2), vec![Some(1.0)])]);
        let b = panel("MSFT", &["pe", "close"], &[(d(2024, 1, 2), vec![Some(2.0), Some(3.0)])]);
        assert_eq!(
            MasterPanel::concat(vec![a.clone(), b.clone()]),
            MasterPanel::concat(vec![b, a])
        );
    }

    #[test]
    fn test_restrict() {
        let a = panel(
            "AAPL",
            &["close"],
            &[
                (d(2023, 12, 29), vec![Some(1.0)]),
                (d(2024, 1, 2), vec![Some(2.0)]),
            ],
        );
        let master = MasterPanel::concat(vec![a]).restrict(d(2024, 1, 1), d(2024, 12, 31));
        assert_eq!(master.len(), 1);
        assert_eq!(master.rows()[0].date, d(2024, 1, 2));
    }

    #[test]
    fn test_security_value_lookup() {
        let a = panel("AAPL", &["close"], &[(d(2024, 1, 2), vec![Some(2.0)])]);
        assert_eq!(a.value(d(2024, 1, 2), "close"), Some(2.0));
        assert_eq!(a.value(d(2024, 1, 3), "close"), None);
        assert_eq!(a.value(d(2024, 1, 2), "pe"), None);
    }
}
