//! Per-security factor computation
//!
//! Factor formulas live outside this crate and plug in through
//! [`CategoryComputer`]. [`PanelBuilder`] fans the security list out over a
//! [`WorkerPool`], aligns each security's categories and fans the aligned
//! panels back into one [`MasterPanel`].

use crate::data::{MarketDataClient, ReportingPeriod, StatementKind, StatementRow};
use crate::error::{BacktestError, Result};
use crate::panel::{align, AlignConfig, CategoryOutput, CategorySet, FactorTable, MasterPanel};
use crate::report::{RunReport, Skip, SkipUnit};
use crate::types::{Bar, Date, Symbol};
use crate::workers::WorkerPool;
use chrono::Duration;
use hashbrown::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Raw inputs for one security, fetched once and shared by every category
#[derive(Debug, Clone, Default)]
pub struct SecurityInputs {
    pub symbol: Symbol,
    pub prices: Vec<Bar>,
    pub statements: HashMap<StatementKind, Vec<StatementRow>>,
}

impl SecurityInputs {
    pub fn new(symbol: impl Into<Symbol>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    pub fn statement(&self, kind: StatementKind) -> &[StatementRow] {
        self.statements.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// One factor category (quality, value, momentum, ...) computed from raw inputs
pub trait CategoryComputer: Send + Sync {
    fn name(&self) -> &str;

    fn compute(&self, inputs: &SecurityInputs) -> Result<CategoryOutput>;
}

/// Produces every category output for a security
pub trait FactorSource: Send + Sync {
    fn categories(&self, symbol: &str, start: Date, end: Date) -> Result<CategorySet>;
}

/// Daily close and volume exposed as the `market` category
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceCategory;

impl CategoryComputer for PriceCategory {
    fn name(&self) -> &str {
        "market"
    }

    fn compute(&self, inputs: &SecurityInputs) -> Result<CategoryOutput> {
        let mut table = FactorTable::new(["close", "volume"]);
        for bar in &inputs.prices {
            table.insert_raw(bar.date, &[bar.close, bar.volume])?;
        }
        Ok(CategoryOutput::Table(table))
    }
}

/// Selected statement fields passed through unchanged as a category
#[derive(Debug, Clone)]
pub struct StatementFieldsCategory {
    name: String,
    kind: StatementKind,
    fields: Vec<String>,
}

impl StatementFieldsCategory {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        kind: StatementKind,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl CategoryComputer for StatementFieldsCategory {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, inputs: &SecurityInputs) -> Result<CategoryOutput> {
        let rows = inputs.statement(self.kind);
        let mut table = FactorTable::new(self.fields.iter().cloned());
        for row in rows {
            table.insert(row.date, self.fields.iter().map(|f| row.get(f)).collect())?;
        }
        Ok(CategoryOutput::Table(table))
    }
}

/// Closure-backed category, for plugging in factor formulas
pub struct FnCategory<F> {
    name: String,
    compute: F,
}

impl<F> FnCategory<F>
where
    F: Fn(&SecurityInputs) -> Result<CategoryOutput> + Send + Sync,
{
    pub fn new(name: impl Into<String>, compute: F) -> Self {
        Self {
            name: name.into(),
            compute,
        }
    }
}

impl<F> CategoryComputer for FnCategory<F>
where
    F: Fn(&SecurityInputs) -> Result<CategoryOutput> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, inputs: &SecurityInputs) -> Result<CategoryOutput> {
        (self.compute)(inputs)
    }
}

/// Factor source that pulls raw data from a market-data client
pub struct MarketDataFactorSource<C: MarketDataClient> {
    client: Arc<C>,
    computers: Vec<Box<dyn CategoryComputer>>,
    period: ReportingPeriod,
    /// Extra price history fetched before `start` for look-back factors
    history_days: i64,
}

impl<C: MarketDataClient> MarketDataFactorSource<C> {
    /// Source with the built-in `market` category
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            computers: vec![Box::new(PriceCategory)],
            period: ReportingPeriod::Quarterly,
            history_days: 0,
        }
    }

    pub fn with_category(mut self, computer: impl CategoryComputer + 'static) -> Self {
        self.computers.push(Box::new(computer));
        self
    }

    pub fn with_period(mut self, period: ReportingPeriod) -> Self {
        self.period = period;
        self
    }

    pub fn with_history_days(mut self, days: i64) -> Self {
        self.history_days = days.max(0);
        self
    }

    fn fetch_inputs(&self, symbol: &str, start: Date, end: Date) -> SecurityInputs {
        let mut inputs = SecurityInputs::new(symbol);

        let from = start - Duration::days(self.history_days);
        match self.client.fetch_price_series(symbol, from, end) {
            Ok(bars) => inputs.prices = bars,
            Err(e) => log::warn!("No price series for {}: {}", symbol, e),
        }

        for kind in StatementKind::ALL {
            match self.client.fetch_statement(symbol, kind, self.period) {
                Ok(rows) => {
                    inputs.statements.insert(kind, rows);
                }
                Err(e) => log::warn!("No {:?} statements for {}: {}", kind, symbol, e),
            }
        }

        inputs
    }
}

impl<C: MarketDataClient> FactorSource for MarketDataFactorSource<C> {
    fn categories(&self, symbol: &str, start: Date, end: Date) -> Result<CategorySet> {
        let inputs = self.fetch_inputs(symbol, start, end);
        let mut set = CategorySet::new();

        for computer in &self.computers {
            let output = catch_unwind(AssertUnwindSafe(|| computer.compute(&inputs)))
                .unwrap_or_else(|_| {
                    Err(BacktestError::DataUnavailable(format!(
                        "{} computation panicked",
                        computer.name()
                    )))
                })
                .unwrap_or_else(|e| CategoryOutput::Unavailable(e.to_string()));
            set.insert(computer.name(), output);
        }

        Ok(set)
    }
}

/// Result of a panel build
#[derive(Debug, Clone, Default)]
pub struct PanelBuild {
    pub panel: MasterPanel,
    pub report: RunReport,
    /// Securities that produced an aligned panel
    pub securities: usize,
}

/// Fan-out/fan-in of per-security factor computation and alignment
pub struct PanelBuilder {
    pool: WorkerPool,
    align: AlignConfig,
}

impl PanelBuilder {
    pub fn new(max_workers: usize, align: AlignConfig) -> Result<Self> {
        Ok(Self {
            pool: WorkerPool::new(max_workers)?,
            align,
        })
    }

    pub fn build(
        &self,
        source: &dyn FactorSource,
        symbols: Vec<Symbol>,
        start: Date,
        end: Date,
    ) -> PanelBuild {
        self.build_observed(source, symbols, start, end, |_, _| {})
    }

    /// Build the master panel, reporting each finished security to `on_complete`
    pub fn build_observed(
        &self,
        source: &dyn FactorSource,
        symbols: Vec<Symbol>,
        start: Date,
        end: Date,
        on_complete: impl Fn(&Symbol, bool) + Send + Sync,
    ) -> PanelBuild {
        log::info!(
            "Computing factors for {} securities with {} workers",
            symbols.len(),
            self.pool.max_workers()
        );

        let results = self.pool.run_observed(
            symbols,
            |symbol| {
                let categories = source.categories(symbol, start, end)?;
                align(symbol, &categories, start, end, &self.align)
            },
            on_complete,
        );

        let mut report = RunReport::new();
        let mut panels = Vec::new();
        for (symbol, result) in results {
            match result {
                Ok(aligned) => {
                    aligned.skipped.into_iter().for_each(|s| report.push(s));
                    if aligned.panel.is_empty() {
                        report.skip(SkipUnit::Security(symbol), "no rows inside the date range");
                    } else {
                        panels.push(aligned.panel);
                    }
                }
                Err(e) => {
                    if !e.is_recoverable() {
                        log::error!("Unexpected failure processing {}: {}", symbol, e);
                    }
                    report.push(Skip::from_error(SkipUnit::Security(symbol.clone()), &e));
                    log::warn!("Skipping security {}: {}", symbol, e);
                }
            }
        }

        let securities = panels.len();
        let panel = MasterPanel::concat(panels);
        log::info!(
            "Built master panel: {} securities, {} rows, {} columns",
            securities,
            panel.len(),
            panel.columns().len()
        );

        PanelBuild {
            panel,
            report,
            securities,
        }
    }
}
