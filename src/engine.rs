//! Walk-forward simulation
//!
//! [`WalkForwardSimulator`] steps through quarter boundaries in order. For
//! each quarter it trains on everything realized before the boundary, restricted
//! to the index members of that quarter, picks the top-K test rows and then
//! folds the scored rows into the next quarter's training set. Quarters are
//! strictly sequential: quarter *q+1* trains on quarter *q*'s outcome.
//!
//! [`Backtest`] wires the whole run together: universe timeline, panel build,
//! labeling, simulation and equity curves.

use crate::calendar::{QuarterlyCalendar, RebalanceCalendar};
use crate::config::BacktestConfig;
use crate::data::{fetch_events, ClientPriceLookup, MarketDataClient};
use crate::error::{BacktestError, Result};
use crate::factors::{FactorSource, PanelBuilder};
use crate::model::ModelFactory;
use crate::panel::{FactorValue, LabeledPanel, LabeledRow, MasterPanel};
use crate::performance::{EquityCurve, EquityCurveBuilder, PerformanceSummary};
use crate::pipeline::{CumulativeImportanceSelector, FiveCategoryTarget, MinMaxScaler};
use crate::report::{RunReport, SkipUnit};
use crate::types::{ClassLabel, Date, Symbol};
use crate::universe::{build_timeline, UniverseSnapshot, UniverseTimeline};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Which evaluation split a prediction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionPeriod {
    Validation,
    Test,
}

impl std::fmt::Display for PredictionPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredictionPeriod::Validation => write!(f, "Validation"),
            PredictionPeriod::Test => write!(f, "Test"),
        }
    }
}

impl std::str::FromStr for PredictionPeriod {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "validation" => Ok(PredictionPeriod::Validation),
            "test" => Ok(PredictionPeriod::Test),
            other => Err(BacktestError::ParseError(format!(
                "unknown prediction period '{}'",
                other
            ))),
        }
    }
}

/// One picked security
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pick {
    pub symbol: Symbol,
    /// Date of the test row the pick came from
    pub date: Date,
    pub class: ClassLabel,
    pub probability: f64,
}

/// Top-K picks for one quarter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarterlyPrediction {
    pub quarter: Date,
    pub period: PredictionPeriod,
    pub picks: Vec<Pick>,
}

impl QuarterlyPrediction {
    pub fn symbols(&self) -> Vec<&str> {
        self.picks.iter().map(|p| p.symbol.as_str()).collect()
    }
}

/// What a quarter was trained and scored on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub quarter: Date,
    pub training_rows: usize,
    pub latest_training_date: Option<Date>,
    pub test_rows: usize,
    pub features: Vec<String>,
}

/// Output of a simulation
#[derive(Debug, Clone, Default)]
pub struct SimulationResult {
    pub predictions: Vec<QuarterlyPrediction>,
    pub windows: Vec<WindowSummary>,
    pub report: RunReport,
}

impl SimulationResult {
    pub fn prediction_for(&self, quarter: Date) -> Option<&QuarterlyPrediction> {
        self.predictions.iter().find(|p| p.quarter == quarter)
    }
}

/// Order candidates by (class desc, probability desc, symbol, date), keep each
/// symbol's best row and return the first `k`.
pub fn rank_top_k(mut candidates: Vec<Pick>, k: usize) -> Vec<Pick> {
    candidates.sort_by(|a, b| {
        b.class
            .cmp(&a.class)
            .then_with(|| b.probability.total_cmp(&a.probability))
            .then_with(|| a.symbol.cmp(&b.symbol))
            .then_with(|| a.date.cmp(&b.date))
    });

    let mut seen = BTreeSet::new();
    candidates
        .into_iter()
        .filter(|pick| seen.insert(pick.symbol.clone()))
        .take(k)
        .collect()
}

/// Expanding-window, per-quarter retraining simulator
pub struct WalkForwardSimulator {
    train_end_date: Date,
    end_date: Date,
    validation_end_date: Option<Date>,
    top_k: usize,
    excluded_features: Vec<String>,
    selector: CumulativeImportanceSelector,
    factory: ModelFactory,
    calendar: Arc<dyn RebalanceCalendar>,
}

impl WalkForwardSimulator {
    pub fn new(config: &BacktestConfig, factory: ModelFactory) -> Result<Self> {
        if config.top_k == 0 {
            return Err(BacktestError::ConfigError("top_k must be positive".to_string()));
        }
        if config.train_end_date > config.end_date {
            return Err(BacktestError::ConfigError(format!(
                "train end date {} is after end date {}",
                config.train_end_date, config.end_date
            )));
        }
        let selector = CumulativeImportanceSelector::new(config.importance_threshold)
            .map_err(|e| BacktestError::ConfigError(e.to_string()))?;

        Ok(Self {
            train_end_date: config.train_end_date,
            end_date: config.end_date,
            validation_end_date: config.validation_end_date,
            top_k: config.top_k,
            excluded_features: config.excluded_features.clone(),
            selector,
            factory,
            calendar: Arc::new(QuarterlyCalendar::new()),
        })
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn RebalanceCalendar>) -> Self {
        self.calendar = calendar;
        self
    }

    /// Prediction quarters: the split date, then every boundary up to the end date
    pub fn quarters(&self) -> Vec<Date> {
        self.calendar
            .boundaries_between(self.train_end_date, self.end_date)
    }

    fn period(&self, quarter: Date) -> PredictionPeriod {
        match self.validation_end_date {
            Some(validation_end) if quarter < validation_end => PredictionPeriod::Validation,
            _ => PredictionPeriod::Test,
        }
    }

    /// Run the simulation over a labeled panel.
    ///
    /// Only configuration problems are returned as errors. Every per-quarter
    /// failure becomes a quarter skip in the report.
    pub fn run(&self, panel: &LabeledPanel, timeline: &UniverseTimeline) -> Result<SimulationResult> {
        self.run_observed(panel, timeline, |_, _| {})
    }

    /// Like [`run`](Self::run), calling `on_quarter(quarter, predicted)` after each quarter
    pub fn run_observed(
        &self,
        panel: &LabeledPanel,
        timeline: &UniverseTimeline,
        mut on_quarter: impl FnMut(Date, bool),
    ) -> Result<SimulationResult> {
        let features: Vec<(usize, String)> = panel
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, name)| !self.excluded_features.contains(name))
            .map(|(i, name)| (i, name.clone()))
            .collect();
        if features.is_empty() {
            return Err(BacktestError::ConfigError(
                "panel has no usable feature columns".to_string(),
            ));
        }

        let quarters = self.quarters();
        let mut result = SimulationResult::default();
        let Some(first_quarter) = quarters.first().copied() else {
            return Ok(result);
        };

        log::info!(
            "Walk-forward over {} quarters from {} to {} ({} labeled rows, {} features)",
            quarters.len(),
            first_quarter,
            self.end_date,
            panel.len(),
            features.len()
        );

        let mut history: Vec<&LabeledRow> = panel
            .rows()
            .iter()
            .filter(|r| r.date() < first_quarter)
            .collect();

        for (i, &quarter) in quarters.iter().enumerate() {
            let next = quarters.get(i + 1).copied();

            let Some(snapshot) = timeline.as_of(quarter) else {
                result
                    .report
                    .skip(SkipUnit::Quarter(quarter), "no universe snapshot at or before quarter");
                on_quarter(quarter, false);
                continue;
            };

            let train: Vec<&LabeledRow> = history
                .iter()
                .copied()
                .filter(|r| r.date() < quarter && snapshot.contains(r.symbol()))
                .collect();
            if train.is_empty() {
                result.report.skip(SkipUnit::Quarter(quarter), "empty training set");
                on_quarter(quarter, false);
                continue;
            }

            let test: Vec<&LabeledRow> = panel
                .rows()
                .iter()
                .filter(|r| in_quarter(r.date(), quarter, next) && snapshot.contains(r.symbol()))
                .collect();
            if test.is_empty() {
                result.report.skip(SkipUnit::Quarter(quarter), "empty test set");
                on_quarter(quarter, false);
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                self.score_quarter(quarter, &train, &test, &features)
            }))
            .unwrap_or_else(|_| {
                Err(BacktestError::ModelError(
                    "model panicked during training or prediction".to_string(),
                ))
            });

            on_quarter(quarter, outcome.is_ok());
            match outcome {
                Ok((prediction, window)) => {
                    log::info!(
                        "Quarter {}: trained on {} rows, {} of {} features, picked {}",
                        quarter,
                        window.training_rows,
                        window.features.len(),
                        features.len(),
                        prediction.picks.len()
                    );
                    result.predictions.push(prediction);
                    result.windows.push(window);

                    history = retain_members(history, snapshot);
                    history.extend(test);
                }
                Err(e) => {
                    result
                        .report
                        .skip(SkipUnit::Quarter(quarter), e.to_string());
                }
            }
        }

        log::info!(
            "Walk-forward finished: {} predictions, {} quarters skipped",
            result.predictions.len(),
            result.report.skipped_quarters().len()
        );

        Ok(result)
    }

    /// Result with every quarter skipped for `reason`
    pub fn skip_all(&self, reason: &str) -> SimulationResult {
        let mut result = SimulationResult::default();
        for quarter in self.quarters() {
            result.report.skip(SkipUnit::Quarter(quarter), reason);
        }
        log::warn!(
            "Skipping all {} quarters: {}",
            result.report.skipped_quarters().len(),
            reason
        );
        result
    }

    fn score_quarter(
        &self,
        quarter: Date,
        train: &[&LabeledRow],
        test: &[&LabeledRow],
        features: &[(usize, String)],
    ) -> Result<(QuarterlyPrediction, WindowSummary)> {
        let feature_names: Vec<String> = features.iter().map(|(_, n)| n.clone()).collect();
        let x_train_raw = feature_matrix(train, features);
        let x_test_raw = feature_matrix(test, features);
        let y_train: Vec<ClassLabel> = train.iter().map(|r| r.target).collect();

        let scaler = MinMaxScaler::fit(&x_train_raw)?;
        let x_train = scaler.transform(&x_train_raw)?;
        let x_test = scaler.transform(&x_test_raw)?;

        let mut selection_model = (self.factory)();
        selection_model.train(&x_train, &y_train)?;
        let importances = selection_model.importances()?;
        let selection = self
            .selector
            .select_from_importances(&feature_names, &importances)?;

        let x_train = project(&x_train, &selection.indices);
        let x_test = project(&x_test, &selection.indices);

        let mut model = (self.factory)();
        model.train(&x_train, &y_train)?;
        let probabilities = model.predict_proba(&x_test)?;
        let classes = model.classes();
        if probabilities.len() != test.len() {
            return Err(BacktestError::ModelError(format!(
                "model returned {} predictions for {} rows",
                probabilities.len(),
                test.len()
            )));
        }

        let candidates = test
            .iter()
            .zip(&probabilities)
            .filter_map(|(row, probs)| {
                let (best, probability) = probs
                    .iter()
                    .copied()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))?;
                Some(Pick {
                    symbol: row.symbol().to_string(),
                    date: row.date(),
                    class: *classes.get(best)?,
                    probability,
                })
            })
            .collect();

        let prediction = QuarterlyPrediction {
            quarter,
            period: self.period(quarter),
            picks: rank_top_k(candidates, self.top_k),
        };
        let window = WindowSummary {
            quarter,
            training_rows: train.len(),
            latest_training_date: train.iter().map(|r| r.date()).max(),
            test_rows: test.len(),
            features: selection.features,
        };

        Ok((prediction, window))
    }
}

fn in_quarter(date: Date, quarter: Date, next: Option<Date>) -> bool {
    date >= quarter && next.map_or(true, |n| date < n)
}

fn retain_members<'a>(rows: Vec<&'a LabeledRow>, snapshot: &UniverseSnapshot) -> Vec<&'a LabeledRow> {
    rows.into_iter()
        .filter(|r| snapshot.contains(r.symbol()))
        .collect()
}

fn feature_matrix(rows: &[&LabeledRow], features: &[(usize, String)]) -> Vec<Vec<FactorValue>> {
    rows.iter()
        .map(|r| features.iter().map(|(i, _)| r.row.values[*i]).collect())
        .collect()
}

fn project(x: &[Vec<f64>], indices: &[usize]) -> Vec<Vec<f64>> {
    x.iter()
        .map(|row| indices.iter().map(|i| row[*i]).collect())
        .collect()
}

/// Everything a full backtest produces
#[derive(Debug, Clone)]
pub struct BacktestOutcome {
    pub timeline: UniverseTimeline,
    pub panel: MasterPanel,
    pub simulation: SimulationResult,
    pub equity: EquityCurve,
    pub benchmark: EquityCurve,
    pub summary: PerformanceSummary,
    /// Skips from every stage
    pub report: RunReport,
}

/// End-to-end backtest driven by a market-data client and a factor source
pub struct Backtest {
    config: BacktestConfig,
    target: FiveCategoryTarget,
}

impl Backtest {
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            target: FiveCategoryTarget::new(),
        })
    }

    pub fn with_target(mut self, target: FiveCategoryTarget) -> Self {
        self.target = target;
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn run(
        &self,
        client: &dyn MarketDataClient,
        source: &dyn FactorSource,
        factory: ModelFactory,
    ) -> Result<BacktestOutcome> {
        self.run_observed(client, source, factory, |_, _| {})
    }

    /// Like [`run`](Self::run), reporting each finished security to `on_security`
    pub fn run_observed(
        &self,
        client: &dyn MarketDataClient,
        source: &dyn FactorSource,
        factory: ModelFactory,
        on_security: impl Fn(&Symbol, bool) + Send + Sync,
    ) -> Result<BacktestOutcome> {
        let config = &self.config;

        let events = fetch_events(client)?;
        let (first_year, last_year) = config.universe_years();
        let timeline = build_timeline(&events, first_year, last_year)?;
        if timeline.all_symbols().is_empty() {
            return Err(BacktestError::DataUnavailable(
                "universe timeline has no members".to_string(),
            ));
        }

        let builder = PanelBuilder::new(config.max_workers, config.align_config())?;
        let symbols: Vec<Symbol> = timeline.all_symbols().into_iter().collect();
        let build = builder.build_observed(
            source,
            symbols,
            config.start_date,
            config.end_date,
            on_security,
        );
        let mut report = build.report;

        let simulator = WalkForwardSimulator::new(config, factory)?;
        let simulation = match self.target.label(&build.panel) {
            Ok(labeled) if !labeled.is_empty() => simulator.run(&labeled, &timeline)?,
            Ok(_) => simulator.skip_all("no labeled rows in the master panel"),
            Err(e) if e.is_recoverable() => {
                log::warn!("Cannot label master panel: {}", e);
                simulator.skip_all(&e.to_string())
            }
            Err(e) => return Err(e),
        };
        report.merge(simulation.report.clone());

        let prices = ClientPriceLookup::new(client);
        let curves = EquityCurveBuilder::new(config.initial_equity, config.price_lookback_days);
        let equity = curves.compute_curve(
            &simulation.predictions,
            &prices,
            config.train_end_date,
            config.end_date,
        );
        let benchmark = curves.compute_benchmark(
            &config.benchmark_symbol,
            &simulation.predictions,
            &prices,
            config.train_end_date,
            config.end_date,
        );
        report.merge(equity.report.clone());
        report.merge(benchmark.report.clone());

        let summary = PerformanceSummary::compare(&equity, &benchmark);

        Ok(BacktestOutcome {
            timeline,
            panel: build.panel,
            simulation,
            equity,
            benchmark,
            summary,
            report,
        })
    }
}
