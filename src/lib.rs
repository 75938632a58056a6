//! # pit_backtest
//!
//! Point-in-time walk-forward backtesting of a periodically retrained
//! stock-ranking model.
//!
//! The crate reconstructs historical index membership quarter by quarter,
//! aligns per-security factor categories of different frequencies onto one
//! date axis without carrying anything backward in time, retrains a classifier
//! every quarter on an expanding window and compounds the top-K picks into an
//! equity curve next to a benchmark.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pit_backtest::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let client = Arc::new(InMemoryMarketData::new());
//! let source = MarketDataFactorSource::new(client.clone()).with_category(
//!     StatementFieldsCategory::new("quality", StatementKind::Income, ["netIncome"]),
//! );
//!
//! let backtest = Backtest::new(BacktestConfig::default())?;
//! let outcome = backtest.run(client.as_ref(), &source, SoftmaxRegression::factory())?;
//! println!("{}", outcome.summary);
//! println!("{}", outcome.report);
//! # Ok(())
//! # }
//! ```

pub mod calendar;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod factors;
pub mod io;
pub mod model;
pub mod panel;
pub mod performance;
pub mod pipeline;
pub mod report;
pub mod types;
pub mod universe;
pub mod workers;

pub mod prelude {
    //! Commonly used types and traits
    pub use crate::calendar::{QuarterlyCalendar, RebalanceCalendar};
    pub use crate::config::BacktestConfig;
    pub use crate::data::{
        InMemoryMarketData, MarketDataClient, PriceLookup, PriceTable, ReportingPeriod,
        StatementKind, StatementRow,
    };
    pub use crate::engine::{
        Backtest, BacktestOutcome, Pick, PredictionPeriod, QuarterlyPrediction, SimulationResult,
        WalkForwardSimulator,
    };
    pub use crate::error::{BacktestError, Result};
    pub use crate::factors::{
        CategoryComputer, FactorSource, FnCategory, MarketDataFactorSource, PanelBuilder,
        PriceCategory, SecurityInputs, StatementFieldsCategory,
    };
    pub use crate::model::{Classifier, FeatureImportance, ModelFactory, SoftmaxRegression};
    pub use crate::panel::{
        AlignConfig, AxisMode, CategoryOutput, CategorySet, FactorTable, LabeledPanel,
        MasterPanel, SecurityPanel,
    };
    pub use crate::performance::{EquityCurve, EquityCurveBuilder, EquityPoint, PerformanceSummary};
    pub use crate::pipeline::{CumulativeImportanceSelector, FiveCategoryTarget, MinMaxScaler};
    pub use crate::report::{RunReport, Skip, SkipUnit};
    pub use crate::types::*;
    pub use crate::universe::{build_timeline, ChangeEvent, UniverseSnapshot, UniverseTimeline};
}
