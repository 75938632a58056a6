//! Error taxonomy and failure-path tests
//!
//! Configuration errors abort before any work starts; data, schema and model
//! problems are recoverable and end up as skips in the run report.

use chrono::{Duration, NaiveDate};
use pit_backtest::{
    config::BacktestConfig,
    data::{InMemoryMarketData, StatementKind},
    engine::Backtest,
    error::BacktestError,
    factors::{MarketDataFactorSource, StatementFieldsCategory},
    model::SoftmaxRegression,
    panel::{align, AlignConfig, CategoryOutput, CategorySet, FactorTable},
    pipeline::CumulativeImportanceSelector,
    types::Bar,
    universe::{build_timeline, ChangeEvent},
    workers::WorkerPool,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

#[test]
fn test_error_messages() {
    let err = BacktestError::missing_column("quality", "date");
    assert_eq!(err.to_string(), "Schema error: quality is missing column 'date'");

    let err = BacktestError::ImportanceMismatch {
        features: 12,
        importances: 11,
    };
    assert!(err.to_string().contains("12 features"));
    assert!(err.to_string().contains("11 importances"));

    let err = BacktestError::WorkerPanic {
        input: "AAPL".to_string(),
        message: "index out of bounds".to_string(),
    };
    assert!(err.to_string().contains("AAPL"));
}

#[test]
fn test_recoverability() {
    assert!(BacktestError::DataUnavailable("no anchor".into()).is_recoverable());
    assert!(BacktestError::missing_column("t", "c").is_recoverable());
    assert!(BacktestError::ModelError("single class".into()).is_recoverable());
    assert!(!BacktestError::ConfigError("bad dates".into()).is_recoverable());
    assert!(!BacktestError::ParseError("bad csv".into()).is_recoverable());
}

#[test]
fn test_io_error_converts() {
    let err: BacktestError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, BacktestError::IoError(_)));
}

#[test]
fn test_invalid_config_rejected_before_run() {
    let config = BacktestConfig {
        train_end_date: d(2019, 1, 1),
        ..BacktestConfig::default()
    };
    assert!(matches!(
        Backtest::new(config),
        Err(BacktestError::ConfigError(_))
    ));
}

#[test]
fn test_empty_event_source_is_data_unavailable() {
    let client = Arc::new(InMemoryMarketData::new());
    let source = MarketDataFactorSource::new(client.clone()).with_category(
        StatementFieldsCategory::new("quality", StatementKind::Income, ["netIncome"]),
    );
    let result = Backtest::new(BacktestConfig::default())
        .unwrap()
        .run(client.as_ref(), &source, SoftmaxRegression::factory());
    assert!(matches!(result, Err(BacktestError::DataUnavailable(_))));

    assert!(matches!(
        build_timeline(&[], 2020, 2024),
        Err(BacktestError::DataUnavailable(_))
    ));
}

#[test]
fn test_universe_without_factors_completes_with_gaps() {
    let mut data = InMemoryMarketData::new();
    data.add_event(ChangeEvent::addition(d(2015, 6, 1), "AAPL"));
    for day in 0..1000 {
        data.add_bar("AAPL", Bar::flat(d(2021, 1, 1) + Duration::days(day), 100.0));
    }
    let client = Arc::new(data);
    let source = MarketDataFactorSource::new(client.clone()).with_category(
        StatementFieldsCategory::new("quality", StatementKind::Income, ["netIncome"]),
    );
    let config = BacktestConfig {
        start_date: d(2021, 1, 1),
        end_date: d(2023, 12, 31),
        train_end_date: d(2023, 1, 1),
        validation_end_date: None,
        ..BacktestConfig::default()
    };

    let outcome = Backtest::new(config)
        .unwrap()
        .run(client.as_ref(), &source, SoftmaxRegression::factory())
        .unwrap();

    assert!(outcome.panel.is_empty());
    assert!(outcome.simulation.predictions.is_empty());
    assert_eq!(outcome.report.skipped_securities(), vec!["AAPL"]);
    assert_eq!(
        outcome.report.skipped_quarters(),
        vec![d(2023, 1, 1), d(2023, 4, 1), d(2023, 7, 1), d(2023, 10, 1)]
    );
    // seed point only
    assert_eq!(outcome.equity.len(), 1);
}

#[test]
fn test_missing_anchor_is_data_unavailable() {
    let mut market = FactorTable::new(["close"]);
    market.insert_raw(d(2024, 1, 2), &[100.0]).unwrap();
    let set = CategorySet::new().with("market", CategoryOutput::Table(market));

    let err = align("AAPL", &set, d(2024, 1, 1), d(2024, 12, 31), &AlignConfig::default())
        .unwrap_err();
    assert!(matches!(err, BacktestError::DataUnavailable(_)));
    assert!(err.is_recoverable());
}

#[test]
fn test_undated_category_is_skipped_not_fatal() {
    let mut quality = FactorTable::new(["roe"]);
    quality.insert_raw(d(2024, 3, 31), &[0.2]).unwrap();
    let mut scalars = BTreeMap::new();
    scalars.insert("beta".to_string(), 1.1);

    let set = CategorySet::new()
        .with("quality", CategoryOutput::Table(quality))
        .with("style", CategoryOutput::Scalars(scalars))
        .with("risk", CategoryOutput::Unavailable("needs 60 days".into()));

    let aligned = align("AAPL", &set, d(2024, 1, 1), d(2024, 12, 31), &AlignConfig::default())
        .unwrap();
    assert_eq!(aligned.panel.len(), 1);
    assert_eq!(aligned.skipped.len(), 2);
}

#[test]
fn test_selection_errors() {
    let features = vec!["a".to_string(), "b".to_string()];
    let selector = CumulativeImportanceSelector::default();
    assert!(matches!(
        selector.select_from_importances(&features, &[1.0]),
        Err(BacktestError::ImportanceMismatch { .. })
    ));
    assert!(matches!(
        CumulativeImportanceSelector::new(0.0),
        Err(BacktestError::ModelError(_))
    ));
}

#[test]
fn test_worker_pool_isolates_panics() {
    let pool = WorkerPool::new(2).unwrap();
    let results = pool.run(vec![1u32, 2, 3], |n| {
        if *n == 2 {
            panic!("bad security");
        }
        Ok(*n * 10)
    });
    assert_eq!(results[0].1.as_ref().unwrap(), &10);
    assert!(matches!(results[1].1, Err(BacktestError::WorkerPanic { .. })));
    assert_eq!(results[2].1.as_ref().unwrap(), &30);
}
