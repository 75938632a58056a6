//! Equity curves and performance analytics
//!
//! The strategy curve compounds the mean simple return of each quarter's picks
//! from one prediction quarter to the next. The benchmark curve is the index
//! price rescaled to the same initial equity.

use crate::data::PriceLookup;
use crate::engine::QuarterlyPrediction;
use crate::report::{RunReport, SkipUnit};
use crate::types::Date;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution};

/// Quarters per year, for annualizing quarterly statistics
const PERIODS_PER_YEAR: f64 = 4.0;

/// Equity value as of a date
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub as_of_date: Date,
    pub equity_value: f64,
}

impl EquityPoint {
    pub fn new(as_of_date: Date, equity_value: f64) -> Self {
        Self {
            as_of_date,
            equity_value,
        }
    }
}

/// Ordered equity points plus the dates or quarters that could not be priced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EquityCurve {
    pub points: Vec<EquityPoint>,
    pub report: RunReport,
}

impl EquityCurve {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn final_equity(&self) -> Option<f64> {
        self.points.last().map(|p| p.equity_value)
    }

    /// Simple return between consecutive points
    pub fn returns(&self) -> Vec<f64> {
        self.points
            .windows(2)
            .filter(|w| w[0].equity_value != 0.0)
            .map(|w| w[1].equity_value / w[0].equity_value - 1.0)
            .collect()
    }

    pub fn summary(&self) -> PerformanceSummary {
        PerformanceSummary::from_curve(self)
    }
}

/// Equity after compounding each period return onto `initial_equity`
pub fn compound(initial_equity: f64, returns: &[f64]) -> Vec<f64> {
    std::iter::once(initial_equity)
        .chain(returns.iter().scan(initial_equity, |equity, r| {
            *equity *= 1.0 + r;
            Some(*equity)
        }))
        .collect()
}

/// Builds strategy and benchmark equity curves
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityCurveBuilder {
    initial_equity: f64,
    lookback_days: i64,
}

impl Default for EquityCurveBuilder {
    fn default() -> Self {
        Self::new(100.0, 10)
    }
}

impl EquityCurveBuilder {
    pub fn new(initial_equity: f64, lookback_days: i64) -> Self {
        Self {
            initial_equity,
            lookback_days,
        }
    }

    /// Strategy curve seeded with `(start, initial_equity)`.
    ///
    /// Each prediction quarter runs until the next prediction's quarter, or
    /// `end` for the last one. Picks without both prices are left out of the
    /// average. A quarter with no priced pick emits no point and is reported.
    pub fn compute_curve(
        &self,
        predictions: &[QuarterlyPrediction],
        prices: &dyn PriceLookup,
        start: Date,
        end: Date,
    ) -> EquityCurve {
        let mut curve = EquityCurve::default();
        let mut equity = self.initial_equity;
        curve.points.push(EquityPoint::new(start, equity));

        let mut ordered: Vec<&QuarterlyPrediction> = predictions.iter().collect();
        ordered.sort_by_key(|p| p.quarter);

        for (i, prediction) in ordered.iter().enumerate() {
            let quarter_start = prediction.quarter;
            if quarter_start < start {
                continue;
            }
            let quarter_end = ordered.get(i + 1).map_or(end, |next| next.quarter);

            let returns: Vec<f64> = prediction
                .picks
                .iter()
                .filter_map(|pick| {
                    let from = prices.price_on_or_before(&pick.symbol, quarter_start, self.lookback_days);
                    let to = prices.price_on_or_before(&pick.symbol, quarter_end, self.lookback_days);
                    match (from, to) {
                        (Some(from), Some(to)) if from != 0.0 => Some(to / from - 1.0),
                        _ => {
                            log::debug!(
                                "No price pair for {} between {} and {}",
                                pick.symbol,
                                quarter_start,
                                quarter_end
                            );
                            None
                        }
                    }
                })
                .collect();

            if returns.is_empty() {
                curve.report.skip(
                    SkipUnit::Date(quarter_end),
                    format!("no priced picks for quarter {}", quarter_start),
                );
                continue;
            }

            let average = returns.iter().sum::<f64>() / returns.len() as f64;
            equity *= 1.0 + average;
            curve.points.push(EquityPoint::new(quarter_end, equity));
        }

        curve
    }

    /// Benchmark curve over `start`, every prediction quarter and `end`.
    ///
    /// Dates without a benchmark price are omitted. Without a price at `start`
    /// the curve is empty.
    pub fn compute_benchmark(
        &self,
        symbol: &str,
        predictions: &[QuarterlyPrediction],
        prices: &dyn PriceLookup,
        start: Date,
        end: Date,
    ) -> EquityCurve {
        let mut curve = EquityCurve::default();

        let mut dates: Vec<Date> = predictions
            .iter()
            .map(|p| p.quarter)
            .filter(|q| *q >= start && *q <= end)
            .collect();
        dates.push(start);
        dates.push(end);
        dates.sort();
        dates.dedup();

        let Some(base) = prices
            .price_on_or_before(symbol, start, self.lookback_days)
            .filter(|p| *p != 0.0)
        else {
            curve.report.skip(
                SkipUnit::Date(start),
                format!("no {} price at strategy start", symbol),
            );
            return curve;
        };

        for date in dates {
            match prices.price_on_or_before(symbol, date, self.lookback_days) {
                Some(price) => curve
                    .points
                    .push(EquityPoint::new(date, price / base * self.initial_equity)),
                None => curve
                    .report
                    .skip(SkipUnit::Date(date), format!("no {} price", symbol)),
            }
        }

        curve
    }
}

/// Performance summary statistics over quarterly periods
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub volatility: f64,
    pub num_periods: usize,
    /// Total return in excess of the benchmark, when one was available
    pub excess_return: Option<f64>,
}

impl PerformanceSummary {
    pub fn from_curve(curve: &EquityCurve) -> Self {
        let returns = curve.returns();
        let total_return = match (curve.points.first(), curve.points.last()) {
            (Some(first), Some(last)) if first.equity_value != 0.0 => {
                last.equity_value / first.equity_value - 1.0
            }
            _ => 0.0,
        };

        let annualized_return = match (curve.points.first(), curve.points.last()) {
            (Some(first), Some(last)) => {
                let days = (last.as_of_date - first.as_of_date).num_days() as f64;
                if days > 0.0 && total_return > -1.0 {
                    (1.0 + total_return).powf(365.25 / days) - 1.0
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        let (mean, std_dev) = if returns.len() >= 2 {
            let data = Data::new(returns.clone());
            (
                data.mean().unwrap_or(0.0),
                data.std_dev().unwrap_or(0.0),
            )
        } else {
            (0.0, 0.0)
        };

        let sharpe_ratio = if std_dev > 0.0 {
            mean / std_dev * PERIODS_PER_YEAR.sqrt()
        } else {
            0.0
        };

        let downside = if returns.is_empty() {
            0.0
        } else {
            (returns
                .iter()
                .filter(|r| **r < 0.0)
                .map(|r| r.powi(2))
                .sum::<f64>()
                / returns.len() as f64)
                .sqrt()
        };
        let sortino_ratio = if downside > 0.0 {
            mean / downside * PERIODS_PER_YEAR.sqrt()
        } else {
            0.0
        };

        Self {
            total_return,
            annualized_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown: max_drawdown(&curve.points),
            volatility: std_dev * PERIODS_PER_YEAR.sqrt(),
            num_periods: returns.len(),
            excess_return: None,
        }
    }

    /// Strategy summary with excess return over the benchmark
    pub fn compare(strategy: &EquityCurve, benchmark: &EquityCurve) -> Self {
        let mut summary = Self::from_curve(strategy);
        if !benchmark.is_empty() {
            let benchmark_return = Self::from_curve(benchmark).total_return;
            summary.excess_return = Some(summary.total_return - benchmark_return);
        }
        summary
    }
}

fn max_drawdown(points: &[EquityPoint]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0;
    for point in points {
        peak = peak.max(point.equity_value);
        if peak > 0.0 {
            worst = f64::max(worst, (peak - point.equity_value) / peak);
        }
    }
    worst
}

impl std::fmt::Display for PerformanceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Performance Summary:")?;
        writeln!(f, "  Total Return:       {:.2}%", self.total_return * 100.0)?;
        writeln!(
            f,
            "  Annualized Return:  {:.2}%",
            self.annualized_return * 100.0
        )?;
        writeln!(f, "  Sharpe Ratio:       {:.2}", self.sharpe_ratio)?;
        writeln!(f, "  Sortino Ratio:      {:.2}", self.sortino_ratio)?;
        writeln!(f, "  Max Drawdown:       {:.2}%", self.max_drawdown * 100.0)?;
        writeln!(f, "  Volatility:         {:.2}%", self.volatility * 100.0)?;
        writeln!(f, "  Periods:            {}", self.num_periods)?;
        if let Some(excess) = self.excess_return {
            writeln!(f, "  Excess vs Benchmark: {:.2}%", excess * 100.0)?;
        }
        Ok(())
    }
}
