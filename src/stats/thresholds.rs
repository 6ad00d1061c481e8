//! Pass/fail criteria evaluated against the final aggregate.
//!
//! Rules are written k6-style as `aggregation operator value`, for example
//! `rate<0.01` on `http_req_failed` or `p(95) < 500` on `http_req_duration`.
//! They are parsed once at startup, so a typo fails the run before any worker
//! starts. Evaluation is a pure function of the aggregator, which makes repeated
//! evaluation of the same snapshot return identical outcomes.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use super::StatsAggregator;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("unknown threshold metric '{0}'")]
    UnknownMetric(String),
    #[error("malformed threshold '{expression}' for metric '{metric}': {reason}")]
    Malformed {
        metric: String,
        expression: String,
        reason: String,
    },
    #[error("aggregation '{aggregation}' is not supported by metric '{metric}'")]
    UnsupportedAggregation { metric: String, aggregation: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThresholdMetric {
    HttpReqFailed,
    HttpReqDuration,
    IterationDuration,
    HttpReqs,
    Iterations,
    DroppedIterations,
    AbortedIterations,
    Checks,
}

impl ThresholdMetric {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "http_req_failed" => Self::HttpReqFailed,
            "http_req_duration" => Self::HttpReqDuration,
            "iteration_duration" => Self::IterationDuration,
            "http_reqs" => Self::HttpReqs,
            "iterations" => Self::Iterations,
            "dropped_iterations" => Self::DroppedIterations,
            "aborted_iterations" => Self::AbortedIterations,
            "checks" => Self::Checks,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::HttpReqFailed => "http_req_failed",
            Self::HttpReqDuration => "http_req_duration",
            Self::IterationDuration => "iteration_duration",
            Self::HttpReqs => "http_reqs",
            Self::Iterations => "iterations",
            Self::DroppedIterations => "dropped_iterations",
            Self::AbortedIterations => "aborted_iterations",
            Self::Checks => "checks",
        }
    }

    fn supports(self, aggregation: Aggregation) -> bool {
        match self {
            Self::HttpReqFailed | Self::Checks => aggregation == Aggregation::Rate,
            Self::HttpReqDuration | Self::IterationDuration => matches!(
                aggregation,
                Aggregation::Avg
                    | Aggregation::Min
                    | Aggregation::Max
                    | Aggregation::Med
                    | Aggregation::Percentile(_)
            ),
            Self::HttpReqs | Self::Iterations | Self::DroppedIterations | Self::AbortedIterations => {
                aggregation == Aggregation::Count
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
}

impl Aggregation {
    fn parse(s: &str) -> Option<Self> {
        let pct = |n: &str| {
            n.trim()
                .parse::<f64>()
                .ok()
                .filter(|p| *p > 0.0 && *p <= 100.0)
                .map(Self::Percentile)
        };
        match s {
            "rate" => Some(Self::Rate),
            "count" => Some(Self::Count),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "med" => Some(Self::Med),
            _ => {
                if let Some(inner) = s.strip_prefix("p(").and_then(|r| r.strip_suffix(')')) {
                    pct(inner)
                } else {
                    s.strip_prefix('p').and_then(pct)
                }
            }
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rate => write!(f, "rate"),
            Self::Count => write!(f, "count"),
            Self::Avg => write!(f, "avg"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Med => write!(f, "med"),
            Self::Percentile(p) => write!(f, "p({})", p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    fn holds(self, actual: f64, target: f64) -> bool {
        match self {
            Self::Lt => actual < target,
            Self::Le => actual <= target,
            Self::Gt => actual > target,
            Self::Ge => actual >= target,
            Self::Eq => (actual - target).abs() < f64::EPSILON,
            Self::Ne => (actual - target).abs() >= f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    pub metric: ThresholdMetric,
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub target: f64,
    /// Expression as written in the config, kept for reporting.
    pub expression: String,
}

impl ThresholdRule {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ThresholdError> {
        let threshold_metric = ThresholdMetric::parse(metric)
            .ok_or_else(|| ThresholdError::UnknownMetric(metric.to_string()))?;
        let malformed = |reason: &str| ThresholdError::Malformed {
            metric: metric.to_string(),
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let op_start = expression
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| malformed("missing comparison operator"))?;
        let (lhs, rest) = expression.split_at(op_start);
        let (comparison, rhs) = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("==", Comparison::Eq),
            ("!=", Comparison::Ne),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ]
        .into_iter()
        .find_map(|(token, cmp)| rest.strip_prefix(token).map(|r| (cmp, r)))
        .ok_or_else(|| malformed("unknown comparison operator"))?;

        let lhs = lhs.trim();
        let aggregation =
            Aggregation::parse(lhs).ok_or_else(|| malformed("unknown aggregation"))?;
        let target = rhs
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| malformed("target is not a number"))?;

        if !threshold_metric.supports(aggregation) {
            return Err(ThresholdError::UnsupportedAggregation {
                metric: metric.to_string(),
                aggregation: lhs.to_string(),
            });
        }

        Ok(Self {
            metric: threshold_metric,
            aggregation,
            comparison,
            target,
            expression: expression.trim().to_string(),
        })
    }

    /// Observed value of this rule's metric/aggregation in `agg`.
    pub fn observe(&self, agg: &StatsAggregator) -> f64 {
        let ms = |d: std::time::Duration| d.as_secs_f64() * 1000.0;
        match (self.metric, self.aggregation) {
            (ThresholdMetric::HttpReqFailed, _) => agg.failed_rate(),
            (ThresholdMetric::Checks, _) => agg.checks_rate(),
            (ThresholdMetric::HttpReqs, _) => agg.total_requests as f64,
            (ThresholdMetric::Iterations, _) => agg.completed_iterations as f64,
            (ThresholdMetric::DroppedIterations, _) => agg.dropped_iterations as f64,
            (ThresholdMetric::AbortedIterations, _) => agg.aborted_iterations as f64,
            (ThresholdMetric::HttpReqDuration, aggregation) => match aggregation {
                Aggregation::Avg => agg.avg_latency_ms(),
                Aggregation::Min => ms(agg.min_duration.unwrap_or_default()),
                Aggregation::Max => ms(agg.max_duration),
                Aggregation::Med => agg.latency_percentile_ms(50.0),
                Aggregation::Percentile(p) => agg.latency_percentile_ms(p),
                Aggregation::Rate | Aggregation::Count => 0.0,
            },
            (ThresholdMetric::IterationDuration, aggregation) => match aggregation {
                Aggregation::Avg => agg.avg_iteration_ms(),
                Aggregation::Min => agg.iteration_min_ms(),
                Aggregation::Max => agg.iteration_max_ms(),
                Aggregation::Med => agg.iteration_percentile_ms(50.0),
                Aggregation::Percentile(p) => agg.iteration_percentile_ms(p),
                Aggregation::Rate | Aggregation::Count => 0.0,
            },
        }
    }
}

/// Parse a `metric -> [expressions]` table in metric-name order.
pub fn parse_rules(table: &BTreeMap<String, Vec<String>>) -> Result<Vec<ThresholdRule>, ThresholdError> {
    let mut rules = Vec::new();
    for (metric, expressions) in table {
        for expression in expressions {
            rules.push(ThresholdRule::parse(metric, expression)?);
        }
    }
    Ok(rules)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdOutcome {
    pub rule: ThresholdRule,
    pub actual: f64,
    pub passed: bool,
}

pub fn evaluate(agg: &StatsAggregator, rules: &[ThresholdRule]) -> Vec<ThresholdOutcome> {
    rules
        .iter()
        .map(|rule| {
            let actual = rule.observe(agg);
            ThresholdOutcome {
                rule: rule.clone(),
                actual,
                passed: rule.comparison.holds(actual, rule.target),
            }
        })
        .collect()
}

pub fn all_passed(outcomes: &[ThresholdOutcome]) -> bool {
    outcomes.iter().all(|o| o.passed)
}

pub fn print_results(outcomes: &[ThresholdOutcome]) {
    if outcomes.is_empty() {
        return;
    }
    println!("Thresholds:");
    for outcome in outcomes {
        let mark = if outcome.passed { "✓" } else { "✗" };
        println!(
            "  {} {} {} (actual: {:.4})",
            mark,
            outcome.rule.metric.name(),
            outcome.rule.expression,
            outcome.actual
        );
    }
    println!();
}
