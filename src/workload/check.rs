use std::collections::HashSet;
use std::sync::Arc;

use crate::stats::{Metric, MetricSink};

/// Outcome of a single inline assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    /// `::`-joined group path the check ran in, empty at top level.
    pub group: String,
    pub passed: bool,
    pub scenario: String,
    pub worker_id: u64,
    pub iteration: u64,
}

impl CheckResult {
    /// Aggregation key: group path prefixed to the check name.
    pub fn key(&self) -> String {
        if self.group.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.group, self.name)
        }
    }
}

/// Check names a workload declared up front.
#[derive(Debug, Clone, Default)]
pub struct CheckRegistry {
    names: Arc<HashSet<&'static str>>,
}

impl CheckRegistry {
    pub fn new(names: &[&'static str]) -> Self {
        Self {
            names: Arc::new(names.iter().copied().collect()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

/// Records check outcomes for one scenario into the metric stream.
#[derive(Clone)]
pub struct CheckCollector {
    registry: CheckRegistry,
    sink: MetricSink,
}

impl CheckCollector {
    pub fn new(registry: CheckRegistry, sink: MetricSink) -> Self {
        Self { registry, sink }
    }

    /// Append `result` to the stream. Names the workload never registered are
    /// rejected and reported, never aggregated.
    pub fn record(&self, result: CheckResult) -> bool {
        if !self.registry.contains(&result.name) {
            tracing::error!(
                check = %result.name,
                scenario = %result.scenario,
                "check name was not registered by the workload; result discarded"
            );
            return false;
        }
        self.sink.send(Metric::Check(result));
        true
    }
}
