//! Workload harness: the per-worker context handed to user-defined iterations.
//!
//! A [`Workload`] describes one iteration of traffic. Executors own a pool of
//! [`VuSlot`]s per scenario; each slot pairs a [`Vu`] (identity plus handles to the
//! HTTP collaborator, fixture rows and metric stream) with the workload's own
//! `State`. The slot lives as long as the worker identity, so state such as a
//! cached auth token survives across iterations of that worker and is never
//! visible to any other worker.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

use crate::engine::http_client::HttpCollaborator;
use crate::stats::{Metric, MetricSink, RequestTimings};

pub mod check;
pub mod data;
pub mod group;
pub mod http;

use check::{CheckCollector, CheckRegistry, CheckResult};
use data::{FixtureError, FixtureRow, FixtureSet};
use http::{HttpRequest, HttpResponse};

pub use group::group;

/// User-defined traffic for one scenario.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    /// Worker-local state, created once per worker identity.
    type State: Default + Send + 'static;

    /// Every check name the iteration may record.
    fn checks(&self) -> &'static [&'static str];

    /// Whether each worker needs its own fixture row.
    fn uses_fixtures(&self) -> bool {
        false
    }

    async fn iteration(&self, vu: &mut Vu, state: &mut Self::State);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerIdentity {
    /// Unique across the whole run, 1-based.
    pub id: u64,
    /// 1-based position within the owning scenario.
    pub id_in_scenario: u64,
    /// Iterations started by this worker so far.
    pub iteration: u64,
}

pub struct Vu {
    identity: WorkerIdentity,
    scenario: Arc<str>,
    fixtures: Option<Arc<FixtureSet>>,
    client: Arc<dyn HttpCollaborator>,
    checks: CheckCollector,
    sink: MetricSink,
}

impl Vu {
    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    /// This worker's fixture row (`id_in_scenario - 1`).
    pub fn fixture_row(&self) -> Result<&FixtureRow, FixtureError> {
        let index = (self.identity.id_in_scenario as usize).saturating_sub(1);
        match &self.fixtures {
            Some(set) => set.row(index),
            None => Err(FixtureError::OutOfRange { index, len: 0 }),
        }
    }

    /// Record a check outcome and return it. An unregistered name records
    /// nothing and counts as not passed.
    pub fn check(&self, name: &str, passed: bool) -> bool {
        let recorded = self.checks.record(CheckResult {
            name: name.to_string(),
            group: group::current_group(),
            passed,
            scenario: self.scenario.to_string(),
            worker_id: self.identity.id,
            iteration: self.identity.iteration,
        });
        recorded && passed
    }

    /// Send a request through the collaborator. Transport failures come back as
    /// a status `0` response; every call is recorded as a request metric.
    pub async fn request(&self, request: HttpRequest) -> HttpResponse {
        let start = Instant::now();
        let response = match self.client.execute(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %request.url, error = %e, "request failed");
                let timings = RequestTimings {
                    duration: start.elapsed(),
                    ..Default::default()
                };
                HttpResponse::transport_error(e, timings)
            }
        };

        let group = group::current_group();
        let mut tags: HashMap<String, String> = request.tags.clone();
        tags.insert("name".to_string(), request.name().to_string());
        tags.insert("method".to_string(), request.method.as_str().to_string());
        tags.insert("status".to_string(), response.status.to_string());
        tags.insert("scenario".to_string(), self.scenario.to_string());
        if !group.is_empty() {
            tags.insert("group".to_string(), format!("::{}", group));
        }

        self.sink.send(Metric::Request {
            name: format!("{}{}", group::current_group_prefix(), request.name()),
            timings: response.timings,
            status: response.status,
            error: response.error.clone(),
            tags,
        });
        response
    }

    /// Think time. Suspends only this worker.
    pub async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    pub(crate) fn advance_iteration(&mut self) {
        self.identity.iteration += 1;
    }
}

/// A pooled worker: identity plus the workload state bound to it.
pub struct VuSlot<S> {
    pub vu: Vu,
    pub state: S,
}

/// Builds the workers of one scenario.
#[derive(Clone)]
pub struct VuFactory {
    scenario: Arc<str>,
    id_offset: u64,
    fixtures: Option<Arc<FixtureSet>>,
    client: Arc<dyn HttpCollaborator>,
    checks: CheckCollector,
    sink: MetricSink,
}

impl VuFactory {
    pub fn new(
        scenario: &str,
        id_offset: u64,
        fixtures: Option<Arc<FixtureSet>>,
        client: Arc<dyn HttpCollaborator>,
        registry: CheckRegistry,
        sink: MetricSink,
    ) -> Self {
        Self {
            scenario: Arc::from(scenario),
            id_offset,
            fixtures,
            client,
            checks: CheckCollector::new(registry, sink.clone()),
            sink,
        }
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn sink(&self) -> &MetricSink {
        &self.sink
    }

    pub fn make_vu(&self, id_in_scenario: u64) -> Vu {
        Vu {
            identity: WorkerIdentity {
                id: self.id_offset + id_in_scenario,
                id_in_scenario,
                iteration: 0,
            },
            scenario: self.scenario.clone(),
            fixtures: self.fixtures.clone(),
            client: self.client.clone(),
            checks: self.checks.clone(),
            sink: self.sink.clone(),
        }
    }

    pub fn make_slot<S: Default>(&self, id_in_scenario: u64) -> VuSlot<S> {
        VuSlot {
            vu: self.make_vu(id_in_scenario),
            state: S::default(),
        }
    }
}
