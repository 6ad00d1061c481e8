use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::cli::config::ConfigError;
use crate::stats::thresholds::{ThresholdError, ThresholdRule};
use crate::stats::{IterationOutcome, Metric, MetricSink};
use crate::workload::check::CheckRegistry;
use crate::workload::data::{FixtureError, FixtureSet};
use crate::workload::{VuFactory, VuSlot, Workload};

pub mod arrival_rate;
pub mod control;
pub mod http_client;
pub mod profile;
pub mod ramping;

use control::{ControlState, StopSignal};
use http_client::HttpCollaborator;
use profile::{ScenarioPlan, ScenarioProfile, ScenarioSummary};

/// Executor control-loop period.
pub const CONTROL_TICK: std::time::Duration = std::time::Duration::from_millis(100);

/// Anything that prevents a run from starting. Nothing here is raised once
/// workers are running.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("scenario '{scenario}' references unknown workload '{exec}'")]
    UnknownWorkload { scenario: String, exec: String },
    #[error("scenario '{scenario}' needs {required} fixture rows but {available} are loaded")]
    InsufficientFixtures {
        scenario: String,
        required: usize,
        available: usize,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fixture(#[from] FixtureError),
    #[error(transparent)]
    Threshold(#[from] ThresholdError),
}

/// Validated run: scenarios in launch order plus parsed thresholds.
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    pub scenarios: Vec<ScenarioPlan>,
    pub thresholds: Vec<ThresholdRule>,
}

impl RunPlan {
    /// Order scenarios by name and hand each a contiguous block of worker ids
    /// sized to its capacity.
    pub fn new(mut scenarios: Vec<ScenarioPlan>, thresholds: Vec<ThresholdRule>) -> Self {
        scenarios.sort_by(|a, b| a.name.cmp(&b.name));
        let mut offset = 0u64;
        for scenario in &mut scenarios {
            scenario.id_offset = offset;
            offset += scenario.profile.capacity() as u64;
        }
        Self {
            scenarios,
            thresholds,
        }
    }

    pub fn total_capacity(&self) -> usize {
        self.scenarios.iter().map(|s| s.profile.capacity()).sum()
    }
}

/// Per-worker signal from the executor that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Active,
    /// Finish the current iteration, then stop.
    Retiring,
    /// Abandon the current iteration now.
    Halt,
}

/// Resolves when `rx` reaches [`Lifecycle::Halt`]; pending forever if the
/// executor went away first.
pub(crate) async fn halted(rx: &mut watch::Receiver<Lifecycle>) {
    if rx.wait_for(|l| *l == Lifecycle::Halt).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Run one iteration of `workload` on `slot`, racing it against a halt.
pub(crate) async fn run_iteration<W: Workload>(
    workload: &W,
    slot: &mut VuSlot<W::State>,
    lifecycle: &mut watch::Receiver<Lifecycle>,
    sink: &MetricSink,
    scenario: &str,
) -> IterationOutcome {
    let start = Instant::now();
    let outcome = tokio::select! {
        biased;
        _ = halted(lifecycle) => IterationOutcome::Aborted,
        result = AssertUnwindSafe(workload.iteration(&mut slot.vu, &mut slot.state)).catch_unwind() => {
            match result {
                Ok(()) => IterationOutcome::Completed,
                Err(_) => {
                    tracing::error!(
                        scenario,
                        worker = slot.vu.identity().id,
                        iteration = slot.vu.identity().iteration,
                        "iteration panicked, worker state reset"
                    );
                    slot.state = W::State::default();
                    IterationOutcome::Aborted
                }
            }
        }
    };
    if outcome == IterationOutcome::Aborted {
        tracing::debug!(
            scenario,
            worker = slot.vu.identity().id,
            iteration = slot.vu.identity().iteration,
            "iteration aborted after graceful period"
        );
    }
    slot.vu.advance_iteration();
    sink.send(Metric::Iteration {
        scenario: scenario.to_string(),
        duration: start.elapsed(),
        outcome,
    });
    outcome
}

/// What an executor needs besides its profile.
pub(crate) struct ScenarioContext {
    pub plan: ScenarioPlan,
    pub vus: VuFactory,
    pub stop: StopSignal,
}

/// Type-erased entry of the workload registry.
trait ScenarioLauncher: Send + Sync {
    fn checks(&self) -> &'static [&'static str];
    fn uses_fixtures(&self) -> bool;
    fn launch(&self, ctx: ScenarioContext) -> BoxFuture<'static, ScenarioSummary>;
}

struct Registered<W>(Arc<W>);

impl<W: Workload> ScenarioLauncher for Registered<W> {
    fn checks(&self) -> &'static [&'static str] {
        self.0.checks()
    }

    fn uses_fixtures(&self) -> bool {
        self.0.uses_fixtures()
    }

    fn launch(&self, ctx: ScenarioContext) -> BoxFuture<'static, ScenarioSummary> {
        let workload = self.0.clone();
        match ctx.plan.profile.clone() {
            ScenarioProfile::Ramping(profile) => ramping::run(workload, ctx, profile).boxed(),
            ScenarioProfile::ArrivalRate(profile) => {
                arrival_rate::run(workload, ctx, profile).boxed()
            }
        }
    }
}

pub struct Engine {
    workloads: HashMap<String, Arc<dyn ScenarioLauncher>>,
    client: Arc<dyn HttpCollaborator>,
    fixtures: Option<Arc<FixtureSet>>,
}

impl Engine {
    pub fn new(client: Arc<dyn HttpCollaborator>) -> Self {
        Self {
            workloads: HashMap::new(),
            client,
            fixtures: None,
        }
    }

    /// Make `workload` available to scenarios whose `exec` is `name`.
    pub fn register<W: Workload>(&mut self, name: impl Into<String>, workload: W) -> &mut Self {
        self.workloads
            .insert(name.into(), Arc::new(Registered(Arc::new(workload))));
        self
    }

    pub fn set_fixtures(&mut self, fixtures: Arc<FixtureSet>) -> &mut Self {
        self.fixtures = Some(fixtures);
        self
    }

    pub fn workload_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.workloads.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether any scenario of `plan` runs a workload that reads fixture rows.
    pub fn needs_fixtures(&self, plan: &RunPlan) -> bool {
        plan.scenarios.iter().any(|s| {
            self.workloads
                .get(&s.exec)
                .map(|l| l.uses_fixtures())
                .unwrap_or(false)
        })
    }

    /// Fixture rows the run needs: the largest capacity among scenarios whose
    /// workload reads rows. Zero when none does.
    pub fn fixture_capacity(&self, plan: &RunPlan) -> usize {
        plan.scenarios
            .iter()
            .filter(|s| {
                self.workloads
                    .get(&s.exec)
                    .map(|l| l.uses_fixtures())
                    .unwrap_or(false)
            })
            .map(|s| s.profile.capacity())
            .max()
            .unwrap_or(0)
    }

    /// Everything that must hold before the first worker starts.
    pub fn check_setup(&self, plan: &RunPlan) -> Result<(), SetupError> {
        for scenario in &plan.scenarios {
            let launcher =
                self.workloads
                    .get(&scenario.exec)
                    .ok_or_else(|| SetupError::UnknownWorkload {
                        scenario: scenario.name.clone(),
                        exec: scenario.exec.clone(),
                    })?;
            if launcher.uses_fixtures() {
                let required = scenario.profile.capacity();
                let available = self.fixtures.as_ref().map(|f| f.len()).unwrap_or(0);
                if available < required {
                    return Err(SetupError::InsufficientFixtures {
                        scenario: scenario.name.clone(),
                        required,
                        available,
                    });
                }
            }
        }
        Ok(())
    }

    /// Run every scenario of `plan` concurrently until all have finished.
    pub async fn run(
        &self,
        plan: &RunPlan,
        control: &ControlState,
        sink: MetricSink,
    ) -> Result<Vec<ScenarioSummary>, SetupError> {
        self.check_setup(plan)?;

        let mut handles = Vec::with_capacity(plan.scenarios.len());
        for scenario in &plan.scenarios {
            let launcher = match self.workloads.get(&scenario.exec) {
                Some(l) => l.clone(),
                None => continue,
            };
            let ctx = ScenarioContext {
                plan: scenario.clone(),
                vus: VuFactory::new(
                    &scenario.name,
                    scenario.id_offset,
                    self.fixtures.clone(),
                    self.client.clone(),
                    CheckRegistry::new(launcher.checks()),
                    sink.clone(),
                ),
                stop: control.subscribe(),
            };
            let mut stop = control.subscribe();
            let name = scenario.name.clone();
            let start_time = scenario.start_time;
            let executor = scenario.profile.executor_name();

            handles.push(tokio::spawn(async move {
                if !start_time.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(start_time) => {}
                        _ = stop.stopped() => {
                            tracing::info!(scenario = %name, "run stopped before scenario start");
                            return ScenarioSummary { name, ..Default::default() };
                        }
                    }
                }
                tracing::info!(scenario = %name, executor, "starting scenario");
                let summary = launcher.launch(ctx).await;
                tracing::info!(
                    scenario = %name,
                    completed = summary.completed,
                    aborted = summary.aborted,
                    dropped = summary.dropped,
                    "scenario finished"
                );
                summary
            }));
        }
        drop(sink);

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(summary) => summaries.push(summary),
                Err(e) => tracing::error!(error = %e, "scenario task failed"),
            }
        }
        Ok(summaries)
    }
}
