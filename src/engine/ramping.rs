//! Ramping executor: the controlled variable is concurrency.
//!
//! Every [`CONTROL_TICK`] the controller recomputes the interpolated target and
//! reconciles the live worker set against it. Workers above the target are
//! retired newest-first: they finish their current iteration, and if that takes
//! longer than `graceful_ramp_down` the iteration is halted and counted as
//! aborted. Retired workers return to an idle pool with their state and are
//! reactivated by later ramp-ups, so the scenario never holds more workers than
//! its capacity.

use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use super::profile::{RampingProfile, ScenarioSummary};
use super::{run_iteration, Lifecycle, ScenarioContext, CONTROL_TICK};
use crate::stats::{IterationOutcome, Metric, MetricSink};
use crate::workload::{VuFactory, VuSlot, Workload};

struct WorkerExit<S> {
    slot: VuSlot<S>,
    completed: usize,
    aborted: usize,
}

struct LiveWorker<S> {
    lifecycle: watch::Sender<Lifecycle>,
    join: JoinHandle<WorkerExit<S>>,
}

struct RetiringWorker<S> {
    worker: LiveWorker<S>,
    deadline: Instant,
    halted: bool,
}

async fn worker_loop<W: Workload>(
    workload: Arc<W>,
    mut slot: VuSlot<W::State>,
    mut lifecycle: watch::Receiver<Lifecycle>,
    sink: MetricSink,
    scenario: Arc<str>,
) -> WorkerExit<W::State> {
    let mut completed = 0;
    let mut aborted = 0;
    loop {
        let state = *lifecycle.borrow_and_update();
        if state != Lifecycle::Active {
            break;
        }
        match run_iteration(&*workload, &mut slot, &mut lifecycle, &sink, &scenario).await {
            IterationOutcome::Completed => completed += 1,
            IterationOutcome::Aborted => {
                aborted += 1;
                break;
            }
        }
        tokio::task::yield_now().await;
    }
    WorkerExit {
        slot,
        completed,
        aborted,
    }
}

struct Controller<W: Workload> {
    workload: Arc<W>,
    vus: VuFactory,
    scenario: Arc<str>,
    capacity: usize,
    next_id: u64,
    idle: Vec<VuSlot<W::State>>,
    active: Vec<LiveWorker<W::State>>,
    retiring: Vec<RetiringWorker<W::State>>,
    summary: ScenarioSummary,
    last_reported: Option<usize>,
}

impl<W: Workload> Controller<W> {
    fn new(workload: Arc<W>, vus: VuFactory, capacity: usize) -> Self {
        let scenario: Arc<str> = Arc::from(vus.scenario());
        Self {
            workload,
            summary: ScenarioSummary {
                name: scenario.to_string(),
                ..Default::default()
            },
            scenario,
            vus,
            capacity,
            next_id: 1,
            idle: Vec::new(),
            active: Vec::new(),
            retiring: Vec::new(),
            last_reported: None,
        }
    }

    fn live(&self) -> usize {
        self.active.len() + self.retiring.len()
    }

    fn spawn(&mut self, slot: VuSlot<W::State>) {
        let (lifecycle, rx) = watch::channel(Lifecycle::Active);
        tracing::debug!(
            scenario = %self.scenario,
            worker = slot.vu.identity().id,
            "worker activated"
        );
        let join = tokio::spawn(worker_loop(
            self.workload.clone(),
            slot,
            rx,
            self.vus.sink().clone(),
            self.scenario.clone(),
        ));
        self.active.push(LiveWorker { lifecycle, join });
    }

    fn retire(&mut self, worker: LiveWorker<W::State>, deadline: Instant) {
        worker.lifecycle.send_replace(Lifecycle::Retiring);
        self.retiring.push(RetiringWorker {
            worker,
            deadline,
            halted: false,
        });
    }

    /// Collect workers that finished; halt the ones past their deadline.
    fn reap(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.retiring.len() {
            if self.retiring[i].worker.join.is_finished() {
                let mut retired = self.retiring.swap_remove(i);
                match (&mut retired.worker.join).now_or_never() {
                    Some(Ok(exit)) => {
                        self.summary.completed += exit.completed;
                        self.summary.aborted += exit.aborted;
                        tracing::debug!(
                            scenario = %self.scenario,
                            worker = exit.slot.vu.identity().id,
                            "worker retired"
                        );
                        self.idle.push(exit.slot);
                    }
                    Some(Err(e)) => {
                        tracing::error!(scenario = %self.scenario, error = %e, "worker task failed");
                    }
                    // Finished but not yet observable; retried next tick.
                    None => {
                        self.retiring.push(retired);
                        i += 1;
                    }
                }
                continue;
            }

            let retiring = &mut self.retiring[i];
            if !retiring.halted && now >= retiring.deadline {
                retiring.worker.lifecycle.send_replace(Lifecycle::Halt);
                retiring.halted = true;
            }
            i += 1;
        }
    }

    fn scale_to(&mut self, target: usize, grace: Duration, now: Instant) {
        while self.active.len() > target {
            if let Some(worker) = self.active.pop() {
                self.retire(worker, now + grace);
            }
        }

        while self.active.len() < target {
            let slot = match self.idle.pop() {
                Some(slot) => slot,
                None if self.next_id as usize <= self.capacity => {
                    let slot = self.vus.make_slot(self.next_id);
                    self.next_id += 1;
                    slot
                }
                // Capacity reached: wait for retiring stragglers.
                None => break,
            };
            self.spawn(slot);
        }
    }

    fn report_live(&mut self) {
        let live = self.live();
        self.summary.peak_workers = self.summary.peak_workers.max(live);
        if self.last_reported != Some(live) {
            self.last_reported = Some(live);
            self.vus.sink().send(Metric::ActiveWorkers {
                scenario: self.scenario.to_string(),
                active: live,
            });
        }
    }
}

pub(crate) async fn run<W: Workload>(
    workload: Arc<W>,
    ctx: ScenarioContext,
    profile: RampingProfile,
) -> ScenarioSummary {
    let ScenarioContext { vus, mut stop, .. } = ctx;
    let mut controller = Controller::new(workload, vus, profile.capacity());
    let total = profile.total_duration();

    let mut ticker = interval(CONTROL_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let start = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.stopped() => {}
        }
        if stop.is_stopped() {
            tracing::info!(scenario = %controller.scenario, "stop requested, ending ramp");
            break;
        }

        let now = Instant::now();
        let elapsed = now.duration_since(start);
        if elapsed >= total {
            break;
        }
        controller.reap(now);
        controller.scale_to(profile.target_at(elapsed), profile.graceful_ramp_down, now);
        controller.report_live();
    }

    // Stages are over (or the run was stopped): everyone gets graceful_stop.
    let deadline = Instant::now() + profile.graceful_stop;
    while let Some(worker) = controller.active.pop() {
        controller.retire(worker, deadline);
    }
    while !controller.retiring.is_empty() {
        controller.reap(Instant::now());
        controller.report_live();
        if controller.retiring.is_empty() {
            break;
        }
        ticker.tick().await;
    }

    controller.summary
}
