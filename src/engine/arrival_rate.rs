//! Constant-arrival-rate executor: the controlled variable is iteration starts.
//!
//! Arrival `k` is due at `start + k * time_unit / rate`. When it comes due the
//! executor hands it to an idle worker, allocating a new one while the pool is
//! below `max_vus`. With every worker busy at `max_vus` the arrival is dropped
//! and reported as a [`Metric::DroppedIteration`]. How long an iteration takes
//! never shifts the schedule.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Duration, Instant};

use super::profile::{ArrivalProcess, ArrivalRateProfile, ScenarioSummary};
use super::{run_iteration, Lifecycle, ScenarioContext};
use crate::stats::{IterationOutcome, Metric};
use crate::workload::{VuSlot, Workload};

/// Yields arrival offsets from the scenario start.
struct Schedule {
    profile: ArrivalRateProfile,
    next: u64,
    poisson_offset: Duration,
    rng: StdRng,
}

impl Schedule {
    fn new(profile: ArrivalRateProfile) -> Self {
        Self {
            profile,
            next: 0,
            poisson_offset: Duration::ZERO,
            rng: StdRng::from_entropy(),
        }
    }

    fn next_offset(&mut self) -> Option<Duration> {
        if self.profile.rate == 0 {
            return None;
        }
        let offset = match self.profile.arrival {
            ArrivalProcess::Periodic => self.profile.due_offset(self.next),
            ArrivalProcess::Poisson => {
                let mean = self.profile.mean_interval().as_secs_f64();
                let u: f64 = self.rng.gen_range(f64::EPSILON..1.0);
                self.poisson_offset += Duration::from_secs_f64(-u.ln() * mean);
                self.poisson_offset
            }
        };
        if offset >= self.profile.duration {
            return None;
        }
        self.next += 1;
        Some(offset)
    }
}

pub(crate) async fn run<W: Workload>(
    workload: Arc<W>,
    ctx: ScenarioContext,
    profile: ArrivalRateProfile,
) -> ScenarioSummary {
    let ScenarioContext { vus, mut stop, .. } = ctx;
    let scenario: Arc<str> = Arc::from(vus.scenario());
    let sink = vus.sink().clone();
    let capacity = profile.capacity();

    let (halt_tx, halt_rx) = watch::channel(Lifecycle::Active);
    let (done_tx, mut done_rx) =
        mpsc::unbounded_channel::<(VuSlot<W::State>, IterationOutcome)>();

    // Lowest ids are handed out first.
    let mut idle: Vec<VuSlot<W::State>> = (1..=profile.pre_allocated_vus as u64)
        .rev()
        .map(|id| vus.make_slot(id))
        .collect();
    let mut allocated = profile.pre_allocated_vus;
    let mut in_flight = 0usize;
    let mut summary = ScenarioSummary {
        name: scenario.to_string(),
        ..Default::default()
    };

    let settle = |summary: &mut ScenarioSummary,
                      idle: &mut Vec<VuSlot<W::State>>,
                      in_flight: &mut usize,
                      (slot, outcome): (VuSlot<W::State>, IterationOutcome)| {
        *in_flight -= 1;
        match outcome {
            IterationOutcome::Completed => summary.completed += 1,
            IterationOutcome::Aborted => summary.aborted += 1,
        }
        idle.push(slot);
    };

    let start = Instant::now();
    let mut schedule = Schedule::new(profile.clone());
    while let Some(offset) = schedule.next_offset() {
        tokio::select! {
            biased;
            _ = stop.stopped() => {
                tracing::info!(scenario = %scenario, "stop requested, no further arrivals");
                break;
            }
            _ = sleep_until(start + offset) => {}
        }

        while let Ok(done) = done_rx.try_recv() {
            settle(&mut summary, &mut idle, &mut in_flight, done);
        }

        let slot = match idle.pop() {
            Some(slot) => slot,
            None if allocated < capacity => {
                allocated += 1;
                tracing::debug!(scenario = %scenario, allocated, "growing worker pool");
                vus.make_slot(allocated as u64)
            }
            None => {
                summary.dropped += 1;
                tracing::debug!(scenario = %scenario, ?offset, "all workers busy, arrival dropped");
                sink.send(Metric::DroppedIteration {
                    scenario: scenario.to_string(),
                });
                continue;
            }
        };

        in_flight += 1;
        summary.peak_workers = summary.peak_workers.max(in_flight);
        sink.send(Metric::ActiveWorkers {
            scenario: scenario.to_string(),
            active: in_flight,
        });

        let workload = workload.clone();
        let mut halt = halt_rx.clone();
        let sink = sink.clone();
        let done = done_tx.clone();
        let scenario = scenario.clone();
        tokio::spawn(async move {
            let mut slot = slot;
            let outcome = run_iteration(&*workload, &mut slot, &mut halt, &sink, &scenario).await;
            let _ = done.send((slot, outcome));
        });
    }

    // In-flight iterations get graceful_stop past the scheduled end (or past
    // the stop request) before they are halted.
    let grace_from = if stop.is_stopped() {
        Instant::now()
    } else {
        (start + profile.duration).max(Instant::now())
    };
    let deadline = grace_from + profile.graceful_stop;
    let mut halted = false;
    while in_flight > 0 {
        tokio::select! {
            done = done_rx.recv() => match done {
                Some(done) => settle(&mut summary, &mut idle, &mut in_flight, done),
                None => break,
            },
            _ = sleep_until(deadline), if !halted => {
                tracing::debug!(scenario = %scenario, in_flight, "graceful stop expired, halting iterations");
                halt_tx.send_replace(Lifecycle::Halt);
                halted = true;
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::profile::{ScenarioPlan, ScenarioProfile};
    use crate::engine::testing::{context, Recorder};
    use crate::stats::StatsAggregator;
    use std::collections::HashSet;

    fn profile(rate: u64, duration: Duration, pre: usize, max: usize) -> ArrivalRateProfile {
        ArrivalRateProfile {
            rate,
            time_unit: Duration::from_secs(1),
            pre_allocated_vus: pre,
            max_vus: max,
            duration,
            graceful_stop: Duration::from_secs(30),
            arrival: ArrivalProcess::Periodic,
        }
    }

    fn plan(profile: ArrivalRateProfile) -> ScenarioPlan {
        ScenarioPlan {
            name: "spike".to_string(),
            exec: "recorder".to_string(),
            start_time: Duration::ZERO,
            profile: ScenarioProfile::ArrivalRate(profile),
            id_offset: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_thirty_per_second_for_a_minute() {
        // 30/s with 50ms iterations needs ceil(30 * 0.05) = 2 workers.
        let p = profile(30, Duration::from_secs(60), 2, 2);
        let recorder = Recorder::default();
        let seen = recorder.seen.clone();
        let (ctx, rx, _control) = context(plan(p.clone()), Duration::from_millis(50));

        let summary = run(Arc::new(recorder), ctx, p).await;

        assert_eq!(summary.completed, 1800);
        assert_eq!(summary.dropped, 0);
        assert_eq!(summary.aborted, 0);
        assert!(summary.peak_workers <= 2);

        let ids: HashSet<u64> = seen.lock().iter().map(|(id, _, _)| *id).collect();
        assert!(ids.is_subset(&HashSet::from([1, 2])));

        let mut agg = StatsAggregator::new();
        for metric in rx.try_iter() {
            agg.add(metric);
        }
        assert_eq!(agg.total_requests, 1800);
        assert_eq!(agg.completed_iterations, 1800);
        assert_eq!(agg.dropped_iterations, 0);
        assert_eq!(agg.checks.get("status is 200"), Some(&(1800, 1800)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_per_time_unit_follow_rate() {
        let p = profile(30, Duration::from_secs(5), 2, 2);
        let recorder = Recorder::default();
        let (ctx, _rx, _control) = context(plan(p.clone()), Duration::from_millis(50));

        let started = Arc::new(parking_lot::Mutex::new(Vec::new()));
        struct Stamp(Arc<parking_lot::Mutex<Vec<Instant>>>, Recorder);

        #[async_trait::async_trait]
        impl Workload for Stamp {
            type State = crate::engine::testing::RecorderState;
            fn checks(&self) -> &'static [&'static str] {
                self.1.checks()
            }
            async fn iteration(&self, vu: &mut crate::workload::Vu, state: &mut Self::State) {
                self.0.lock().push(Instant::now());
                self.1.iteration(vu, state).await;
            }
        }

        let t0 = Instant::now();
        let summary = run(Arc::new(Stamp(started.clone(), recorder)), ctx, p).await;
        assert_eq!(summary.completed, 150);

        let starts = started.lock();
        for second in 0..5u64 {
            let lo = t0 + Duration::from_secs(second);
            let hi = lo + Duration::from_secs(1);
            let count = starts.iter().filter(|t| **t >= lo && **t < hi).count();
            assert!((29..=31).contains(&count), "second {}: {} starts", second, count);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_drops_arrivals() {
        // Ten arrivals in one second, each iteration busy for a full second.
        let p = profile(10, Duration::from_secs(1), 1, 2);
        let recorder = Recorder::default();
        let (ctx, rx, _control) = context(plan(p.clone()), Duration::from_secs(1));

        let summary = run(Arc::new(recorder), ctx, p).await;

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.dropped, 8);
        assert_eq!(summary.peak_workers, 2);

        let dropped = rx
            .try_iter()
            .filter(|m| matches!(m, Metric::DroppedIteration { .. }))
            .count();
        assert_eq!(dropped, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_stop_halts_overrunning_iterations() {
        let mut p = profile(1, Duration::from_secs(2), 2, 2);
        p.graceful_stop = Duration::from_secs(1);
        let recorder = Recorder::default();
        let (ctx, _rx, _control) = context(plan(p.clone()), Duration::from_secs(10));

        let start = Instant::now();
        let summary = run(Arc::new(recorder), ctx, p).await;

        assert_eq!(summary.completed, 0);
        assert_eq!(summary.aborted, 2);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_iteration_returns_its_worker() {
        let mut p = profile(1, Duration::from_secs(2), 1, 1);
        p.graceful_stop = Duration::from_secs(1);
        let (ctx, rx, _control) = context(plan(p.clone()), Duration::ZERO);

        let summary = tokio::time::timeout(
            Duration::from_secs(3600),
            run(Arc::new(crate::engine::testing::Faulty), ctx, p),
        )
        .await
        .expect("executor finished");

        assert_eq!(summary.completed, 0);
        assert_eq!(summary.aborted, 2);
        assert_eq!(summary.dropped, 0);
        let aborted = rx
            .try_iter()
            .filter(|m| matches!(m, Metric::Iteration { outcome: IterationOutcome::Aborted, .. }))
            .count();
        assert_eq!(aborted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_halts_schedule() {
        let p = profile(10, Duration::from_secs(3600), 2, 2);
        let recorder = Recorder::default();
        let (ctx, _rx, control) = context(plan(p.clone()), Duration::from_millis(10));

        let stopper = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1050)).await;
            stopper.stop();
        });

        let summary = run(Arc::new(recorder), ctx, p).await;
        assert_eq!(summary.completed, 11);
        assert_eq!(summary.dropped, 0);
    }

    #[test]
    fn test_poisson_schedule_stays_inside_duration() {
        let mut p = profile(50, Duration::from_secs(10), 1, 1);
        p.arrival = ArrivalProcess::Poisson;
        let mut schedule = Schedule::new(p);

        let mut count = 0;
        let mut last = Duration::ZERO;
        while let Some(offset) = schedule.next_offset() {
            assert!(offset >= last);
            assert!(offset < Duration::from_secs(10));
            last = offset;
            count += 1;
        }
        // Mean 500; anything this far out means the gaps are wrong.
        assert!((350..=650).contains(&count), "count {}", count);
    }
}
