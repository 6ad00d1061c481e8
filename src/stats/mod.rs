use crossbeam_channel::{Receiver, Sender};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::Duration;

use crate::workload::check::CheckResult;

pub mod csv;
pub mod thresholds;

/// Upper bound for recorded latencies: one hour in microseconds.
const HISTOGRAM_MAX_MICROS: u64 = 60 * 60 * 1000 * 1000;

fn new_histogram() -> Histogram<u64> {
    // Constant bounds, always valid.
    Histogram::<u64>::new_with_bounds(1, HISTOGRAM_MAX_MICROS, 2)
        .expect("static histogram bounds")
}

fn quantile_ms(histogram: &Histogram<u64>, quantile: f64) -> f64 {
    if histogram.is_empty() {
        return 0.0;
    }
    Duration::from_micros(histogram.value_at_quantile(quantile)).as_secs_f64() * 1000.0
}

fn record_micros(histogram: &mut Histogram<u64>, duration: Duration) {
    let micros = (duration.as_micros() as u64).clamp(1, HISTOGRAM_MAX_MICROS);
    let _ = histogram.record(micros);
}

/// `http_req_failed` semantics: transport error or a status outside 200..=399.
pub fn is_failed_request(status: u16, error: Option<&str>) -> bool {
    error.is_some() || !(200..=399).contains(&status)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct RequestTimings {
    /// Time until response headers arrived.
    pub waiting: Duration,
    /// Time spent reading the body.
    pub receiving: Duration,
    pub duration: Duration,
    pub response_size: usize,
    pub request_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    Completed,
    /// Forcibly terminated after a graceful period ran out.
    Aborted,
}

#[derive(Debug, Clone)]
pub enum Metric {
    Request {
        name: String,
        timings: RequestTimings,
        status: u16,
        error: Option<String>,
        tags: HashMap<String, String>,
    },
    Check(CheckResult),
    Iteration {
        scenario: String,
        duration: Duration,
        outcome: IterationOutcome,
    },
    /// Arrival that could not start because every worker was busy at max capacity.
    DroppedIteration {
        scenario: String,
    },
    ActiveWorkers {
        scenario: String,
        active: usize,
    },
}

/// Cloneable, non-blocking handle workers use to publish metrics.
#[derive(Clone)]
pub struct MetricSink {
    tx: Sender<Metric>,
}

impl MetricSink {
    pub fn new(tx: Sender<Metric>) -> Self {
        Self { tx }
    }

    /// Unbounded pair, mostly for tests and short runs.
    pub fn channel() -> (Self, Receiver<Metric>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    pub fn send(&self, metric: Metric) {
        // The aggregator only disappears during shutdown; late metrics are dropped.
        let _ = self.tx.send(metric);
    }
}

/// Fold every metric from `rx` on a dedicated thread until all senders are gone.
pub fn spawn_aggregator(
    rx: Receiver<Metric>,
) -> std::io::Result<std::thread::JoinHandle<StatsAggregator>> {
    std::thread::Builder::new()
        .name("metrics-aggregator".into())
        .spawn(move || {
            let mut aggregator = StatsAggregator::new();
            for metric in rx {
                aggregator.add(metric);
            }
            aggregator
        })
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestReport {
    pub total_requests: usize,
    pub failed_requests: usize,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub avg_waiting_ms: f64,
    pub avg_receiving_ms: f64,
    pub avg_response_size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ScenarioReport {
    pub completed_iterations: usize,
    pub aborted_iterations: usize,
    pub dropped_iterations: usize,
    pub peak_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IterationReport {
    pub completed: usize,
    pub aborted: usize,
    pub dropped: usize,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReportStats {
    pub total_requests: usize,
    pub failed_requests: usize,
    pub total_duration_ms: u128,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p90_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub status_codes: HashMap<u16, usize>,
    pub errors: HashMap<String, usize>,
    /// check name -> (passes, fails)
    pub checks: HashMap<String, (usize, usize)>,
    pub grouped_requests: HashMap<String, RequestReport>,
    pub total_data_sent: u64,
    pub total_data_received: u64,
    pub iterations: IterationReport,
    pub scenarios: HashMap<String, ScenarioReport>,
}

pub struct RequestStats {
    pub total_requests: usize,
    pub failed_requests: usize,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Duration,
    pub histogram: Histogram<u64>,
    pub total_waiting: Duration,
    pub total_receiving: Duration,
    pub total_response_size: u64,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            failed_requests: 0,
            total_duration: Duration::ZERO,
            min_duration: None,
            max_duration: Duration::ZERO,
            histogram: new_histogram(),
            total_waiting: Duration::ZERO,
            total_receiving: Duration::ZERO,
            total_response_size: 0,
        }
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Clone)]
struct ScenarioStats {
    completed: usize,
    aborted: usize,
    dropped: usize,
    peak_workers: usize,
}

pub struct StatsAggregator {
    pub total_requests: usize,
    pub failed_requests: usize,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Duration,
    pub status_codes: HashMap<u16, usize>,
    pub errors: HashMap<String, usize>,
    /// check key -> (total, passes)
    pub checks: HashMap<String, (usize, usize)>,
    pub histogram: Histogram<u64>,
    pub requests: HashMap<String, RequestStats>,
    pub total_data_sent: u64,
    pub total_data_received: u64,
    pub iteration_histogram: Histogram<u64>,
    pub iteration_total_duration: Duration,
    pub completed_iterations: usize,
    pub aborted_iterations: usize,
    pub dropped_iterations: usize,
    scenarios: HashMap<String, ScenarioStats>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            failed_requests: 0,
            total_duration: Duration::ZERO,
            min_duration: None,
            max_duration: Duration::ZERO,
            status_codes: HashMap::new(),
            errors: HashMap::new(),
            checks: HashMap::new(),
            histogram: new_histogram(),
            requests: HashMap::new(),
            total_data_sent: 0,
            total_data_received: 0,
            iteration_histogram: new_histogram(),
            iteration_total_duration: Duration::ZERO,
            completed_iterations: 0,
            aborted_iterations: 0,
            dropped_iterations: 0,
            scenarios: HashMap::new(),
        }
    }

    pub fn add(&mut self, metric: Metric) {
        match metric {
            Metric::Request {
                name,
                timings,
                status,
                error,
                tags: _,
            } => {
                let failed = is_failed_request(status, error.as_deref());
                self.total_requests += 1;
                self.total_duration += timings.duration;
                if failed {
                    self.failed_requests += 1;
                }

                if self.min_duration.is_none_or(|min| timings.duration < min) {
                    self.min_duration = Some(timings.duration);
                }
                if timings.duration > self.max_duration {
                    self.max_duration = timings.duration;
                }
                record_micros(&mut self.histogram, timings.duration);

                *self.status_codes.entry(status).or_insert(0) += 1;
                if let Some(err) = error {
                    *self.errors.entry(err).or_insert(0) += 1;
                }

                let req_stats = self.requests.entry(name).or_default();
                req_stats.total_requests += 1;
                req_stats.total_duration += timings.duration;
                if failed {
                    req_stats.failed_requests += 1;
                }
                if req_stats
                    .min_duration
                    .is_none_or(|min| timings.duration < min)
                {
                    req_stats.min_duration = Some(timings.duration);
                }
                if timings.duration > req_stats.max_duration {
                    req_stats.max_duration = timings.duration;
                }
                record_micros(&mut req_stats.histogram, timings.duration);
                req_stats.total_waiting += timings.waiting;
                req_stats.total_receiving += timings.receiving;
                req_stats.total_response_size += timings.response_size as u64;

                self.total_data_sent += timings.request_size as u64;
                self.total_data_received += timings.response_size as u64;
            }
            Metric::Check(result) => {
                let entry = self.checks.entry(result.key()).or_insert((0, 0));
                entry.0 += 1;
                if result.passed {
                    entry.1 += 1;
                }
            }
            Metric::Iteration {
                scenario,
                duration,
                outcome,
            } => {
                let stats = self.scenarios.entry(scenario).or_default();
                match outcome {
                    IterationOutcome::Completed => {
                        stats.completed += 1;
                        self.completed_iterations += 1;
                        self.iteration_total_duration += duration;
                        record_micros(&mut self.iteration_histogram, duration);
                    }
                    IterationOutcome::Aborted => {
                        stats.aborted += 1;
                        self.aborted_iterations += 1;
                    }
                }
            }
            Metric::DroppedIteration { scenario } => {
                self.scenarios.entry(scenario).or_default().dropped += 1;
                self.dropped_iterations += 1;
            }
            Metric::ActiveWorkers { scenario, active } => {
                let stats = self.scenarios.entry(scenario).or_default();
                stats.peak_workers = stats.peak_workers.max(active);
            }
        }
    }

    /// Fraction of requests counted as failed; 0 when nothing was sent.
    pub fn failed_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }

    /// Fraction of passed checks; 0 when no check ran.
    pub fn checks_rate(&self) -> f64 {
        let (total, passes) = self
            .checks
            .values()
            .fold((0, 0), |acc, (t, p)| (acc.0 + t, acc.1 + p));
        if total == 0 {
            0.0
        } else {
            passes as f64 / total as f64
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_duration.as_secs_f64() * 1000.0 / self.total_requests as f64
        }
    }

    pub fn latency_percentile_ms(&self, percentile: f64) -> f64 {
        quantile_ms(&self.histogram, percentile / 100.0)
    }

    pub fn avg_iteration_ms(&self) -> f64 {
        if self.completed_iterations == 0 {
            0.0
        } else {
            self.iteration_total_duration.as_secs_f64() * 1000.0
                / self.completed_iterations as f64
        }
    }

    pub fn iteration_percentile_ms(&self, percentile: f64) -> f64 {
        quantile_ms(&self.iteration_histogram, percentile / 100.0)
    }

    pub fn iteration_min_ms(&self) -> f64 {
        if self.iteration_histogram.is_empty() {
            0.0
        } else {
            self.iteration_histogram.min() as f64 / 1000.0
        }
    }

    pub fn iteration_max_ms(&self) -> f64 {
        if self.iteration_histogram.is_empty() {
            0.0
        } else {
            self.iteration_histogram.max() as f64 / 1000.0
        }
    }

    pub fn to_report(&self) -> ReportStats {
        let mut grouped_requests = HashMap::new();
        for (name, stats) in &self.requests {
            let count = stats.total_requests.max(1) as f64;
            grouped_requests.insert(
                name.clone(),
                RequestReport {
                    total_requests: stats.total_requests,
                    failed_requests: stats.failed_requests,
                    min_latency_ms: stats.min_duration.unwrap_or_default().as_secs_f64() * 1000.0,
                    max_latency_ms: stats.max_duration.as_secs_f64() * 1000.0,
                    avg_latency_ms: stats.total_duration.as_secs_f64() * 1000.0 / count,
                    p95_latency_ms: quantile_ms(&stats.histogram, 0.95),
                    p99_latency_ms: quantile_ms(&stats.histogram, 0.99),
                    avg_waiting_ms: stats.total_waiting.as_secs_f64() * 1000.0 / count,
                    avg_receiving_ms: stats.total_receiving.as_secs_f64() * 1000.0 / count,
                    avg_response_size: stats.total_response_size as f64 / count,
                },
            );
        }

        let checks = self
            .checks
            .iter()
            .map(|(name, (total, passes))| (name.clone(), (*passes, total - passes)))
            .collect();

        let scenarios = self
            .scenarios
            .iter()
            .map(|(name, s)| {
                (
                    name.clone(),
                    ScenarioReport {
                        completed_iterations: s.completed,
                        aborted_iterations: s.aborted,
                        dropped_iterations: s.dropped,
                        peak_workers: s.peak_workers,
                    },
                )
            })
            .collect();

        ReportStats {
            total_requests: self.total_requests,
            failed_requests: self.failed_requests,
            total_duration_ms: self.total_duration.as_millis(),
            avg_latency_ms: self.avg_latency_ms(),
            min_latency_ms: self.min_duration.unwrap_or_default().as_secs_f64() * 1000.0,
            max_latency_ms: self.max_duration.as_secs_f64() * 1000.0,
            p50_latency_ms: quantile_ms(&self.histogram, 0.5),
            p90_latency_ms: quantile_ms(&self.histogram, 0.9),
            p95_latency_ms: quantile_ms(&self.histogram, 0.95),
            p99_latency_ms: quantile_ms(&self.histogram, 0.99),
            status_codes: self.status_codes.clone(),
            errors: self.errors.clone(),
            checks,
            grouped_requests,
            total_data_sent: self.total_data_sent,
            total_data_received: self.total_data_received,
            iterations: IterationReport {
                completed: self.completed_iterations,
                aborted: self.aborted_iterations,
                dropped: self.dropped_iterations,
                avg_duration_ms: self.avg_iteration_ms(),
                p95_duration_ms: self.iteration_percentile_ms(95.0),
            },
            scenarios,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.to_report()).unwrap_or_default()
    }

    pub fn report(&self) {
        println!("\n--- Test Summary ---");

        if self.total_requests == 0
            && self.checks.is_empty()
            && self.completed_iterations == 0
            && self.dropped_iterations == 0
        {
            println!("No metrics collected.");
            return;
        }

        if self.total_requests > 0 {
            println!("Total Requests: {}", self.total_requests);
            println!(
                "Failed:         {} ({:.2}%)",
                self.failed_requests,
                self.failed_rate() * 100.0
            );
            println!(
                "Avg Latency:    {:?}",
                self.total_duration / self.total_requests as u32
            );
            println!(
                "Min Latency:    {:?}",
                self.min_duration.unwrap_or_default()
            );
            println!("Max Latency:    {:?}", self.max_duration);
            for (label, q) in [("P50", 0.5), ("P90", 0.9), ("P95", 0.95), ("P99", 0.99)] {
                println!(
                    "{} Latency:    {:?}",
                    label,
                    Duration::from_micros(self.histogram.value_at_quantile(q))
                );
            }

            println!("\nStatus Codes:");
            let mut codes: Vec<_> = self.status_codes.iter().collect();
            codes.sort_by_key(|a| a.0);
            for (code, count) in codes {
                println!("  {}: {}", code, count);
            }

            let mb_sent = self.total_data_sent as f64 / 1_048_576.0;
            let mb_recv = self.total_data_received as f64 / 1_048_576.0;
            println!("\nData Transfer:");
            println!("  Sent:     {:.2} MB", mb_sent);
            println!("  Received: {:.2} MB", mb_recv);
        }

        if !self.requests.is_empty() {
            println!("\nGrouped Requests:");
            let mut groups: Vec<_> = self.requests.iter().collect();
            groups.sort_by_key(|a| a.0);
            for (name, stats) in groups {
                let p95 = Duration::from_micros(stats.histogram.value_at_quantile(0.95));
                println!("  Request: {}", name);
                println!("    Count: {}", stats.total_requests);
                println!("    P95:   {:?}", p95);
                if stats.failed_requests > 0 {
                    println!("    Failed: {}", stats.failed_requests);
                }
            }
        }

        if !self.errors.is_empty() {
            println!("\nErrors:");
            let mut errors: Vec<_> = self.errors.iter().collect();
            errors.sort_by(|a, b| b.1.cmp(a.1));
            for (err, count) in errors {
                println!("  {}: {}", err, count);
            }
        }

        if !self.checks.is_empty() {
            println!("\nChecks:");
            let mut checks: Vec<_> = self.checks.iter().collect();
            checks.sort_by_key(|a| a.0);
            for (name, (total, passes)) in checks {
                let fail = total - passes;
                let percent = (*passes as f64 / *total as f64) * 100.0;
                if fail > 0 {
                    println!(
                        "  ✗ {} : {:.2}% ({} passed, {} failed)",
                        name, percent, passes, fail
                    );
                } else {
                    println!("  ✓ {} : 100% ({} passed)", name, passes);
                }
            }
        }

        println!("\nIterations:");
        println!("  Completed: {}", self.completed_iterations);
        println!("  Aborted:   {}", self.aborted_iterations);
        println!("  Dropped:   {}", self.dropped_iterations);
        if self.completed_iterations > 0 {
            println!("  Avg Duration: {:.2} ms", self.avg_iteration_ms());
        }

        if !self.scenarios.is_empty() {
            println!("\nScenarios:");
            let mut scenarios: Vec<_> = self.scenarios.iter().collect();
            scenarios.sort_by_key(|a| a.0);
            for (name, s) in scenarios {
                println!(
                    "  {}: {} completed, {} aborted, {} dropped, peak {} workers",
                    name, s.completed, s.aborted, s.dropped, s.peak_workers
                );
            }
        }

        println!("--------------------\n");
    }
}
