use tokio::time::Duration;

/// One ramping stage: move linearly to `target` workers over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampingProfile {
    pub start_vus: usize,
    pub stages: Vec<Stage>,
    pub graceful_ramp_down: Duration,
    pub graceful_stop: Duration,
}

impl RampingProfile {
    /// Largest concurrency the profile ever asks for.
    pub fn capacity(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_vus, usize::max)
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Target concurrency at `elapsed`, linearly interpolated and truncated.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut active_time = Duration::ZERO;
        let mut prev_target = self.start_vus;
        for stage in &self.stages {
            if elapsed < active_time + stage.duration {
                let progress = (elapsed - active_time).as_secs_f64() / stage.duration.as_secs_f64();
                let diff = stage.target as f64 - prev_target as f64;
                return (prev_target as f64 + diff * progress) as usize;
            }
            active_time += stage.duration;
            prev_target = stage.target;
        }
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrivalProcess {
    /// Evenly spaced starts.
    #[default]
    Periodic,
    /// Exponentially distributed gaps with the same mean.
    Poisson,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrivalRateProfile {
    pub rate: u64,
    pub time_unit: Duration,
    pub pre_allocated_vus: usize,
    pub max_vus: usize,
    pub duration: Duration,
    pub graceful_stop: Duration,
    pub arrival: ArrivalProcess,
}

impl ArrivalRateProfile {
    pub fn capacity(&self) -> usize {
        self.max_vus.max(self.pre_allocated_vus)
    }

    /// Offset of arrival `k` from the scenario start, computed in whole
    /// nanoseconds so the schedule never drifts.
    pub fn due_offset(&self, k: u64) -> Duration {
        let nanos = k as u128 * self.time_unit.as_nanos() / self.rate.max(1) as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// Arrivals whose offset falls strictly inside `duration`.
    pub fn total_arrivals(&self) -> u64 {
        if self.rate == 0 || self.time_unit.is_zero() {
            return 0;
        }
        let numerator = self.duration.as_nanos() * self.rate as u128;
        let unit = self.time_unit.as_nanos();
        numerator.div_ceil(unit) as u64
    }

    /// Mean gap between arrivals.
    pub fn mean_interval(&self) -> Duration {
        self.due_offset(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioProfile {
    Ramping(RampingProfile),
    ArrivalRate(ArrivalRateProfile),
}

impl ScenarioProfile {
    /// Size of the scenario's worker pool, and of its id block.
    pub fn capacity(&self) -> usize {
        match self {
            ScenarioProfile::Ramping(p) => p.capacity(),
            ScenarioProfile::ArrivalRate(p) => p.capacity(),
        }
    }

    pub fn executor_name(&self) -> &'static str {
        match self {
            ScenarioProfile::Ramping(_) => "ramping-vus",
            ScenarioProfile::ArrivalRate(_) => "constant-arrival-rate",
        }
    }
}

/// Fully validated scenario, ready to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioPlan {
    pub name: String,
    /// Registered workload to run.
    pub exec: String,
    pub start_time: Duration,
    pub profile: ScenarioProfile,
    /// Worker ids of this scenario are `id_offset + 1 ..= id_offset + capacity`.
    pub id_offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioSummary {
    pub name: String,
    pub completed: usize,
    pub aborted: usize,
    pub dropped: usize,
    pub peak_workers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramping(stages: &[(u64, usize)]) -> RampingProfile {
        RampingProfile {
            start_vus: 0,
            stages: stages
                .iter()
                .map(|(secs, target)| Stage {
                    duration: Duration::from_secs(*secs),
                    target: *target,
                })
                .collect(),
            graceful_ramp_down: Duration::from_secs(30),
            graceful_stop: Duration::from_secs(30),
        }
    }

    fn arrival(rate: u64, unit: Duration, duration: Duration) -> ArrivalRateProfile {
        ArrivalRateProfile {
            rate,
            time_unit: unit,
            pre_allocated_vus: 2,
            max_vus: 4,
            duration,
            graceful_stop: Duration::from_secs(30),
            arrival: ArrivalProcess::Periodic,
        }
    }

    #[test]
    fn test_target_interpolation() {
        let p = ramping(&[(300, 20), (1200, 20), (300, 0)]);
        assert_eq!(p.target_at(Duration::ZERO), 0);
        assert_eq!(p.target_at(Duration::from_secs(150)), 10);
        assert_eq!(p.target_at(Duration::from_secs(299)), 19);
        assert_eq!(p.target_at(Duration::from_secs(300)), 20);
        assert_eq!(p.target_at(Duration::from_secs(1000)), 20);
        assert_eq!(p.target_at(Duration::from_secs(1650)), 10);
        assert_eq!(p.target_at(Duration::from_secs(1800)), 0);
        assert_eq!(p.capacity(), 20);
        assert_eq!(p.total_duration(), Duration::from_secs(1800));
    }

    #[test]
    fn test_target_starts_from_start_vus() {
        let mut p = ramping(&[(10, 0)]);
        p.start_vus = 10;
        assert_eq!(p.target_at(Duration::ZERO), 10);
        assert_eq!(p.target_at(Duration::from_secs(5)), 5);
        assert_eq!(p.capacity(), 10);
    }

    #[test]
    fn test_zero_length_stage_jumps() {
        let p = ramping(&[(0, 5), (10, 5)]);
        assert_eq!(p.target_at(Duration::ZERO), 5);
        assert_eq!(p.target_at(Duration::from_secs(9)), 5);
    }

    #[test]
    fn test_arrival_schedule() {
        let p = arrival(30, Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(p.total_arrivals(), 1800);
        assert_eq!(p.due_offset(0), Duration::ZERO);
        assert_eq!(p.due_offset(3), Duration::from_millis(100));
        assert_eq!(p.due_offset(30), Duration::from_secs(1));
        assert!(p.due_offset(1799) < Duration::from_secs(60));
        assert_eq!(p.mean_interval(), Duration::from_nanos(33_333_333));
    }

    #[test]
    fn test_arrival_count_rounds_up_partial_periods() {
        let p = arrival(3, Duration::from_secs(1), Duration::from_millis(1500));
        // Offsets 0, 333ms, 666ms, 1s, 1.333s.
        assert_eq!(p.total_arrivals(), 5);

        let none = arrival(0, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(none.total_arrivals(), 0);
    }

    #[test]
    fn test_capacity() {
        let p = ScenarioProfile::ArrivalRate(arrival(1, Duration::from_secs(1), Duration::from_secs(1)));
        assert_eq!(p.capacity(), 4);
        assert_eq!(p.executor_name(), "constant-arrival-rate");
    }
}
