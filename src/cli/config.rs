use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::profile::{
    ArrivalProcess, ArrivalRateProfile, RampingProfile, ScenarioPlan, ScenarioProfile, Stage,
};
use crate::engine::RunPlan;
use crate::stats::thresholds::{self, ThresholdError};
use crate::utils::parse_duration_str;

pub const DEFAULT_BASE_URL: &str = "https://test-api.k6.io";
pub const DEFAULT_THINK_TIME: Duration = Duration::from_secs(1);
pub const DEFAULT_GRACEFUL: Duration = Duration::from_secs(30);
pub const DEFAULT_FIXTURES: &str = "data/test-users.csv";
const DEFAULT_EXEC: &str = "default";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no scenarios configured")]
    NoScenarios,
    #[error("scenario '{scenario}': missing required option '{option}' for {executor}")]
    MissingOption {
        scenario: String,
        option: &'static str,
        executor: &'static str,
    },
    #[error("scenario '{scenario}': option '{option}' is not supported by {executor}")]
    UnsupportedOption {
        scenario: String,
        option: &'static str,
        executor: &'static str,
    },
    #[error("{context}: invalid duration '{value}'")]
    InvalidDuration { context: String, value: String },
    #[error("{context}: {reason}")]
    InvalidValue { context: String, reason: String },
    #[error(transparent)]
    Threshold(#[from] ThresholdError),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    RampingVus,
    ConstantVus,
    ConstantArrivalRate,
}

impl ExecutorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorKind::RampingVus => "ramping-vus",
            ExecutorKind::ConstantVus => "constant-vus",
            ExecutorKind::ConstantArrivalRate => "constant-arrival-rate",
        }
    }
}

/// What a worker does with its cached token when the API answers 401.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum TokenRefresh {
    /// Keep the token for the worker's whole lifetime.
    #[default]
    Never,
    /// Drop the token so the next iteration logs in again.
    OnUnauthorized,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ArrivalKind {
    #[default]
    Periodic,
    Poisson,
}

impl From<ArrivalKind> for ArrivalProcess {
    fn from(kind: ArrivalKind) -> Self {
        match kind {
            ArrivalKind::Periodic => ArrivalProcess::Periodic,
            ArrivalKind::Poisson => ArrivalProcess::Poisson,
        }
    }
}

/// A threshold is either one expression or a list of them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(untagged)]
pub enum ThresholdSpec {
    One(String),
    Many(Vec<String>),
}

impl ThresholdSpec {
    fn expressions(&self) -> Vec<String> {
        match self {
            ThresholdSpec::One(expr) => vec![expr.clone()],
            ThresholdSpec::Many(exprs) => exprs.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScheduleStep {
    pub duration: String,
    pub target: usize,
}

/// Configuration for a single scenario
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Executor type (ramping-vus, constant-vus, constant-arrival-rate)
    pub executor: ExecutorKind,
    /// Registered workload to run (default: "default")
    pub exec: Option<String>,
    /// Workers alive when a ramping scenario starts (k6: startVUs)
    #[serde(alias = "startVUs")]
    pub start_vus: Option<usize>,
    /// Ramping schedule (k6: stages)
    #[serde(alias = "stages")]
    pub schedule: Option<Vec<ScheduleStep>>,
    /// Time retiring workers get to finish their iteration (k6: gracefulRampDown)
    #[serde(alias = "gracefulRampDown")]
    pub graceful_ramp_down: Option<String>,
    /// Time in-flight iterations get once the scenario ends (k6: gracefulStop)
    #[serde(alias = "gracefulStop")]
    pub graceful_stop: Option<String>,
    /// Delay before starting this scenario, e.g. "10m" (k6: startTime)
    #[serde(alias = "startTime")]
    pub start_time: Option<String>,
    /// Fixed number of workers for constant-vus (k6: vus)
    #[serde(alias = "vus")]
    pub workers: Option<usize>,
    /// Duration of constant-vus and arrival-rate scenarios
    pub duration: Option<String>,
    /// Iteration starts per time unit
    pub rate: Option<u64>,
    /// Time unit for rate (k6: timeUnit)
    #[serde(alias = "timeUnit")]
    pub time_unit: Option<String>,
    /// Workers allocated before the first arrival (k6: preAllocatedVUs)
    #[serde(alias = "preAllocatedVUs")]
    pub pre_allocated_vus: Option<usize>,
    /// Upper bound of the arrival-rate worker pool (k6: maxVUs)
    #[serde(alias = "maxVUs")]
    pub max_vus: Option<usize>,
    /// Arrival process: periodic (default) or poisson
    pub arrival: Option<ArrivalKind>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Base URL of the Crocodiles API
    #[serde(alias = "baseUrl")]
    pub base_url: Option<String>,
    /// Pause between workload steps (k6: thinkTime)
    #[serde(alias = "thinkTime")]
    pub think_time: Option<String>,
    /// Cached token policy on 401 responses (k6: tokenRefresh)
    #[serde(alias = "tokenRefresh")]
    pub token_refresh: Option<TokenRefresh>,
    /// Credentials CSV, relative to the config file
    pub fixtures: Option<PathBuf>,
    /// Pass/Fail criteria per metric
    #[serde(default, alias = "criteria")]
    pub thresholds: BTreeMap<String, ThresholdSpec>,
    /// Named scenarios, run concurrently
    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioConfig>,
}

fn duration_option(
    context: impl Fn() -> String,
    value: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => parse_duration_str(raw).ok_or_else(|| ConfigError::InvalidDuration {
            context: context(),
            value: raw.to_string(),
        }),
    }
}

impl ScenarioConfig {
    fn reject(&self, name: &str, options: &[(&'static str, bool)]) -> Result<(), ConfigError> {
        match options.iter().find(|(_, present)| *present) {
            Some((option, _)) => Err(ConfigError::UnsupportedOption {
                scenario: name.to_string(),
                option: *option,
                executor: self.executor.as_str(),
            }),
            None => Ok(()),
        }
    }

    fn require<T: Copy>(&self, name: &str, option: &'static str, value: Option<T>) -> Result<T, ConfigError> {
        value.ok_or_else(|| ConfigError::MissingOption {
            scenario: name.to_string(),
            option,
            executor: self.executor.as_str(),
        })
    }

    fn duration(&self, name: &str, option: &'static str, value: Option<&String>, default: Duration) -> Result<Duration, ConfigError> {
        duration_option(
            || format!("scenario '{}' option '{}'", name, option),
            value.map(String::as_str),
            default,
        )
    }

    fn invalid(name: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            context: format!("scenario '{}'", name),
            reason: reason.into(),
        }
    }

    /// Turn the raw options into an executor profile.
    pub fn to_profile(&self, name: &str) -> Result<ScenarioProfile, ConfigError> {
        let graceful_stop = self.duration(name, "graceful_stop", self.graceful_stop.as_ref(), DEFAULT_GRACEFUL)?;
        let profile = match self.executor {
            ExecutorKind::RampingVus => {
                self.reject(
                    name,
                    &[
                        ("workers", self.workers.is_some()),
                        ("duration", self.duration.is_some()),
                        ("rate", self.rate.is_some()),
                        ("time_unit", self.time_unit.is_some()),
                        ("pre_allocated_vus", self.pre_allocated_vus.is_some()),
                        ("max_vus", self.max_vus.is_some()),
                        ("arrival", self.arrival.is_some()),
                    ],
                )?;
                let steps = self.schedule.as_deref().unwrap_or_default();
                if steps.is_empty() {
                    return Err(ConfigError::MissingOption {
                        scenario: name.to_string(),
                        option: "schedule",
                        executor: self.executor.as_str(),
                    });
                }
                let mut stages = Vec::with_capacity(steps.len());
                for (i, step) in steps.iter().enumerate() {
                    let duration = duration_option(
                        || format!("scenario '{}' stage {}", name, i + 1),
                        Some(&step.duration),
                        Duration::ZERO,
                    )?;
                    stages.push(Stage {
                        duration,
                        target: step.target,
                    });
                }
                ScenarioProfile::Ramping(RampingProfile {
                    start_vus: self.start_vus.unwrap_or(0),
                    stages,
                    graceful_ramp_down: self.duration(
                        name,
                        "graceful_ramp_down",
                        self.graceful_ramp_down.as_ref(),
                        DEFAULT_GRACEFUL,
                    )?,
                    graceful_stop,
                })
            }
            ExecutorKind::ConstantVus => {
                self.reject(
                    name,
                    &[
                        ("start_vus", self.start_vus.is_some()),
                        ("schedule", self.schedule.is_some()),
                        ("graceful_ramp_down", self.graceful_ramp_down.is_some()),
                        ("rate", self.rate.is_some()),
                        ("time_unit", self.time_unit.is_some()),
                        ("pre_allocated_vus", self.pre_allocated_vus.is_some()),
                        ("max_vus", self.max_vus.is_some()),
                        ("arrival", self.arrival.is_some()),
                    ],
                )?;
                let workers = self.require(name, "workers", self.workers)?;
                let duration = self.duration(
                    name,
                    "duration",
                    Some(self.require(name, "duration", self.duration.as_ref())?),
                    Duration::ZERO,
                )?;
                ScenarioProfile::Ramping(RampingProfile {
                    start_vus: workers,
                    stages: vec![Stage {
                        duration,
                        target: workers,
                    }],
                    graceful_ramp_down: DEFAULT_GRACEFUL,
                    graceful_stop,
                })
            }
            ExecutorKind::ConstantArrivalRate => {
                self.reject(
                    name,
                    &[
                        ("start_vus", self.start_vus.is_some()),
                        ("schedule", self.schedule.is_some()),
                        ("graceful_ramp_down", self.graceful_ramp_down.is_some()),
                        ("workers", self.workers.is_some()),
                    ],
                )?;
                let rate = self.require(name, "rate", self.rate)?;
                if rate == 0 {
                    return Err(Self::invalid(name, "rate must be greater than 0"));
                }
                let time_unit = self.duration(name, "time_unit", self.time_unit.as_ref(), Duration::from_secs(1))?;
                if time_unit.is_zero() {
                    return Err(Self::invalid(name, "time_unit must be greater than 0"));
                }
                let duration = self.duration(
                    name,
                    "duration",
                    Some(self.require(name, "duration", self.duration.as_ref())?),
                    Duration::ZERO,
                )?;
                let pre_allocated_vus = self.require(name, "pre_allocated_vus", self.pre_allocated_vus)?;
                let max_vus = self.max_vus.unwrap_or(pre_allocated_vus);
                if max_vus < pre_allocated_vus {
                    return Err(Self::invalid(
                        name,
                        format!(
                            "max_vus ({}) must not be lower than pre_allocated_vus ({})",
                            max_vus, pre_allocated_vus
                        ),
                    ));
                }
                ScenarioProfile::ArrivalRate(ArrivalRateProfile {
                    rate,
                    time_unit,
                    pre_allocated_vus,
                    max_vus,
                    duration,
                    graceful_stop,
                    arrival: self.arrival.unwrap_or_default().into(),
                })
            }
        };

        if profile.capacity() == 0 {
            return Err(Self::invalid(name, "scenario never starts a worker"));
        }
        Ok(profile)
    }
}

impl Config {
    /// Read a YAML or JSON config, picked by extension. Relative fixture paths
    /// are resolved against the config file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let mut config: Config = if ext == "json" {
            serde_json::from_str(&content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?
        };

        let fixtures = config
            .fixtures
            .take()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FIXTURES));
        config.fixtures = Some(match path.parent() {
            Some(dir) if fixtures.is_relative() => dir.join(fixtures),
            _ => fixtures,
        });
        Ok(config)
    }

    pub fn fixtures_path(&self) -> PathBuf {
        self.fixtures
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FIXTURES))
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> Result<String, ConfigError> {
        let url = self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                context: "base_url".to_string(),
                reason: format!("'{}' is not an http(s) URL", url),
            });
        }
        Ok(url.trim_end_matches('/').to_string())
    }

    pub fn think_time(&self) -> Result<Duration, ConfigError> {
        duration_option(|| "think_time".to_string(), self.think_time.as_deref(), DEFAULT_THINK_TIME)
    }

    pub fn token_refresh(&self) -> TokenRefresh {
        self.token_refresh.unwrap_or_default()
    }

    /// Check every option and build the run plan. Nothing has started when
    /// this fails.
    pub fn validate(&self) -> Result<RunPlan, ConfigError> {
        if self.scenarios.is_empty() {
            return Err(ConfigError::NoScenarios);
        }

        let mut plans = Vec::with_capacity(self.scenarios.len());
        for (name, scenario) in &self.scenarios {
            let profile = scenario.to_profile(name)?;
            let start_time = scenario.duration(name, "start_time", scenario.start_time.as_ref(), Duration::ZERO)?;
            plans.push(ScenarioPlan {
                name: name.clone(),
                exec: scenario.exec.clone().unwrap_or_else(|| DEFAULT_EXEC.to_string()),
                start_time,
                profile,
                id_offset: 0,
            });
        }

        let table: BTreeMap<String, Vec<String>> = self
            .thresholds
            .iter()
            .map(|(metric, spec)| (metric.clone(), spec.expressions()))
            .collect();
        let rules = thresholds::parse_rules(&table)?;

        // Surface bad settings here rather than mid-run.
        self.base_url()?;
        self.think_time()?;

        Ok(RunPlan::new(plans, rules))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::schema_for;
    use std::fs;
    use tempfile::TempDir;

    const CROCODILES: &str = r#"
thresholds:
  http_req_failed: "rate<0.01"
scenarios:
  standard:
    executor: ramping-vus
    exec: standardWorkloadMix
    stages:
      - { duration: 5m, target: 20 }
      - { duration: 20m, target: 20 }
      - { duration: 5m, target: 0 }
    gracefulRampDown: 30s
  spike:
    executor: constant-arrival-rate
    exec: spikeWorkload
    rate: 30
    timeUnit: 1s
    duration: 1m
    preAllocatedVUs: 30
    maxVUs: 30
    startTime: 10m
"#;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_config_schema() {
        let schema = schema_for!(Config);
        let schema_json = serde_json::to_string(&schema).unwrap();
        assert!(schema_json.contains("scenarios"));
        assert!(schema_json.contains("thresholds"));
        assert!(schema_json.contains("constant-arrival-rate"));
    }

    #[test]
    fn test_k6_options_build_plan() {
        let plan = parse(CROCODILES).validate().unwrap();
        assert_eq!(plan.scenarios.len(), 2);

        // Ordered by name: spike owns ids 1..=30, standard 31..=50.
        let spike = &plan.scenarios[0];
        assert_eq!(spike.name, "spike");
        assert_eq!(spike.exec, "spikeWorkload");
        assert_eq!(spike.start_time, Duration::from_secs(600));
        assert_eq!(spike.id_offset, 0);
        match &spike.profile {
            ScenarioProfile::ArrivalRate(p) => {
                assert_eq!(p.rate, 30);
                assert_eq!(p.time_unit, Duration::from_secs(1));
                assert_eq!(p.duration, Duration::from_secs(60));
                assert_eq!(p.pre_allocated_vus, 30);
                assert_eq!(p.max_vus, 30);
                assert_eq!(p.arrival, ArrivalProcess::Periodic);
                assert_eq!(p.graceful_stop, DEFAULT_GRACEFUL);
            }
            other => panic!("Expected arrival-rate profile, got {:?}", other),
        }

        let standard = &plan.scenarios[1];
        assert_eq!(standard.id_offset, 30);
        match &standard.profile {
            ScenarioProfile::Ramping(p) => {
                assert_eq!(p.start_vus, 0);
                assert_eq!(p.stages.len(), 3);
                assert_eq!(p.stages[1].duration, Duration::from_secs(1200));
                assert_eq!(p.graceful_ramp_down, Duration::from_secs(30));
                assert_eq!(p.capacity(), 20);
            }
            other => panic!("Expected ramping profile, got {:?}", other),
        }

        assert_eq!(plan.thresholds.len(), 1);
        assert_eq!(plan.thresholds[0].expression, "rate<0.01");
    }

    #[test]
    fn test_crocodile_defaults() {
        let config = parse(CROCODILES);
        assert_eq!(config.base_url().unwrap(), DEFAULT_BASE_URL);
        assert_eq!(config.think_time().unwrap(), DEFAULT_THINK_TIME);
        assert_eq!(config.token_refresh(), TokenRefresh::Never);
        assert_eq!(config.fixtures_path(), PathBuf::from(DEFAULT_FIXTURES));
    }

    #[test]
    fn test_workload_settings() {
        let config = parse(
            r#"
baseUrl: "http://localhost:8080/"
thinkTime: 250ms
tokenRefresh: on-unauthorized
scenarios:
  s: { executor: constant-vus, vus: 2, duration: 10s }
"#,
        );
        assert_eq!(config.base_url().unwrap(), "http://localhost:8080");
        assert_eq!(config.think_time().unwrap(), Duration::from_millis(250));
        assert_eq!(config.token_refresh(), TokenRefresh::OnUnauthorized);
    }

    #[test]
    fn test_constant_vus_maps_to_flat_ramp() {
        let config = parse(
            r#"
scenarios:
  flat:
    executor: constant-vus
    workers: 5
    duration: 30s
"#,
        );
        let plan = config.validate().unwrap();
        assert_eq!(plan.scenarios[0].exec, "default");
        match &plan.scenarios[0].profile {
            ScenarioProfile::Ramping(p) => {
                assert_eq!(p.start_vus, 5);
                assert_eq!(p.target_at(Duration::ZERO), 5);
                assert_eq!(p.target_at(Duration::from_secs(29)), 5);
                assert_eq!(p.total_duration(), Duration::from_secs(30));
            }
            other => panic!("Expected ramping profile, got {:?}", other),
        }
    }

    #[test]
    fn test_thresholds_accept_string_or_list() {
        let config = parse(
            r#"
criteria:
  http_req_duration:
    - "p(95) < 500"
    - "avg < 200"
  checks: "rate > 0.95"
scenarios:
  s: { executor: constant-vus, vus: 1, duration: 1s }
"#,
        );
        let plan = config.validate().unwrap();
        assert_eq!(plan.thresholds.len(), 3);
    }

    #[test]
    fn test_unknown_threshold_metric_rejected() {
        let config = parse(
            r#"
thresholds:
  http_req_magic: "rate<0.01"
scenarios:
  s: { executor: constant-vus, vus: 1, duration: 1s }
"#,
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Threshold(ThresholdError::UnknownMetric(_)))
        ));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let res: Result<Config, _> = serde_yaml::from_str(
            r#"
scenarios:
  s:
    executor: constant-vus
    vus: 1
    duration: 1s
    iterations: 10
"#,
        );
        assert!(res.is_err());

        let res: Result<Config, _> = serde_yaml::from_str("jitter: 100ms\n");
        assert!(res.is_err());
    }

    #[test]
    fn test_unknown_executor_rejected() {
        let res: Result<Config, _> =
            serde_yaml::from_str("scenarios:\n  s: { executor: per-vu-iterations }\n");
        assert!(res.is_err());
    }

    #[test]
    fn test_missing_options() {
        let config = parse("scenarios:\n  s: { executor: constant-arrival-rate, duration: 1m, preAllocatedVUs: 1 }\n");
        match config.validate() {
            Err(ConfigError::MissingOption { option, .. }) => assert_eq!(option, "rate"),
            other => panic!("Expected MissingOption, got {:?}", other),
        }

        let config = parse("scenarios:\n  s: { executor: ramping-vus }\n");
        match config.validate() {
            Err(ConfigError::MissingOption { option, .. }) => assert_eq!(option, "schedule"),
            other => panic!("Expected MissingOption, got {:?}", other),
        }

        assert!(matches!(
            Config::default().validate(),
            Err(ConfigError::NoScenarios)
        ));
    }

    #[test]
    fn test_options_foreign_to_executor_rejected() {
        let config = parse(
            r#"
scenarios:
  s:
    executor: ramping-vus
    rate: 10
    stages: [{ duration: 1s, target: 1 }]
"#,
        );
        match config.validate() {
            Err(ConfigError::UnsupportedOption { option, executor, .. }) => {
                assert_eq!(option, "rate");
                assert_eq!(executor, "ramping-vus");
            }
            other => panic!("Expected UnsupportedOption, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_values() {
        let config = parse(
            "scenarios:\n  s: { executor: constant-arrival-rate, rate: 5, duration: 1m, preAllocatedVUs: 10, maxVUs: 2 }\n",
        );
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));

        let config = parse("scenarios:\n  s: { executor: constant-vus, vus: 1, duration: soon }\n");
        match config.validate() {
            Err(ConfigError::InvalidDuration { value, .. }) => assert_eq!(value, "soon"),
            other => panic!("Expected InvalidDuration, got {:?}", other),
        }

        let config = parse(
            "scenarios:\n  s: { executor: ramping-vus, stages: [{ duration: 1m, target: 0 }] }\n",
        );
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));

        let config = parse("baseUrl: ftp://example.com\nscenarios:\n  s: { executor: constant-vus, vus: 1, duration: 1s }\n");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_poisson_arrivals() {
        let config = parse(
            "scenarios:\n  s: { executor: constant-arrival-rate, rate: 5, duration: 1m, preAllocatedVUs: 1, arrival: poisson }\n",
        );
        let plan = config.validate().unwrap();
        match &plan.scenarios[0].profile {
            ScenarioProfile::ArrivalRate(p) => {
                assert_eq!(p.arrival, ArrivalProcess::Poisson);
                assert_eq!(p.max_vus, 1);
            }
            other => panic!("Expected arrival-rate profile, got {:?}", other),
        }
    }

    #[test]
    fn test_load_json_resolves_fixtures() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        fs::write(
            &path,
            r#"{
                "fixtures": "users.csv",
                "scenarios": { "s": { "executor": "constant-vus", "vus": 1, "duration": "1s" } }
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.fixtures_path(), dir.path().join("users.csv"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml_defaults_fixtures_next_to_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.yaml");
        fs::write(&path, CROCODILES).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.fixtures_path(), dir.path().join(DEFAULT_FIXTURES));
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(&dir.path().join("missing.yaml")),
            Err(ConfigError::Io { .. })
        ));

        let path = dir.path().join("broken.yaml");
        fs::write(&path, "scenarios: [yaml: content").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Yaml { .. })));
    }
}
