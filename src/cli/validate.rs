use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::cli::config::Config;
use crate::engine::http_client::ReqwestCollaborator;
use crate::engine::profile::ScenarioProfile;
use crate::workload::data::FixtureCache;

/// Validate a config file without running it.
/// Checks for:
/// - Syntax and unknown keys
/// - Scenario options, durations and thresholds
/// - Workload names and fixture coverage
pub fn run_validate(config_path: &Path) -> Result<()> {
    println!("Validating {}...", config_path.display());

    let config = match Config::load(config_path) {
        Ok(config) => {
            println!("  ✓ Config syntax OK");
            config
        }
        Err(e) => {
            println!("  ✗ Config invalid: {}", e);
            return Err(e.into());
        }
    };

    let client = Arc::new(ReqwestCollaborator::new()?);
    let fixtures = FixtureCache::new();
    let (engine, plan) = match super::prepare(&config, client, &fixtures) {
        Ok(prepared) => prepared,
        Err(e) => {
            println!("  ✗ Validation failed: {}", e);
            return Err(e.into());
        }
    };

    println!("  ✓ Scenarios valid");
    for scenario in &plan.scenarios {
        let detail = match &scenario.profile {
            ScenarioProfile::Ramping(p) => format!(
                "{} stage(s) over {:?}, up to {} workers",
                p.stages.len(),
                p.total_duration(),
                p.capacity()
            ),
            ScenarioProfile::ArrivalRate(p) => format!(
                "{} per {:?} for {:?} ({} arrivals), {}..{} workers",
                p.rate,
                p.time_unit,
                p.duration,
                p.total_arrivals(),
                p.pre_allocated_vus,
                p.max_vus
            ),
        };
        println!(
            "    {} ({}, exec {}, start {:?}): {}",
            scenario.name,
            scenario.profile.executor_name(),
            scenario.exec,
            scenario.start_time,
            detail
        );
    }
    let needed = engine.fixture_capacity(&plan);
    if needed > 0 {
        let path = config.fixtures_path();
        let set = fixtures.get_or_load(&path)?;
        println!(
            "  ✓ Fixtures cover {} worker(s) with {} row(s) [{}]: {}",
            needed,
            set.len(),
            set.headers().join(", "),
            path.display()
        );
    }
    println!("  ✓ {} threshold(s) parsed", plan.thresholds.len());

    Ok(())
}
