pub mod config;
pub mod validate;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::sync::Arc;

use crate::crocodiles::{self, CrocodileOptions};
use crate::engine::http_client::HttpCollaborator;
use crate::engine::{Engine, RunPlan, SetupError};
use crate::workload::data::FixtureCache;
use config::Config;

#[derive(Parser)]
#[command(name = "volley")]
#[command(about = "Scenario-driven load generator for the Crocodiles API", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every scenario of a config file
    Run {
        /// Path to the configuration file (YAML/JSON)
        config: PathBuf,

        /// Override the API base URL
        #[arg(long, env = "VOLLEY_BASE_URL")]
        base_url: Option<String>,

        /// Print the final summary as JSON instead of the text report
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Export final summary to a JSON file
        #[arg(long)]
        export_json: Option<PathBuf>,

        /// Output configuration (e.g., --out csv=results.csv)
        #[arg(long)]
        out: Option<String>,
    },
    /// Validate a config file and its fixtures without running it
    Validate {
        /// Path to the configuration file (YAML/JSON)
        config: PathBuf,
    },
    /// Print the JSON Schema of the config file
    Schema {
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse an `--out` value. Only `csv=<path>` is supported.
pub fn parse_out(value: &str) -> Result<PathBuf, String> {
    match value.strip_prefix("csv=") {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Err(format!("unsupported output '{}', expected csv=<path>", value)),
    }
}

/// Build the engine for `config`: validate the plan, register the Crocodile
/// workloads and load fixtures when a scenario needs them.
pub fn prepare(
    config: &Config,
    client: Arc<dyn HttpCollaborator>,
    fixtures: &FixtureCache,
) -> Result<(Engine, RunPlan), SetupError> {
    let plan = config.validate()?;
    let options = CrocodileOptions::from_config(config)?;

    let mut engine = Engine::new(client);
    crocodiles::register(&mut engine, &options);

    if engine.needs_fixtures(&plan) {
        let path = config.fixtures_path();
        let rows = fixtures.get_or_load(&path)?;
        tracing::info!(path = %path.display(), rows = rows.len(), "loaded fixtures");
        engine.set_fixtures(rows);
    }

    engine.check_setup(&plan)?;
    Ok((engine, plan))
}
