use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing_subscriber::{fmt, EnvFilter};

use volley::cli::config::Config;
use volley::cli::{self, Cli, Commands};
use volley::engine::control::ControlState;
use volley::engine::http_client::ReqwestCollaborator;
use volley::stats::{self, thresholds, MetricSink};
use volley::workload::data::FixtureCache;

/// Exit status when the run completed but a threshold failed.
const THRESHOLDS_FAILED: i32 = 99;

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

struct RunArgs {
    config: PathBuf,
    base_url: Option<String>,
    json: bool,
    export_json: Option<PathBuf>,
    out: Option<String>,
}

/// Run the config to completion; `Ok(false)` means a threshold failed.
async fn run_load_test(args: RunArgs) -> Result<bool> {
    let csv_path = args
        .out
        .as_deref()
        .map(cli::parse_out)
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let mut config = Config::load(&args.config)?;
    if let Some(url) = args.base_url {
        config.base_url = Some(url);
    }

    let client = Arc::new(ReqwestCollaborator::new()?);
    let (engine, plan) = cli::prepare(&config, client, &FixtureCache::new()).map_err(|e| {
        tracing::error!(error = %e, "run setup failed");
        e
    })?;

    let (sink, rx) = MetricSink::channel();
    let aggregator = stats::spawn_aggregator(rx)?;

    let control = ControlState::new();
    let stopper = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping scenarios");
            stopper.stop();
        }
    });

    tracing::info!(
        scenarios = plan.scenarios.len(),
        workers = plan.total_capacity(),
        "starting run"
    );
    let summaries = engine.run(&plan, &control, sink).await?;
    drop(engine);

    let aggregate = tokio::task::spawn_blocking(move || aggregator.join())
        .await?
        .map_err(|_| anyhow::anyhow!("metrics aggregator panicked"))?;

    let outcomes = thresholds::evaluate(&aggregate, &plan.thresholds);
    if args.json {
        println!("{}", aggregate.to_json());
    } else {
        aggregate.report();
        thresholds::print_results(&outcomes);
    }
    for summary in &summaries {
        tracing::debug!(
            scenario = %summary.name,
            peak_workers = summary.peak_workers,
            "scenario summary"
        );
    }

    if let Some(path) = args.export_json {
        std::fs::write(&path, aggregate.to_json())?;
        tracing::info!(path = %path.display(), "summary exported");
    }
    if let Some(path) = csv_path {
        std::fs::write(&path, stats::csv::generate_csv(&aggregate.to_report()))?;
        tracing::info!(path = %path.display(), "CSV exported");
    }

    Ok(thresholds::all_passed(&outcomes))
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    match args.command {
        Commands::Run {
            config,
            base_url,
            json,
            export_json,
            out,
        } => {
            let rt = Runtime::new()?;
            let passed = rt.block_on(run_load_test(RunArgs {
                config,
                base_url,
                json,
                export_json,
                out,
            }))?;
            drop(rt);
            if !passed {
                eprintln!("some thresholds have failed");
                std::process::exit(THRESHOLDS_FAILED);
            }
        }
        Commands::Validate { config } => {
            cli::validate::run_validate(&config)?;
        }
        Commands::Schema { output } => {
            let schema = schemars::schema_for!(Config);
            let schema_json = serde_json::to_string_pretty(&schema)?;
            if let Some(out_path) = output {
                std::fs::write(&out_path, schema_json)?;
                println!("JSON Schema written to {:?}", out_path);
            } else {
                println!("{}", schema_json);
            }
        }
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "volley", &mut std::io::stdout());
        }
    }

    Ok(())
}
