//! main.rs — fault-sim entry point
//!
//! Loads scenario catalogs, runs scenarios against the configured telemetry
//! source, writes reports, and optionally serves the HTTP control API.
//!
//!   fault-sim --list
//!   fault-sim --scenarios extra.csv --run acc_stuck_x --report report.json
//!   fault-sim --all --export-csv results.csv
//!   fault-sim --serve --ctrl-port 9090

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use fault_simulator::config::Config;
use fault_simulator::injector::FaultInjector;
use fault_simulator::report;
use fault_simulator::runner::ScenarioRunner;
use fault_simulator::scenarios::ScenarioManager;
use fault_simulator::server;
use fault_simulator::source::SyntheticSource;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "fault-sim", about = "Navigation fault-injection and monitoring engine")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    /// Extra scenario source (JSON or CSV by extension), repeatable
    #[arg(long = "scenarios", value_name = "FILE")]
    scenarios: Vec<PathBuf>,
    /// Scenario id to run, repeatable
    #[arg(long = "run", value_name = "ID")]
    run: Vec<String>,
    /// Run every scenario in the catalog
    #[arg(long)]
    all: bool,
    /// Route name recorded with each result
    #[arg(long, default_value = "A")]
    route: String,
    /// Write the aggregate report (JSON) here after the runs
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
    /// Write all results as CSV here after the runs
    #[arg(long, value_name = "FILE")]
    export_csv: Option<PathBuf>,
    /// Print the scenario catalog as JSON and continue
    #[arg(long)]
    list: bool,
    /// Serve the HTTP control API once the runs are done
    #[arg(long)]
    serve: bool,
    /// Control API port (overrides [server].ctrl_port)
    #[arg(long)]
    ctrl_port: Option<u16>,
    /// RNG seed (overrides [runner].seed)
    #[arg(long)]
    seed: Option<u64>,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fault_simulator=info,fault_sim=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if args.seed.is_some() {
        cfg.runner.seed = args.seed;
    }
    let ctrl_port = args.ctrl_port.unwrap_or(cfg.server.ctrl_port);

    info!(
        "🧪 Fault simulator starting: {} Hz, min run {}s, logs in {}",
        cfg.runner.tick_rate_hz,
        cfg.runner.min_test_duration_s,
        cfg.runner.logs_dir.display()
    );

    // Catalog
    let injector = match cfg.runner.seed {
        Some(seed) => FaultInjector::with_seed(seed),
        None => FaultInjector::new(),
    };
    let mut manager = ScenarioManager::new(injector);
    manager.create_default_scenarios();
    for path in &args.scenarios {
        manager
            .load_scenarios(path)
            .with_context(|| format!("loading scenarios from {}", path.display()))?;
    }

    if args.list {
        println!("{}", serde_json::to_string_pretty(&manager.list_scenarios())?);
    }

    let run_ids: Vec<String> = if args.all {
        manager.list_scenarios().into_iter().map(|s| s.id).collect()
    } else {
        args.run.clone()
    };

    // Separate stream from the injector so noise and telemetry are independent
    let source = SyntheticSource::new(cfg.synthetic.clone(), cfg.runner.seed.map(|s| s.wrapping_add(1)))
        .context("invalid [synthetic] config")?;
    let runner = Arc::new(
        ScenarioRunner::new(manager, Box::new(source), cfg.runner.clone()).with_assessor(cfg.recovery),
    );

    // Ctrl-C stops the current run; the partial result is still recorded
    let stop = runner.stop_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !stop.stop() {
                std::process::exit(130);
            }
        }
    });

    for id in &run_ids {
        match runner.run_scenario(id, &args.route).await {
            Ok(result) => info!(
                "✅ {}: route_completed={} completion={:.1}% detection={:?} recovery={:?}",
                result.scenario_id,
                result.route_completed,
                result.completion_percentage,
                result.detection_time,
                result.recovery_time,
            ),
            Err(e) => error!("❌ {id}: {e}"),
        }
    }

    {
        let manager = runner.manager();
        let manager = manager.read().await;
        let results = manager.test_results();

        if let Some(path) = &args.report {
            let ids = (!args.run.is_empty() && !args.all).then_some(args.run.as_slice());
            let body = serde_json::to_string_pretty(&report::report_json(results, ids))?;
            tokio::fs::write(path, body)
                .await
                .with_context(|| format!("writing report to {}", path.display()))?;
            info!("📊 Report written to {}", path.display());
        }
        if let Some(path) = &args.export_csv {
            report::export_results_csv(results, path).await?;
        }
    }

    if args.serve {
        server::serve(runner, ctrl_port).await?;
    } else if run_ids.is_empty() && !args.list {
        info!("Nothing to do: pass --list, --run <id>, --all or --serve");
    }
    Ok(())
}
