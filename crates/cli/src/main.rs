use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use autoflow_engine::{TestReport, TestSelector, drive_fixture_run, load_fixture_file};
use autoflow_types::{FixtureRunControl, FixtureRunEvent, FixtureRunStatus, TestOutcome};
use autoflow_util::{EngineSettings, seconds_to_duration};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Runs automation fixtures described in YAML or JSON documents.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a fixture's tests
    Run {
        /// Fixture document to run
        file: PathBuf,
        /// Only run tests carrying one of these tags
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Pause after each actor, in seconds
        #[arg(short, long)]
        delay: Option<f64>,
        /// Print the final reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// List a fixture's tests in execution order
    List {
        /// Fixture document to inspect
        file: PathBuf,
        /// Only list tests carrying one of these tags
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let settings = EngineSettings::load().context("loading engine settings")?;
    init_tracing(&settings);
    let args = Args::parse();

    match args.command {
        Commands::Run { file, tags, delay, json } => run_fixture(&settings, file, tags, delay, json).await,
        Commands::List { file, tags } => list_tests(&settings, file, tags),
    }
}

fn init_tracing(settings: &EngineSettings) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| settings.log_filter.clone())
        .unwrap_or_else(|| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .try_init();
}

fn selector(settings: &EngineSettings, tags: Vec<String>) -> TestSelector {
    if tags.is_empty() {
        TestSelector::with_tags(settings.default_tags.iter().cloned())
    } else {
        TestSelector::with_tags(tags)
    }
}

async fn run_fixture(settings: &EngineSettings, file: PathBuf, tags: Vec<String>, delay: Option<f64>, json: bool) -> Result<ExitCode> {
    let processing_delay = delay.map(seconds_to_duration).unwrap_or_else(|| settings.processing_delay());
    let document = load_fixture_file(&file)?;
    let orchestrator = document
        .instantiate(processing_delay)?
        .into_orchestrator(processing_delay)
        .with_context(|| format!("opening tests of {}", file.display()))?;

    let (control_tx, control_rx) = unbounded_channel();
    let (event_tx, mut event_rx) = unbounded_channel();
    let run = tokio::spawn(drive_fixture_run(orchestrator, selector(settings, tags), control_rx, event_tx));

    let mut status = FixtureRunStatus::Failed;
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                if let FixtureRunEvent::RunCompleted { status: final_status, .. } = &event {
                    status = *final_status;
                }
                if !json {
                    print_event(&event);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupt received; cancelling run");
                let _ = control_tx.send(FixtureRunControl::Cancel);
            }
        }
    }

    let reports = run.await.context("fixture run task panicked")??;
    if json {
        println!("{}", serde_json::to_string_pretty(&reports_json(&reports))?);
    }
    info!(status = ?status, "run finished");
    Ok(match status {
        FixtureRunStatus::Succeeded => ExitCode::SUCCESS,
        FixtureRunStatus::Failed | FixtureRunStatus::Canceled => ExitCode::FAILURE,
    })
}

fn list_tests(settings: &EngineSettings, file: PathBuf, tags: Vec<String>) -> Result<ExitCode> {
    let document = load_fixture_file(&file)?;
    let processing_delay = settings.processing_delay();
    let orchestrator = document.instantiate(processing_delay)?.into_orchestrator(processing_delay)?;
    for test_id in orchestrator.ordered_test_ids(&selector(settings, tags)) {
        let Some(case) = orchestrator.test(&test_id) else { continue };
        let muted = if case.info.is_muted { " (muted)" } else { "" };
        println!("{}\t{}{}", case.info.id, case.info.name, muted);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_event(event: &FixtureRunEvent) {
    match event {
        FixtureRunEvent::RunStarted { fixture_id, .. } => println!("Running fixture {fixture_id}"),
        FixtureRunEvent::SetupCompleted { .. } => {}
        FixtureRunEvent::SetupFailed { error, .. } => println!("One-time setup failed: {error}"),
        FixtureRunEvent::TestStarted { index, name, .. } => println!("[{}] {name}", index + 1),
        FixtureRunEvent::TestFinished { result, .. } => {
            let label = match result.result {
                TestOutcome::Success => "passed",
                TestOutcome::Failed => "FAILED",
                TestOutcome::Aborted => "aborted",
                TestOutcome::None => "not run",
            };
            match &result.error_message {
                Some(message) => println!("    {label} in {} ms: {message}", result.execution_time.as_millis()),
                None => println!("    {label} in {} ms", result.execution_time.as_millis()),
            }
        }
        FixtureRunEvent::TeardownFailed { error } => println!("One-time teardown failed: {error}"),
        FixtureRunEvent::RunCompleted { status, .. } => {
            let label = match status {
                FixtureRunStatus::Succeeded => "succeeded",
                FixtureRunStatus::Failed => "failed",
                FixtureRunStatus::Canceled => "was cancelled",
            };
            println!("Run {label}");
        }
    }
}

fn reports_json(reports: &[TestReport]) -> serde_json::Value {
    reports
        .iter()
        .map(|report| serde_json::json!({ "test": report.test, "result": report.result }))
        .collect()
}
