//! `tallywatch` command line.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;

use tallywatch::agent::{Agent, CollectingSink};
use tallywatch::clock::system_clock;
use tallywatch::config::{load_config, load_config_from_str, Config};
use tallywatch::context::AppContext;
use tallywatch::db::Database;
use tallywatch::error::{ConfigError, Result, TallyError};
use tallywatch::extract::Normalizer;
use tallywatch::incident::{IncidentFilter, IncidentStatus, PageRequest};
use tallywatch::payload::{project_v1, ExtractionPayload};
use tallywatch::pipeline::{DocumentSubmission, Pipeline};
use tallywatch::provider::{FixtureProvider, OcrProvider, ProviderOutput};
use tallywatch::telemetry;
use tallywatch::validation::Severity;
use tallywatch::worker::{JobOutcome, JobPriority, WorkerPool};

const DEFAULT_CONFIG: &str = r#"{ "version": "1.0" }"#;

// ─── CLI args ───────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tallywatch",
    version,
    about = "Vote-tally form extraction, cross-validation and incident tracking"
)]
struct Cli {
    /// JSON configuration file. Built-in defaults apply when omitted.
    #[arg(short, long, value_name = "FILE", env = "TALLYWATCH_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and print the effective settings.
    CheckConfig,

    /// Create or upgrade the database schema.
    Migrate,

    /// Submit documents and process them until every job settles.
    Submit {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long, default_value = "normal")]
        priority: JobPriority,

        /// Queue one job per page, overriding `workers.split_pages`.
        #[arg(long)]
        split_pages: bool,

        /// Scripted provider output (JSON) used for every document.
        #[arg(long, value_name = "FILE")]
        fixture: Option<PathBuf>,
    },

    /// List incidents.
    Incidents {
        #[arg(long)]
        status: Option<IncidentStatus>,

        #[arg(long)]
        severity: Option<Severity>,

        #[arg(long)]
        table: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 50)]
        per_page: u32,
    },

    /// Escalate critical incidents older than the configured escalation age.
    EscalateOverdue,

    /// Review queue counts.
    ReviewStats,

    /// Run the monitoring agent until Ctrl-C.
    Agent {
        /// Run each poll once, print the alerts and exit.
        #[arg(long)]
        once: bool,
    },

    /// Print a document's extraction payload.
    Export {
        document_id: String,

        /// Project to the legacy version 1 shape.
        #[arg(long)]
        v1: bool,
    },

    /// Show how a cell text is normalized.
    Normalize { text: String },
}

// ─── Entry point ────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error [{}]: {}", e.code(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_config_from_str(DEFAULT_CONFIG)?,
    };
    if let Err(e) = telemetry::init(&config.logging) {
        eprintln!("Logging not initialised: {}", e);
    }

    match cli.command {
        Command::CheckConfig => {
            print_json(&config)?;
            info!(
                "Configuration valid: {} worker(s), {} agent rule(s)",
                config.workers.count,
                config.agent.rules.len()
            );
            Ok(())
        }
        Command::Migrate => {
            let path = database_path(&config)?;
            Database::open(&path)?;
            println!("Database ready at {}", path.display());
            Ok(())
        }
        Command::Submit {
            files,
            priority,
            split_pages,
            fixture,
        } => submit(config, &files, priority, split_pages, fixture.as_deref()),
        Command::Incidents {
            status,
            severity,
            table,
            page,
            per_page,
        } => {
            let ctx = open_context(config, offline_provider())?;
            let filter = IncidentFilter {
                status,
                severity,
                table_id: table,
                ..IncidentFilter::default()
            };
            print_json(&ctx.incidents.list(&filter, PageRequest { page, per_page })?)
        }
        Command::EscalateOverdue => {
            let age = chrono::Duration::minutes(config.incidents.escalation_age_minutes);
            let ctx = open_context(config, offline_provider())?;
            print_json(&ctx.incidents.escalate_overdue(age, "cli")?)
        }
        Command::ReviewStats => {
            let ctx = open_context(config, offline_provider())?;
            print_json(&ctx.review.stats()?)
        }
        Command::Agent { once } => run_agent(config, once),
        Command::Export { document_id, v1 } => {
            let ctx = open_context(config, offline_provider())?;
            let current = Pipeline::new(ctx).payload(&document_id)?;
            let payload = if v1 {
                ExtractionPayload::V1(project_v1(&current))
            } else {
                ExtractionPayload::V2(current)
            };
            print_json(&payload)
        }
        Command::Normalize { text } => {
            let normalizer = Normalizer::new(config.extraction.marks.clone())
                .with_repair_confidence(config.extraction.repair_confidence);
            print_json(&normalizer.normalize(&text))
        }
    }
}

// ─── Commands ───────────────────────────────────────────────────────────────

fn submit(
    config: Config,
    files: &[PathBuf],
    priority: JobPriority,
    split_pages: bool,
    fixture: Option<&Path>,
) -> Result<()> {
    let provider: Arc<dyn OcrProvider> = match fixture {
        Some(path) => {
            let output: ProviderOutput = serde_json::from_slice(&read_file(path)?)?;
            let provider = FixtureProvider::new();
            provider.set_default_output(output);
            Arc::new(provider)
        }
        None => live_provider(&config),
    };
    let workers = config.workers.count;
    let ctx = open_context(config, provider)?;
    let pipeline = Pipeline::new(ctx);
    pipeline.recover()?;

    let mut receipts = Vec::with_capacity(files.len());
    let mut pending: HashSet<String> = HashSet::new();
    for path in files {
        let content = read_file(path)?;
        let mut submission =
            DocumentSubmission::new(path.display().to_string(), content).with_priority(priority);
        if split_pages {
            submission = submission.split_pages(true);
        }
        let receipt = pipeline.submit(submission)?;
        if !receipt.duplicate {
            pending.extend(receipt.job_ids.iter().cloned());
        }
        receipts.push(receipt);
    }

    let pool = WorkerPool::start(pipeline, workers)?;
    let interrupted = interrupt_flag();
    let mut outcomes: Vec<JobOutcome> = Vec::new();
    while !pending.is_empty() && !interrupted.load(Ordering::SeqCst) {
        if let Some(outcome) = pool.recv_outcome_timeout(Duration::from_millis(250)) {
            if !outcome.requeued {
                pending.remove(&outcome.job_id);
            }
            outcomes.push(outcome);
        }
    }
    if !pending.is_empty() {
        warn!("Stopped with {} job(s) unfinished", pending.len());
    }
    pool.shutdown();
    pool.wait();

    #[derive(Serialize)]
    struct Report<T, U> {
        receipts: T,
        outcomes: U,
    }
    print_json(&Report {
        receipts: &receipts,
        outcomes: &outcomes,
    })
}

fn run_agent(config: Config, once: bool) -> Result<()> {
    let ctx = open_context(config, offline_provider())?;

    if once {
        let sink = Arc::new(CollectingSink::new());
        let agent = Agent::new(ctx, sink.clone());
        let reports = agent.run_once()?;
        for report in &reports {
            info!(
                "{}: {} incident(s) created, {} escalated",
                report.concern,
                report.incidents_created.len(),
                report.escalated.len()
            );
        }
        return print_json(&sink.take());
    }

    let sink = Arc::new(ctx.alerts.clone());
    let mut alerts = ctx.alerts.subscribe();
    let agent = Arc::new(Agent::new(ctx, sink));
    let handle = agent.start().map_err(|e| TallyError::Io {
        path: PathBuf::from("<agent poller>"),
        source: e,
    })?;

    let interrupted = interrupt_flag();
    while !interrupted.load(Ordering::SeqCst) {
        loop {
            match alerts.try_recv() {
                Ok(alert) => print_json(&alert)?,
                Err(tokio::sync::broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Skipped {} alert(s)", skipped);
                }
                Err(_) => break,
            }
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    handle.stop();
    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn database_path(config: &Config) -> Result<PathBuf> {
    config.database_path().ok_or_else(|| {
        ConfigError::Validation {
            message: "no database path configured and no data directory available".to_string(),
        }
        .into()
    })
}

fn open_context(config: Config, provider: Arc<dyn OcrProvider>) -> Result<AppContext> {
    let db = Database::open(&database_path(&config)?)?;
    Ok(AppContext::new(config, db, system_clock(), provider))
}

/// Commands that never call the provider.
fn offline_provider() -> Arc<dyn OcrProvider> {
    Arc::new(FixtureProvider::new())
}

#[cfg(feature = "tesseract")]
fn live_provider(config: &Config) -> Arc<dyn OcrProvider> {
    Arc::new(tallywatch::provider::tesseract::TesseractProvider::new(
        &config.provider.languages,
    ))
}

#[cfg(not(feature = "tesseract"))]
fn live_provider(_config: &Config) -> Arc<dyn OcrProvider> {
    warn!("Built without an OCR engine and no --fixture given; every read will fail");
    Arc::new(FixtureProvider::new())
}

fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
        warn!("Ctrl-C handler not installed: {}", e);
    }
    flag
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| TallyError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
