//! Skillforge - Entry Point
//!
//! Commands:
//! - run: answer a query (cache, synthesis, integrity loop, execution)
//! - ingest: add a document to the knowledge store
//! - build: extract verified tools from an existing codebase
//! - list-skills: show cached skills
//! - check: probe the configured generation backends

use clap::{Parser, Subcommand};
use skillforge::{Config, Orchestrator, QueryOutcome, QueryRequest};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "skillforge")]
#[command(author, version, about = "Synthesize, verify and cache executable skills")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log to stderr as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a natural-language query
    Run {
        /// The question to answer
        query: String,

        /// Reference document ingested before answering
        #[arg(short, long)]
        paper: Option<PathBuf>,

        /// Data file reference passed to the synthesizer
        #[arg(short, long)]
        context: Option<String>,

        /// Synthesizer backend for this call only (bypasses the skill cache)
        #[arg(long)]
        model: Option<String>,

        /// Integrity backend for this call only (bypasses the skill cache)
        #[arg(long)]
        integrity_model: Option<String>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add a document to the knowledge store
    Ingest { path: PathBuf },

    /// Extract tools from a codebase into the skill cache
    Build { codebase: PathBuf },

    /// List cached skills, newest first
    ListSkills {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Probe the configured generation backends
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only results
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config = Config::from_env()?;
    std::fs::create_dir_all(&config.data_dir)?;
    info!("Skillforge v{} (data: {})", env!("CARGO_PKG_VERSION"), config.data_dir.display());

    let orchestrator = Orchestrator::from_config(&config).await?;

    match cli.command {
        Commands::Run {
            query,
            paper,
            context,
            model,
            integrity_model,
            json,
        } => {
            let mut request = QueryRequest::new(query);
            request.paper = paper;
            request.data_context = context;
            request.overrides.synthesizer = model;
            request.overrides.integrity = integrity_model;

            let outcome = orchestrator.process_query(&request).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Ingest { path } => {
            let chunks = orchestrator.ingest_document(&path).await?;
            println!("Ingested {} ({} chunks)", path.display(), chunks);
        }
        Commands::Build { codebase } => {
            let report = orchestrator.build_from_codebase(&codebase).await;
            println!(
                "Scanned {} files: {} tools extracted, {} stored, {} rejected, {} files failed",
                report.files_scanned,
                report.tools_extracted,
                report.tools_stored,
                report.tools_rejected,
                report.files_failed
            );
        }
        Commands::ListSkills { limit } => {
            let cache = orchestrator.cache();
            let records = cache.list(limit)?;
            println!("{} skills cached", cache.count()?);
            for record in records {
                println!(
                    "  {}  {}  {}  {}",
                    record.id.get(..8).unwrap_or(&record.id),
                    record.created_at.format("%Y-%m-%d %H:%M"),
                    record.source,
                    first_line(&record.description)
                );
            }
        }
        Commands::Check => {
            let mut healthy = true;
            for (stage, name, result) in orchestrator.health_check().await {
                match result {
                    Ok(()) => println!("  ok    {:<12} {}", stage, name),
                    Err(e) => {
                        healthy = false;
                        println!("  FAIL  {:<12} {}: {}", stage, name, e);
                    }
                }
            }
            if !healthy {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn print_outcome(outcome: &QueryOutcome) {
    println!("=== Answer ===");
    println!("{}", outcome.output.trim_end());
    println!();
    println!("=== Code ===");
    println!("{}", outcome.code.trim_end());
    println!();
    println!("=== Trace ===");
    println!("  cache: {:?}", outcome.trace.cache);
    println!("  repair cycles: {}", outcome.trace.repair_cycles);
    for (stage, backend) in &outcome.trace.stages {
        println!("  {}: {}", stage, backend);
    }
    for warning in &outcome.trace.warnings {
        println!("  warning: {}", warning);
    }
    if let Some(review) = &outcome.review {
        println!();
        println!("=== Grounding ===");
        println!("  valid: {}", review.valid);
        println!("  {}", review.feedback);
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
