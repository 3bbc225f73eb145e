mod config;

pub use config::ChainflowConfig;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::api::AppState;
use crate::builders::BuilderRegistry;
use crate::engine::WorkflowEngine;
use crate::engine::context::WorkflowContext;
use crate::engine::dispatch::WorkflowDispatcher;
use crate::engine::recovery::recover_interrupted_runs;
use crate::engine::runner::HttpTaskRunner;
use crate::engine::types::{RequestContext, RunStatus, WorkflowSpec};
use crate::storage::memory_store::MemoryStore;
use crate::storage::sqlite_store::SqliteStore;
use crate::storage::{DefinitionStore, RunStore, load_workflow_run_detail};

const DEFAULT_DATABASE_URL: &str = "sqlite://chainflow.db";
const DEFAULT_TASK_SERVICE_URL: &str = "http://localhost:8000";
const DEFAULT_REQUEST_TIMEOUT_S: u64 = 300;

#[derive(Parser)]
#[command(name = "chainflow", version, about = "Workflow engine for chained HTTP tasks")]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to a config file (default: auto-detect chainflow.yaml in cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database url (`sqlite://path.db` or `memory`)
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Recover interrupted runs, then serve the REST API
    Serve {
        /// Host to bind to
        #[arg(long, env = "HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,

        /// Base url for relative task endpoints
        #[arg(long, env = "TASK_SERVICE_URL")]
        task_service_url: Option<String>,
    },

    /// Execute a workflow and wait for it to finish
    Run {
        /// Workflow id
        workflow_id: i64,

        /// Trace id to carry through the run (default: generated)
        #[arg(long)]
        trace_id: Option<String>,

        /// Base url for relative task endpoints
        #[arg(long, env = "TASK_SERVICE_URL")]
        task_service_url: Option<String>,
    },

    /// Import a workflow definition from a YAML file
    Import {
        /// Path to the workflow YAML file
        file: PathBuf,
    },

    /// List workflow runs
    List {
        /// Filter by status (running, success, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Show a workflow run with its job and task runs
    Inspect {
        /// Workflow run id
        run_id: i64,
    },

    /// List available payload builders
    Builders,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file, then parse again so `env` fallbacks see its variables
    load_dotenv(cli.dotenv.as_deref());
    let cli = Cli::parse();

    let config = ChainflowConfig::load(cli.config.as_deref())?;
    let database_url = cli
        .database_url
        .or_else(|| config.database_url.clone())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

    match cli.command {
        Commands::Serve {
            host,
            port,
            task_service_url,
        } => {
            let host = host
                .or_else(|| config.host.clone())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            let port = port.or(config.port).unwrap_or(3000);
            cmd_serve(&config, &database_url, task_service_url, &host, port).await
        }
        Commands::Run {
            workflow_id,
            trace_id,
            task_service_url,
        } => cmd_run(&config, &database_url, task_service_url, workflow_id, trace_id).await,
        Commands::Import { file } => cmd_import(&config, &database_url, &file).await,
        Commands::List { status, format } => {
            cmd_list(&config, &database_url, status, format).await
        }
        Commands::Inspect { run_id } => cmd_inspect(&config, &database_url, run_id).await,
        Commands::Builders => cmd_builders(),
    }
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (warn if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("Loaded env from {}", path.display()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("Loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
            }
        },
    }
}

/// Definition and run stores behind one backend.
struct Stores {
    definitions: Arc<dyn DefinitionStore>,
    runs: Arc<dyn RunStore>,
}

async fn open_stores(database_url: &str, config: &ChainflowConfig) -> Result<Stores> {
    if database_url == "memory" {
        let store = Arc::new(MemoryStore::new());
        return Ok(Stores {
            definitions: store.clone(),
            runs: store,
        });
    }

    let pool_size = u32::try_from(config.dispatch().db_pool_size).unwrap_or(u32::MAX);
    let store = Arc::new(
        SqliteStore::connect(database_url, pool_size)
            .await
            .with_context(|| format!("Failed to open database: {}", database_url))?,
    );
    Ok(Stores {
        definitions: store.clone(),
        runs: store,
    })
}

fn build_engine(
    config: &ChainflowConfig,
    stores: &Stores,
    task_service_url: Option<String>,
) -> Result<(Arc<WorkflowEngine>, Arc<BuilderRegistry>)> {
    let context = Arc::new(WorkflowContext::new(stores.runs.clone()));
    let builders = Arc::new(BuilderRegistry::with_builtins(context));

    let base_url = task_service_url
        .or_else(|| config.task_service_url.clone())
        .unwrap_or_else(|| DEFAULT_TASK_SERVICE_URL.to_string());
    let timeout = Duration::from_secs(
        config
            .request_timeout_s
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S),
    );
    let runner = Arc::new(HttpTaskRunner::new(base_url, timeout)?);

    let engine = WorkflowEngine::new(
        stores.definitions.clone(),
        stores.runs.clone(),
        builders.clone(),
        runner,
    )
    .with_retry(config.retry());

    Ok((Arc::new(engine), builders))
}

async fn cmd_serve(
    config: &ChainflowConfig,
    database_url: &str,
    task_service_url: Option<String>,
    host: &str,
    port: u16,
) -> Result<()> {
    let stores = open_stores(database_url, config).await?;
    let (engine, builders) = build_engine(config, &stores, task_service_url)?;

    let dispatcher = Arc::new(WorkflowDispatcher::start(engine, config.dispatch()));
    recover_interrupted_runs(stores.runs.as_ref(), dispatcher.as_ref()).await;

    let state = Arc::new(AppState {
        launcher: dispatcher.clone(),
        runs: stores.runs.clone(),
        builders,
    });
    let served = crate::api::serve(host, port, state).await;

    dispatcher.shutdown().await;
    served
}

async fn cmd_run(
    config: &ChainflowConfig,
    database_url: &str,
    task_service_url: Option<String>,
    workflow_id: i64,
    trace_id: Option<String>,
) -> Result<()> {
    let stores = open_stores(database_url, config).await?;
    let (engine, _) = build_engine(config, &stores, task_service_url)?;

    let request = RequestContext::new(trace_id, Some("cli".to_string()), None);
    println!("Workflow: {} (trace {})", workflow_id, request.trace_id);

    let run_id = engine
        .execute_workflow(workflow_id, request)
        .await
        .ok_or_else(|| anyhow::anyhow!("Workflow run could not be recorded"))?;

    let detail = load_workflow_run_detail(stores.runs.as_ref(), run_id).await?;
    println!("\nRun ID: {}", run_id);
    println!("Status: {}", detail.workflow_run.status());

    for job in &detail.job_runs {
        println!(
            "\n  {} job {} (run {})",
            status_icon(job.job_run.status()),
            job.job_run.job_id,
            job.job_run.id
        );
        for task in &job.task_runs {
            println!(
                "    {} {} (run {}, {}ms)",
                status_icon(task.status()),
                task.task_name,
                task.id,
                task.timing.duration_ms.unwrap_or_default()
            );
            if task.status() == RunStatus::Failed
                && let Some(ref message) = task.result_message
            {
                println!("      Error: {}", message);
            }
        }
    }

    Ok(())
}

async fn cmd_import(config: &ChainflowConfig, database_url: &str, file: &Path) -> Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read workflow file: {}", file.display()))?;
    let spec = WorkflowSpec::from_yaml(&source)
        .with_context(|| format!("Failed to parse workflow file: {}", file.display()))?;

    let errors = spec.validate();
    if !errors.is_empty() {
        println!("Validation: FAILED");
        for err in &errors {
            println!("  - {}", err);
        }
        anyhow::bail!("{} validation error(s) found", errors.len());
    }

    let stores = open_stores(database_url, config).await?;
    let workflow_id = stores.definitions.import_workflow(&spec).await?;

    let task_count: usize = spec.jobs.iter().map(|j| j.tasks.len()).sum();
    println!(
        "Imported workflow '{}' as id {} ({} jobs, {} tasks)",
        spec.name,
        workflow_id,
        spec.jobs.len(),
        task_count
    );
    Ok(())
}

async fn cmd_list(
    config: &ChainflowConfig,
    database_url: &str,
    status_filter: Option<String>,
    format: String,
) -> Result<()> {
    let status = status_filter
        .as_deref()
        .map(str::parse::<RunStatus>)
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;

    let stores = open_stores(database_url, config).await?;
    let runs = stores.runs.list_workflow_runs(status).await?;

    if runs.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    println!(
        "{:<8} {:<10} {:<38} {:<10} {:<20}",
        "RUN ID", "WORKFLOW", "TRACE ID", "STATUS", "STARTED"
    );
    println!("{}", "-".repeat(90));

    for run in &runs {
        println!(
            "{:<8} {:<10} {:<38} {:<10} {:<20}",
            run.id,
            run.workflow_id,
            run.trace_id,
            run.status(),
            run.timing.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\nTotal: {} run(s)", runs.len());
    Ok(())
}

async fn cmd_inspect(config: &ChainflowConfig, database_url: &str, run_id: i64) -> Result<()> {
    let stores = open_stores(database_url, config).await?;
    let detail = load_workflow_run_detail(stores.runs.as_ref(), run_id)
        .await
        .with_context(|| format!("Run '{}' not found", run_id))?;

    println!("{}", serde_json::to_string_pretty(&detail)?);
    Ok(())
}

fn cmd_builders() -> Result<()> {
    let context = Arc::new(WorkflowContext::new(Arc::new(MemoryStore::new())));
    let registry = BuilderRegistry::with_builtins(context);
    let builders = registry.list();

    println!("{:<20} DESCRIPTION", "TASK NAME");
    println!("{}", "-".repeat(60));

    for (name, desc) in &builders {
        println!("{:<20} {}", name, desc);
    }

    println!("\nTotal: {} builder(s)", builders.len());
    Ok(())
}

fn status_icon(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Success => "✓",
        RunStatus::Failed => "✗",
        RunStatus::Running => "⟳",
    }
}
