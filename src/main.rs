use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cadence_engine::{EngineConfig, ExecutionEngine, TracingNotifier};
use cadence_graph::GraphGenerator;
use cadence_plan::Plan;
use cadence_sdk::Registry;
use cadence_store::{ExecutionStatus, ExecutionStore, SqliteStore};

/// Cadence - a pipeline execution engine
#[derive(Parser)]
#[command(name = "cadence")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.cadence)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to an engine configuration file (JSON)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a plan to completion and print its execution graph
  Run {
    /// Path to the plan file (JSON)
    plan_file: PathBuf,

    /// Who triggered the execution
    #[arg(long, default_value = "cli")]
    triggered_by: String,

    /// Seconds to wait before giving up on the plan execution
    #[arg(long, default_value_t = 300)]
    timeout: u64,
  },

  /// Print the execution graph of a plan execution
  Graph {
    /// The plan execution ID
    plan_execution_id: String,
  },

  /// Resume plan executions left running by a previous process
  Resume,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".cadence"),
  };

  let config = match &cli.config {
    Some(path) => load_config(path)?,
    None => EngineConfig::default(),
  };

  let rt = tokio::runtime::Runtime::new()?;
  match cli.command {
    Some(Commands::Run {
      plan_file,
      triggered_by,
      timeout,
    }) => rt.block_on(run_plan(
      plan_file,
      triggered_by,
      Duration::from_secs(timeout),
      data_dir,
      config,
    )),
    Some(Commands::Graph { plan_execution_id }) => {
      rt.block_on(print_graph(plan_execution_id, data_dir))
    }
    Some(Commands::Resume) => rt.block_on(resume(data_dir, config)),
    None => {
      println!("cadence - use --help to see available commands");
      Ok(())
    }
  }
}

fn load_config(path: &Path) -> Result<EngineConfig> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read config file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))
}

async fn open_store(data_dir: &Path) -> Result<Arc<SqliteStore>> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let path = data_dir.join("cadence.db");
  let store = SqliteStore::open(&path)
    .await
    .with_context(|| format!("failed to open store: {}", path.display()))?;
  Ok(Arc::new(store))
}

fn build_engine(store: Arc<SqliteStore>, config: EngineConfig) -> ExecutionEngine {
  ExecutionEngine::with_notifier(
    store.clone(),
    store,
    Arc::new(Registry::with_defaults()),
    config,
    Arc::new(TracingNotifier),
  )
}

async fn run_plan(
  plan_file: PathBuf,
  triggered_by: String,
  timeout: Duration,
  data_dir: PathBuf,
  config: EngineConfig,
) -> Result<()> {
  let content = tokio::fs::read_to_string(&plan_file)
    .await
    .with_context(|| format!("failed to read plan file: {}", plan_file.display()))?;
  let plan = Plan::from_json(&content)
    .with_context(|| format!("failed to parse plan file: {}", plan_file.display()))?;

  let store = open_store(&data_dir).await?;
  let engine = build_engine(store.clone(), config);

  let cancel = CancellationToken::new();
  let worker = tokio::spawn({
    let engine = engine.clone();
    let cancel = cancel.clone();
    async move { engine.run(cancel).await }
  });

  let execution = engine
    .start_execution(plan, &triggered_by)
    .await
    .context("failed to start plan execution")?;
  eprintln!("Started plan execution: {}", execution.uuid);

  let finished = engine.wait_for_completion(&execution.uuid, timeout).await;
  cancel.cancel();
  worker.await.context("engine loop panicked")??;
  let finished = finished.context("plan execution did not finish")?;

  eprintln!("Plan execution finished: {:?}", finished.status);
  let graph = GraphGenerator::new(store)
    .generate_graph_vertex(&finished.uuid)
    .await
    .context("failed to generate execution graph")?;
  println!("{}", serde_json::to_string_pretty(&graph)?);

  Ok(())
}

async fn print_graph(plan_execution_id: String, data_dir: PathBuf) -> Result<()> {
  let store = open_store(&data_dir).await?;
  let graph = GraphGenerator::new(store)
    .generate_graph_vertex(&plan_execution_id)
    .await
    .with_context(|| format!("failed to generate graph for {}", plan_execution_id))?;

  println!("{}", serde_json::to_string_pretty(&graph)?);
  Ok(())
}

async fn resume(data_dir: PathBuf, config: EngineConfig) -> Result<()> {
  let store = open_store(&data_dir).await?;
  let engine = build_engine(store.clone(), config);

  let resumed = engine
    .resume_in_flight()
    .await
    .context("failed to resume plan executions")?;
  eprintln!("Resumed {} plan execution(s)", resumed);

  let cancel = CancellationToken::new();
  let worker = tokio::spawn({
    let engine = engine.clone();
    let cancel = cancel.clone();
    async move { engine.run(cancel).await }
  });

  let poll = engine.config().completion_poll_interval();
  loop {
    let running = store
      .list_plan_executions(ExecutionStatus::Running)
      .await?;
    if running.is_empty() {
      break;
    }
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("resume_interrupted");
            break;
        }
        _ = tokio::time::sleep(poll) => {}
    }
  }

  cancel.cancel();
  worker.await.context("engine loop panicked")??;
  Ok(())
}
