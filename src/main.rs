use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tidewater_deploy::{DeployHook, DeploymentPoller, PollerConfig, RetryPolicy};
use tidewater_engine::{Engine, EngineConfig, ProcessDeployer, TimerService, TokioTimerService};
use tidewater_migration::{Migration, RegisteredProcess, RequestManagerMigration};
use tidewater_store::SqliteStore;

/// Tidewater - a durable workflow engine
#[derive(Parser)]
#[command(name = "tidewater")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.tidewater)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the engine and deploy what appears in <data-dir>/deploy
  Serve {
    /// Milliseconds between two polls of the deploy directory
    #[arg(long, default_value_t = 3000)]
    poll_interval_ms: u64,

    /// Reductions allowed to run at the same time
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Retry a failed deployment on the next poll instead of giving up
    #[arg(long)]
    retry_failed_deployments: bool,
  },

  /// Start one instance of a deployed process and print its id
  ///
  /// An instance left waiting on a timer is picked up by the next `serve`.
  Start {
    /// Id of a process from a deployment in <data-dir>/deploy
    process_id: String,
  },

  /// Bring the stored state of running instances up to date
  Migrate,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".tidewater"),
  };

  match cli.command {
    Some(Commands::Serve {
      poll_interval_ms,
      workers,
      retry_failed_deployments,
    }) => {
      let retry = if retry_failed_deployments {
        RetryPolicy::NextCycle
      } else {
        RetryPolicy::Never
      };
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(serve(
        data_dir,
        Duration::from_millis(poll_interval_ms),
        workers,
        retry,
      ))?;
    }
    Some(Commands::Start { process_id }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(start(data_dir, process_id))?;
    }
    Some(Commands::Migrate) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(migrate(data_dir))?;
    }
    None => {
      println!("tidewater - use --help to see available commands");
    }
  }

  Ok(())
}

async fn open_store(data_dir: &Path) -> Result<SqliteStore> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
  let db_path = data_dir.join("tidewater.db");
  SqliteStore::open(&db_path)
    .await
    .with_context(|| format!("failed to open database: {}", db_path.display()))
}

/// Deployment directories that already carry a marker.
async fn marked_deployments(deploy_dir: &Path) -> Result<Vec<PathBuf>> {
  let mut deployments = Vec::new();
  let mut entries = match tokio::fs::read_dir(deploy_dir).await {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(deployments),
    Err(e) => {
      return Err(e).with_context(|| format!("failed to read {}", deploy_dir.display()));
    }
  };

  while let Some(entry) = entries.next_entry().await? {
    let path = entry.path();
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
      continue;
    };
    if entry.file_type().await?.is_dir()
      && deploy_dir.join(format!("{name}.deployed")).is_file()
    {
      deployments.push(path);
    }
  }
  deployments.sort();
  Ok(deployments)
}

async fn reload_deployments(deployer: &ProcessDeployer, deploy_dir: &Path) -> Result<()> {
  for directory in marked_deployments(deploy_dir).await? {
    if let Err(e) = deployer.deploy(&directory).await {
      warn!(directory = %directory.display(), error = %e, "failed to reload deployment");
    }
  }
  Ok(())
}

async fn serve(
  data_dir: PathBuf,
  poll_interval: Duration,
  workers: usize,
  retry: RetryPolicy,
) -> Result<()> {
  let store = Arc::new(open_store(&data_dir).await?);
  let deploy_dir = data_dir.join("deploy");

  let (timers, events) = TokioTimerService::new();
  let config = EngineConfig {
    max_workers: workers,
    ..Default::default()
  };
  let engine = Arc::new(Engine::new(store, Arc::new(timers), config));
  let deployer = Arc::new(ProcessDeployer::new(engine.clone()));

  // Deployments from earlier runs carry a marker; the poller skips them.
  reload_deployments(&deployer, &deploy_dir).await?;
  engine.recover().await.context("failed to recover instances")?;

  let cancel = CancellationToken::new();
  let runner = tokio::spawn(engine.clone().run(events, cancel.clone()));

  let poller_config = PollerConfig::new(&deploy_dir)
    .with_interval(poll_interval)
    .with_retry(retry);
  let poller = DeploymentPoller::new(poller_config, deployer).start();

  info!(data_dir = %data_dir.display(), "tidewater serving, press Ctrl-C to stop");
  tokio::signal::ctrl_c()
    .await
    .context("failed to listen for Ctrl-C")?;

  info!("shutting down");
  poller.stop().await;
  cancel.cancel();
  runner.await.context("engine task failed")?;
  Ok(())
}

async fn start(data_dir: PathBuf, process_id: String) -> Result<()> {
  let store = Arc::new(open_store(&data_dir).await?);

  // Timers armed here are persisted with the instance; `serve` re-arms them.
  let (timers, _events) = TokioTimerService::new();
  let timers = Arc::new(timers);
  let engine = Arc::new(Engine::new(store, timers.clone(), EngineConfig::default()));
  let deployer = ProcessDeployer::new(engine.clone());
  reload_deployments(&deployer, &data_dir.join("deploy")).await?;

  let instance_id = engine
    .start_instance(&process_id)
    .await
    .with_context(|| format!("failed to start process '{process_id}'"))?;
  timers.shutdown();

  let status = engine.status(instance_id).await?;
  info!(%instance_id, ?status, "instance started");
  println!("{instance_id} {status:?}");
  Ok(())
}

/// Processes of every marked deployment, with the remap table shipped next
/// to them. Directories that fail to load are logged and counted.
async fn marked_processes(deploy_dir: &Path) -> Result<(Vec<RegisteredProcess>, usize)> {
  let mut processes = Vec::new();
  let mut failed = 0;
  for directory in marked_deployments(deploy_dir).await? {
    match ProcessDeployer::load_directory(&directory).await {
      Ok((definitions, remap)) => processes.extend(
        definitions
          .into_iter()
          .map(|definition| RegisteredProcess::new(definition.process_id).with_remap(remap.clone())),
      ),
      Err(e) => {
        error!(directory = %directory.display(), error = %e, "failed to load deployment");
        failed += 1;
      }
    }
  }
  Ok((processes, failed))
}

async fn migrate(data_dir: PathBuf) -> Result<()> {
  let store = open_store(&data_dir).await?;

  let (processes, failed_deployments) = marked_processes(&data_dir.join("deploy")).await?;
  info!(processes = processes.len(), "migrating instances");

  let migration = RequestManagerMigration::default();
  let migrated = migration.migrate(&processes, &store).await;
  if failed_deployments > 0 {
    bail!(
      "migration '{}' skipped {failed_deployments} deployment(s) that failed to load",
      migration.name()
    );
  }
  if !migrated {
    bail!("migration '{}' finished with errors", migration.name());
  }
  info!("migration finished");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const VALID_PROCESS: &str = r#"{
    "process_id": "shipping",
    "name": "Shipping",
    "root": 0,
    "activities": [{ "id": 0, "type": "empty" }]
  }"#;

  async fn marked_directory(deploy_dir: &Path, name: &str, process: &str) {
    let directory = deploy_dir.join(name);
    tokio::fs::create_dir_all(&directory).await.unwrap();
    tokio::fs::write(directory.join(format!("{name}.process.json")), process)
      .await
      .unwrap();
    tokio::fs::write(deploy_dir.join(format!("{name}.deployed")), "")
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_broken_deployment_does_not_hide_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let deploy_dir = dir.path().join("deploy");
    marked_directory(&deploy_dir, "a", "{").await;
    marked_directory(&deploy_dir, "b", VALID_PROCESS).await;

    let (processes, failed) = marked_processes(&deploy_dir).await.unwrap();
    assert_eq!(failed, 1);
    let ids: Vec<&str> = processes.iter().map(|p| p.process_id.as_str()).collect();
    assert_eq!(ids, vec!["shipping"]);
  }

  #[tokio::test]
  async fn test_unmarked_directories_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let deploy_dir = dir.path().join("deploy");
    marked_directory(&deploy_dir, "b", VALID_PROCESS).await;
    tokio::fs::remove_file(deploy_dir.join("b.deployed"))
      .await
      .unwrap();

    let (processes, failed) = marked_processes(&deploy_dir).await.unwrap();
    assert!(processes.is_empty());
    assert_eq!(failed, 0);
  }
}
