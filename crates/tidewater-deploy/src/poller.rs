use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::DeploymentError;
use crate::hook::{DeployHook, IgnoreRemoved, UndeployHook};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

const DESCRIPTOR: &str = "deploy.xml";
const MARKER_SUFFIX: &str = ".deployed";

/// What happens to the marker of a directory whose deployment failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
  /// Keep the marker; the directory is not deployed again.
  #[default]
  Never,
  /// Remove the marker so the next cycle tries again.
  NextCycle,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
  pub deploy_dir: PathBuf,
  pub interval: Duration,
  pub retry: RetryPolicy,
}

impl PollerConfig {
  pub fn new(deploy_dir: impl Into<PathBuf>) -> Self {
    Self {
      deploy_dir: deploy_dir.into(),
      interval: DEFAULT_POLL_INTERVAL,
      retry: RetryPolicy::default(),
    }
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }
}

/// Names of the directories handled by one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
  pub deployed: Vec<String>,
  pub failed: Vec<String>,
  /// Directories that are not deployable.
  pub skipped: Vec<String>,
  /// Markers whose directory no longer exists.
  pub removed: Vec<String>,
}

impl CycleReport {
  pub fn is_empty(&self) -> bool {
    self.deployed.is_empty()
      && self.failed.is_empty()
      && self.skipped.is_empty()
      && self.removed.is_empty()
  }
}

pub struct DeploymentPoller {
  config: PollerConfig,
  deployer: Arc<dyn DeployHook>,
  undeployer: Arc<dyn UndeployHook>,
}

impl DeploymentPoller {
  pub fn new(config: PollerConfig, deployer: Arc<dyn DeployHook>) -> Self {
    Self {
      config,
      deployer,
      undeployer: Arc::new(IgnoreRemoved),
    }
  }

  pub fn with_undeploy_hook(mut self, undeployer: Arc<dyn UndeployHook>) -> Self {
    self.undeployer = undeployer;
    self
  }

  pub fn config(&self) -> &PollerConfig {
    &self.config
  }

  /// Run a single poll cycle.
  pub async fn check(&self) -> Result<CycleReport, DeploymentError> {
    let deploy_dir = &self.config.deploy_dir;
    fs::create_dir_all(deploy_dir)
      .await
      .map_err(|e| DeploymentError::io(deploy_dir, e))?;

    let mut report = CycleReport::default();
    let (directories, markers) = self.scan().await?;

    for (name, path) in &directories {
      match has_single_descriptor(path).await {
        Ok(true) => {}
        Ok(false) => {
          debug!(directory = %path.display(), "not deploying, missing {DESCRIPTOR}");
          report.skipped.push(name.clone());
          continue;
        }
        Err(e) => {
          warn!(directory = %path.display(), error = %e, "cannot read directory, skipping");
          report.skipped.push(name.clone());
          continue;
        }
      }

      let marker = deploy_dir.join(format!("{name}{MARKER_SUFFIX}"));
      match create_marker(&marker).await {
        Ok(true) => {}
        Ok(false) => {
          debug!(directory = %path.display(), "deployed marker exists, skipping deployment");
          continue;
        }
        Err(e) => {
          error!(
            directory = %path.display(),
            error = %e,
            "error creating deployed marker, directory will not be deployed"
          );
          report.failed.push(name.clone());
          continue;
        }
      }

      match self.deployer.deploy(path).await {
        Ok(()) => {
          info!(artifact = %name, "deployment successful");
          report.deployed.push(name.clone());
        }
        Err(e) => {
          error!(artifact = %name, error = %e, "deployment failed");
          report.failed.push(name.clone());
          if self.config.retry == RetryPolicy::NextCycle
            && let Err(e) = fs::remove_file(&marker).await
          {
            warn!(marker = %marker.display(), error = %e, "failed to remove marker for retry");
          }
        }
      }
    }

    for (name, marker) in markers {
      if directories.iter().any(|(dir, _)| *dir == name) {
        continue;
      }
      self.undeployer.removed(&name, &marker).await;
      report.removed.push(name);
    }

    Ok(report)
  }

  /// Sub-directories and marker files of the deploy directory, by name.
  async fn scan(&self) -> Result<(Vec<(String, PathBuf)>, Vec<(String, PathBuf)>), DeploymentError> {
    let deploy_dir = &self.config.deploy_dir;
    let mut directories = Vec::new();
    let mut markers = Vec::new();

    let mut entries = fs::read_dir(deploy_dir)
      .await
      .map_err(|e| DeploymentError::io(deploy_dir, e))?;
    while let Some(entry) = entries
      .next_entry()
      .await
      .map_err(|e| DeploymentError::io(deploy_dir, e))?
    {
      let path = entry.path();
      let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
        continue;
      };
      let file_type = entry
        .file_type()
        .await
        .map_err(|e| DeploymentError::io(&path, e))?;

      if file_type.is_dir() {
        directories.push((file_name, path));
      } else if file_type.is_file()
        && let Some(name) = file_name.strip_suffix(MARKER_SUFFIX)
      {
        markers.push((name.to_string(), path));
      }
    }

    directories.sort();
    markers.sort();
    Ok((directories, markers))
  }

  /// Poll in the background until the returned handle is stopped.
  pub fn start(self) -> PollerHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
      info!(deploy_dir = %self.config.deploy_dir.display(), "deployment poller started");
      loop {
        if let Err(e) = self.check().await {
          error!(error = %e, "unexpected error, exiting deployment poller");
          break;
        }
        tokio::select! {
          _ = token.cancelled() => break,
          _ = tokio::time::sleep(self.config.interval) => {}
        }
      }
      info!("deployment poller stopped");
    });

    PollerHandle { cancel, task }
  }
}

/// Handle of a running poller.
pub struct PollerHandle {
  cancel: CancellationToken,
  task: JoinHandle<()>,
}

impl PollerHandle {
  /// Stop polling and wait for the current cycle to finish.
  pub async fn stop(self) {
    self.cancel.cancel();
    if let Err(e) = self.task.await {
      error!(error = %e, "deployment poller task failed");
    }
  }

  pub fn is_finished(&self) -> bool {
    self.task.is_finished()
  }
}

/// A directory is deployable when it holds exactly one file named
/// `deploy.xml`, compared without case.
async fn has_single_descriptor(directory: &Path) -> Result<bool, DeploymentError> {
  let mut entries = fs::read_dir(directory)
    .await
    .map_err(|e| DeploymentError::io(directory, e))?;

  let mut count = 0;
  while let Some(entry) = entries
    .next_entry()
    .await
    .map_err(|e| DeploymentError::io(directory, e))?
  {
    let is_descriptor = entry
      .file_name()
      .to_str()
      .is_some_and(|name| name.eq_ignore_ascii_case(DESCRIPTOR));
    if is_descriptor
      && entry
        .file_type()
        .await
        .map_err(|e| DeploymentError::io(entry.path(), e))?
        .is_file()
    {
      count += 1;
    }
  }
  Ok(count == 1)
}

/// Create the marker unless it exists. Returns `false` if it did.
async fn create_marker(marker: &Path) -> std::io::Result<bool> {
  match fs::OpenOptions::new()
    .write(true)
    .create_new(true)
    .open(marker)
    .await
  {
    Ok(_) => Ok(true),
    Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
    Err(e) => Err(e),
  }
}
