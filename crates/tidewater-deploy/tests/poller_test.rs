use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tidewater_deploy::{
  CycleReport, DeployHook, DeploymentError, DeploymentPoller, PollerConfig, RetryPolicy,
  UndeployHook,
};

#[derive(Default)]
struct RecordingDeployer {
  calls: AtomicUsize,
  fail: bool,
  delay: Option<Duration>,
}

impl RecordingDeployer {
  fn failing() -> Self {
    Self {
      fail: true,
      ..Default::default()
    }
  }

  fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl DeployHook for RecordingDeployer {
  async fn deploy(&self, directory: &Path) -> Result<(), DeploymentError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    if self.fail {
      return Err(DeploymentError::Rejected {
        directory: directory.to_path_buf(),
        reason: "broken descriptor".to_string(),
      });
    }
    Ok(())
  }
}

#[derive(Default)]
struct RecordingUndeployer {
  removed: Mutex<Vec<(String, PathBuf)>>,
}

#[async_trait]
impl UndeployHook for RecordingUndeployer {
  async fn removed(&self, name: &str, marker: &Path) {
    self
      .removed
      .lock()
      .unwrap()
      .push((name.to_string(), marker.to_path_buf()));
  }
}

fn deployable(root: &Path, name: &str, descriptor: &str) -> PathBuf {
  let dir = root.join(name);
  std::fs::create_dir_all(&dir).unwrap();
  std::fs::write(dir.join(descriptor), "<deploy/>").unwrap();
  dir
}

fn poller(root: &Path, deployer: Arc<RecordingDeployer>) -> DeploymentPoller {
  DeploymentPoller::new(PollerConfig::new(root), deployer)
}

#[tokio::test]
async fn test_directory_is_deployed_exactly_once() {
  let root = TempDir::new().unwrap();
  deployable(root.path(), "orders", "deploy.xml");
  let deployer = Arc::new(RecordingDeployer::default());
  let poller = poller(root.path(), deployer.clone());

  let first = poller.check().await.unwrap();
  assert_eq!(first.deployed, vec!["orders".to_string()]);
  for _ in 0..3 {
    assert!(poller.check().await.unwrap().is_empty());
  }
  assert_eq!(deployer.calls(), 1);
  assert!(root.path().join("orders.deployed").is_file());
}

#[tokio::test]
async fn test_concurrent_cycles_deploy_once() {
  let root = TempDir::new().unwrap();
  deployable(root.path(), "orders", "deploy.xml");
  let deployer = Arc::new(RecordingDeployer {
    delay: Some(Duration::from_millis(50)),
    ..Default::default()
  });
  let poller = poller(root.path(), deployer.clone());

  let (a, b) = tokio::join!(poller.check(), poller.check());
  a.unwrap();
  b.unwrap();
  assert_eq!(deployer.calls(), 1);
}

#[tokio::test]
async fn test_directory_without_descriptor_is_never_deployed() {
  let root = TempDir::new().unwrap();
  let dir = root.path().join("drafts");
  std::fs::create_dir_all(&dir).unwrap();
  std::fs::write(dir.join("deploy.xml.bak"), "").unwrap();
  std::fs::create_dir_all(dir.join("deploy.xml")).unwrap();
  let deployer = Arc::new(RecordingDeployer::default());
  let poller = poller(root.path(), deployer.clone());

  let report = poller.check().await.unwrap();
  assert_eq!(report.skipped, vec!["drafts".to_string()]);
  poller.check().await.unwrap();
  assert_eq!(deployer.calls(), 0);
  assert!(!root.path().join("drafts.deployed").exists());
}

#[tokio::test]
async fn test_descriptor_name_is_case_insensitive() {
  let root = TempDir::new().unwrap();
  deployable(root.path(), "billing", "Deploy.XML");
  let deployer = Arc::new(RecordingDeployer::default());

  let report = poller(root.path(), deployer.clone()).check().await.unwrap();
  assert_eq!(report.deployed, vec!["billing".to_string()]);
}

#[tokio::test]
async fn test_failed_deployment_is_not_retried_by_default() {
  let root = TempDir::new().unwrap();
  deployable(root.path(), "broken", "deploy.xml");
  let deployer = Arc::new(RecordingDeployer::failing());
  let poller = poller(root.path(), deployer.clone());

  let report = poller.check().await.unwrap();
  assert_eq!(report.failed, vec!["broken".to_string()]);
  poller.check().await.unwrap();
  assert_eq!(deployer.calls(), 1);
  assert!(root.path().join("broken.deployed").is_file());
}

#[tokio::test]
async fn test_failed_deployment_retried_next_cycle() {
  let root = TempDir::new().unwrap();
  deployable(root.path(), "broken", "deploy.xml");
  let deployer = Arc::new(RecordingDeployer::failing());
  let config = PollerConfig::new(root.path()).with_retry(RetryPolicy::NextCycle);
  let poller = DeploymentPoller::new(config, deployer.clone());

  poller.check().await.unwrap();
  assert!(!root.path().join("broken.deployed").exists());
  poller.check().await.unwrap();
  assert_eq!(deployer.calls(), 2);
}

#[tokio::test]
async fn test_removed_directories_are_reported_and_markers_kept() {
  let root = TempDir::new().unwrap();
  let marker = root.path().join("retired.deployed");
  std::fs::write(&marker, "").unwrap();
  let undeployer = Arc::new(RecordingUndeployer::default());
  let poller = poller(root.path(), Arc::new(RecordingDeployer::default()))
    .with_undeploy_hook(undeployer.clone());

  let report = poller.check().await.unwrap();
  assert_eq!(
    report,
    CycleReport {
      removed: vec!["retired".to_string()],
      ..Default::default()
    }
  );
  assert_eq!(
    *undeployer.removed.lock().unwrap(),
    vec![("retired".to_string(), marker.clone())]
  );
  assert!(marker.is_file());
}

#[tokio::test]
async fn test_deploy_dir_is_created() {
  let root = TempDir::new().unwrap();
  let deploy_dir = root.path().join("deploy");
  let report = poller(&deploy_dir, Arc::new(RecordingDeployer::default()))
    .check()
    .await
    .unwrap();
  assert!(report.is_empty());
  assert!(deploy_dir.is_dir());
}

#[tokio::test]
async fn test_started_poller_deploys_and_stops() {
  let root = TempDir::new().unwrap();
  let deployer = Arc::new(RecordingDeployer::default());
  let config = PollerConfig::new(root.path()).with_interval(Duration::from_millis(10));
  let handle = DeploymentPoller::new(config, deployer.clone()).start();

  deployable(root.path(), "late", "deploy.xml");
  tokio::time::timeout(Duration::from_secs(5), async {
    while deployer.calls() == 0 {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .unwrap();

  tokio::time::timeout(Duration::from_secs(5), handle.stop())
    .await
    .unwrap();
  assert_eq!(deployer.calls(), 1);
}
