use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::DeploymentError;

/// Deploys the content of one deployment directory.
#[async_trait]
pub trait DeployHook: Send + Sync {
  async fn deploy(&self, directory: &Path) -> Result<(), DeploymentError>;
}

/// Told about deployments whose directory disappeared while their marker
/// remains.
#[async_trait]
pub trait UndeployHook: Send + Sync {
  async fn removed(&self, name: &str, marker: &Path);
}

/// Logs removed deployments and leaves everything in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreRemoved;

#[async_trait]
impl UndeployHook for IgnoreRemoved {
  async fn removed(&self, name: &str, marker: &Path) {
    debug!(name, marker = %marker.display(), "deployment directory removed, ignoring");
  }
}
