use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeploymentError {
  #[error("I/O error on '{}'", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The deploy hook refused or failed to deploy a directory.
  #[error("failed to deploy '{}': {reason}", directory.display())]
  Rejected { directory: PathBuf, reason: String },

  #[error("failed to deploy '{}'", directory.display())]
  Failed {
    directory: PathBuf,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
}

impl DeploymentError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    DeploymentError::Io {
      path: path.into(),
      source,
    }
  }
}
