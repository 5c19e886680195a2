use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tidewater_config::ProcessDef;
use tidewater_deploy::{DeployHook, DeploymentError};
use tidewater_vpu::RemapTable;
use tokio::fs;
use tracing::info;

use crate::engine::Engine;

/// Process definitions are read from files with this suffix.
pub const PROCESS_FILE_SUFFIX: &str = ".process.json";

/// Optional remap table applying to every process of a deployment.
pub const REMAP_FILE: &str = "remap.json";

/// Registers the processes of a deployment directory with an engine.
pub struct ProcessDeployer {
  engine: Arc<Engine>,
}

impl ProcessDeployer {
  pub fn new(engine: Arc<Engine>) -> Self {
    Self { engine }
  }

  /// Read every process definition of a deployment directory, sorted by
  /// file name, and the directory's remap table.
  pub async fn load_directory(
    directory: &Path,
  ) -> Result<(Vec<ProcessDef>, RemapTable), DeploymentError> {
    let mut files: Vec<PathBuf> = Vec::new();
    let mut entries = fs::read_dir(directory)
      .await
      .map_err(|source| io_error(directory, source))?;
    while let Some(entry) = entries
      .next_entry()
      .await
      .map_err(|source| io_error(directory, source))?
    {
      let path = entry.path();
      if path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(PROCESS_FILE_SUFFIX))
      {
        files.push(path);
      }
    }
    files.sort();

    if files.is_empty() {
      return Err(DeploymentError::Rejected {
        directory: directory.to_path_buf(),
        reason: format!("no {PROCESS_FILE_SUFFIX} files"),
      });
    }

    let mut definitions = Vec::with_capacity(files.len());
    for path in files {
      let content = fs::read_to_string(&path)
        .await
        .map_err(|source| io_error(&path, source))?;
      let definition =
        ProcessDef::from_json(&content).map_err(|source| DeploymentError::Failed {
          directory: path.clone(),
          source: Box::new(source),
        })?;
      definitions.push(definition);
    }

    let remap_path = directory.join(REMAP_FILE);
    let remap = match fs::read_to_string(&remap_path).await {
      Ok(content) => serde_json::from_str(&content).map_err(|source| DeploymentError::Failed {
        directory: remap_path.clone(),
        source: Box::new(source),
      })?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => RemapTable::new(),
      Err(source) => return Err(io_error(&remap_path, source)),
    };

    Ok((definitions, remap))
  }
}

#[async_trait]
impl DeployHook for ProcessDeployer {
  async fn deploy(&self, directory: &Path) -> Result<(), DeploymentError> {
    let (definitions, remap) = Self::load_directory(directory).await?;
    let count = definitions.len();
    for definition in definitions {
      self.engine.register_process(definition, remap.clone());
    }
    info!(directory = %directory.display(), processes = count, "deployment registered");
    Ok(())
  }
}

fn io_error(path: &Path, source: std::io::Error) -> DeploymentError {
  DeploymentError::Io {
    path: path.to_path_buf(),
    source,
  }
}
