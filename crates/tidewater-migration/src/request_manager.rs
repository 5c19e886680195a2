use async_trait::async_trait;
use tidewater_runtime::{InstanceProgram, InstanceSoup, RequestState};
use tidewater_store::{InstanceLocks, InstanceStore};
use tidewater_vpu::codec;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::error::MigrationError;
use crate::{Migration, RegisteredProcess};

/// Moves instances from the flat outstanding-request list to the keyed
/// request manager.
#[derive(Debug, Clone, Default)]
pub struct RequestManagerMigration {
  locks: InstanceLocks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
  /// No execution state left.
  Completed,
  AlreadyCurrent,
  Migrated,
}

impl RequestManagerMigration {
  /// The migration takes the instance locks the engine reduces under.
  pub fn new(locks: InstanceLocks) -> Self {
    Self { locks }
  }

  #[instrument(skip(self, process, store), fields(process_id = %process.process_id))]
  async fn migrate_instance(
    &self,
    process: &RegisteredProcess,
    instance_id: Uuid,
    store: &dyn InstanceStore,
  ) -> Result<Outcome, MigrationError> {
    let _guard = self.locks.lock(instance_id).await;

    let Some(bytes) = store
      .execution_state(instance_id)
      .await
      .map_err(|source| MigrationError::Store {
        instance_id,
        source,
      })?
    else {
      return Ok(Outcome::Completed);
    };

    let mut soup: InstanceSoup = codec::read::<InstanceProgram>(&bytes, &process.remap)
      .map_err(|source| MigrationError::CorruptState {
        instance_id,
        source,
      })?;

    let requests = match &soup.global().requests {
      RequestState::RequestManager(_) => return Ok(Outcome::AlreadyCurrent),
      RequestState::OutstandingRequests(old) => old.clone(),
    };
    let count = requests.requests.len();
    let manager = requests
      .into_request_manager()
      .map_err(|source| MigrationError::ConflictingRequest {
        instance_id,
        source,
      })?;
    soup.global_mut().requests = RequestState::RequestManager(manager);

    let bytes = codec::write(&soup).map_err(|source| MigrationError::Encode {
      instance_id,
      source,
    })?;
    store
      .set_execution_state(instance_id, &bytes)
      .await
      .map_err(|source| MigrationError::Store {
        instance_id,
        source,
      })?;

    debug!(requests = count, "migrated outstanding requests");
    Ok(Outcome::Migrated)
  }
}

#[async_trait]
impl Migration for RequestManagerMigration {
  fn name(&self) -> &'static str {
    "request-manager"
  }

  async fn migrate(&self, processes: &[RegisteredProcess], store: &dyn InstanceStore) -> bool {
    let mut success = true;
    let mut migrated = 0usize;
    let mut current = 0usize;

    for process in processes {
      let instances = match store.active_instances(&process.process_id).await {
        Ok(instances) => instances,
        Err(source) => {
          let err = MigrationError::ListInstances {
            process_id: process.process_id.clone(),
            source,
          };
          error!(error = %err, cause = ?std::error::Error::source(&err), "migration failed");
          success = false;
          continue;
        }
      };

      for instance_id in instances {
        match self.migrate_instance(process, instance_id, store).await {
          Ok(Outcome::Migrated) => migrated += 1,
          Ok(Outcome::AlreadyCurrent) => current += 1,
          Ok(Outcome::Completed) => {}
          Err(err) => {
            error!(
              %instance_id,
              process_id = %process.process_id,
              error = %err,
              cause = ?std::error::Error::source(&err),
              "instance migration failed"
            );
            success = false;
          }
        }
      }
    }

    info!(
      migration = self.name(),
      migrated, current, success, "migration finished"
    );
    success
  }
}
