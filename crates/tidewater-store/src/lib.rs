//! Tidewater Store
//!
//! This crate provides the storage trait and implementations for process
//! instances. The engine treats an instance's execution state as an opaque
//! blob; a `None` state means the instance has completed and has nothing left
//! to resume or migrate.
//!
//! The [`InstanceStore`] trait defines operations for:
//! - Creating instance records
//! - Reading and replacing the execution state blob
//! - Completing instances and listing the active ones
//!
//! [`InstanceLocks`] hands out the per-instance exclusive section that every
//! load-modify-write of a blob must hold.

mod locks;
mod memory;
mod sqlite;
mod types;

pub use locks::InstanceLocks;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{InstanceRecord, InstanceStatus};

use async_trait::async_trait;
use uuid::Uuid;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("instance not found: {0}")]
  NotFound(Uuid),

  /// An instance with this id already exists.
  #[error("instance already exists: {0}")]
  AlreadyExists(Uuid),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// The schema could not be brought up to date.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for process instances.
#[async_trait]
pub trait InstanceStore: Send + Sync {
  /// Create a new instance record.
  async fn create_instance(&self, record: &InstanceRecord) -> Result<(), Error>;

  /// Get an instance by ID.
  async fn get_instance(&self, instance_id: Uuid) -> Result<InstanceRecord, Error>;

  /// Get the execution state of an instance; `None` once it completed.
  async fn execution_state(&self, instance_id: Uuid) -> Result<Option<Vec<u8>>, Error>;

  /// Replace the execution state of an instance.
  async fn set_execution_state(&self, instance_id: Uuid, state: &[u8]) -> Result<(), Error>;

  /// Finish an instance: record its final status and drop its execution state.
  async fn complete_instance(
    &self,
    instance_id: Uuid,
    status: InstanceStatus,
    fault: Option<String>,
    completed_at: chrono::DateTime<chrono::Utc>,
  ) -> Result<(), Error>;

  /// Mark an instance as broken by an unrecoverable error. Its last execution
  /// state is kept for inspection.
  async fn mark_broken(&self, instance_id: Uuid, reason: &str) -> Result<(), Error>;

  /// List the ids of active instances of a process, oldest first.
  async fn active_instances(&self, process_id: &str) -> Result<Vec<Uuid>, Error>;
}
