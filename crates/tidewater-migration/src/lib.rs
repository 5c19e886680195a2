//! Tidewater Migration
//!
//! Rewrites the persisted state of in-flight instances after a change in
//! the shape of their global data. A migration is a best-effort batch: a
//! failing instance is logged and turns the overall result `false`, the rest
//! of the batch still runs.
//!
//! Migrations must not race with live reductions of the same instance; they
//! hold the same [`tidewater_store::InstanceLocks`] the engine uses.

mod error;
mod request_manager;

pub use error::MigrationError;
pub use request_manager::RequestManagerMigration;

use async_trait::async_trait;
use tidewater_store::InstanceStore;
use tidewater_vpu::RemapTable;

/// A process whose instances take part in a migration, with the remap table
/// its persisted soups are read with.
#[derive(Debug, Clone)]
pub struct RegisteredProcess {
  pub process_id: String,
  pub remap: RemapTable,
}

impl RegisteredProcess {
  pub fn new(process_id: impl Into<String>) -> Self {
    Self {
      process_id: process_id.into(),
      remap: RemapTable::new(),
    }
  }

  pub fn with_remap(mut self, remap: RemapTable) -> Self {
    self.remap = remap;
    self
  }
}

#[async_trait]
pub trait Migration: Send + Sync {
  /// Name used in logs.
  fn name(&self) -> &'static str;

  /// Migrate every active instance of `processes`. Returns `true` only if no
  /// instance failed.
  async fn migrate(&self, processes: &[RegisteredProcess], store: &dyn InstanceStore) -> bool;
}
