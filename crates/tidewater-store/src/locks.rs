use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-instance exclusive sections.
///
/// Whoever loads, changes and writes back an instance's execution state
/// (a reduction, a migration) holds the instance's guard for the whole
/// sequence. Clones share the same set of locks.
#[derive(Debug, Clone, Default)]
pub struct InstanceLocks {
  locks: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl InstanceLocks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Wait for exclusive access to `instance_id`.
  pub async fn lock(&self, instance_id: Uuid) -> OwnedMutexGuard<()> {
    let lock = {
      let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
      locks.entry(instance_id).or_default().clone()
    };
    lock.lock_owned().await
  }

  /// Drop the lock entry of a finished instance. Holders of a guard keep it.
  pub fn forget(&self, instance_id: Uuid) {
    let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    locks.remove(&instance_id);
  }
}
