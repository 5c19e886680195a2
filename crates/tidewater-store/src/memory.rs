use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{Error, InstanceRecord, InstanceStatus, InstanceStore};

/// In-memory store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryStore {
  instances: RwLock<HashMap<Uuid, InstanceRecord>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl InstanceStore for MemoryStore {
  async fn create_instance(&self, record: &InstanceRecord) -> Result<(), Error> {
    let mut instances = self.instances.write().await;
    if instances.contains_key(&record.instance_id) {
      return Err(Error::AlreadyExists(record.instance_id));
    }
    instances.insert(record.instance_id, record.clone());
    Ok(())
  }

  async fn get_instance(&self, instance_id: Uuid) -> Result<InstanceRecord, Error> {
    self
      .instances
      .read()
      .await
      .get(&instance_id)
      .cloned()
      .ok_or(Error::NotFound(instance_id))
  }

  async fn execution_state(&self, instance_id: Uuid) -> Result<Option<Vec<u8>>, Error> {
    Ok(self.get_instance(instance_id).await?.execution_state)
  }

  async fn set_execution_state(&self, instance_id: Uuid, state: &[u8]) -> Result<(), Error> {
    let mut instances = self.instances.write().await;
    let record = instances
      .get_mut(&instance_id)
      .ok_or(Error::NotFound(instance_id))?;
    record.execution_state = Some(state.to_vec());
    Ok(())
  }

  async fn complete_instance(
    &self,
    instance_id: Uuid,
    status: InstanceStatus,
    fault: Option<String>,
    completed_at: DateTime<Utc>,
  ) -> Result<(), Error> {
    let mut instances = self.instances.write().await;
    let record = instances
      .get_mut(&instance_id)
      .ok_or(Error::NotFound(instance_id))?;
    record.status = status;
    record.fault = fault;
    record.execution_state = None;
    record.completed_at = Some(completed_at);
    Ok(())
  }

  async fn mark_broken(&self, instance_id: Uuid, reason: &str) -> Result<(), Error> {
    let mut instances = self.instances.write().await;
    let record = instances
      .get_mut(&instance_id)
      .ok_or(Error::NotFound(instance_id))?;
    record.status = InstanceStatus::Broken;
    record.fault = Some(reason.to_string());
    Ok(())
  }

  async fn active_instances(&self, process_id: &str) -> Result<Vec<Uuid>, Error> {
    let instances = self.instances.read().await;
    let mut active: Vec<&InstanceRecord> = instances
      .values()
      .filter(|r| r.process_id == process_id && r.status == InstanceStatus::Active)
      .collect();
    active.sort_by_key(|r| (r.created_at, r.instance_id));
    Ok(active.into_iter().map(|r| r.instance_id).collect())
  }
}
