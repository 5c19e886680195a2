use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Status of a process instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum InstanceStatus {
  Active,
  Completed,
  Faulted,
  Broken,
}

impl InstanceStatus {
  pub fn is_final(self) -> bool {
    !matches!(self, InstanceStatus::Active)
  }
}

/// A process instance as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InstanceRecord {
  pub instance_id: Uuid,
  pub process_id: String,
  pub status: InstanceStatus,
  #[serde(skip)]
  pub execution_state: Option<Vec<u8>>,
  pub fault: Option<String>,
  pub created_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl InstanceRecord {
  /// A fresh active instance holding its first execution state.
  pub fn new(process_id: impl Into<String>, execution_state: Vec<u8>) -> Self {
    Self {
      instance_id: Uuid::new_v4(),
      process_id: process_id.into(),
      status: InstanceStatus::Active,
      execution_state: Some(execution_state),
      fault: None,
      created_at: Utc::now(),
      completed_at: None,
    }
  }
}
