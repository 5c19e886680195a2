use thiserror::Error;
use tidewater_runtime::ConflictingRequest;
use tidewater_vpu::{CorruptStateError, EncodeError};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MigrationError {
  #[error("failed to list instances of process '{process_id}'")]
  ListInstances {
    process_id: String,
    #[source]
    source: tidewater_store::Error,
  },

  #[error("failed to access instance {instance_id}")]
  Store {
    instance_id: Uuid,
    #[source]
    source: tidewater_store::Error,
  },

  #[error("instance {instance_id} has corrupt state")]
  CorruptState {
    instance_id: Uuid,
    #[source]
    source: CorruptStateError,
  },

  #[error("instance {instance_id} cannot be transformed")]
  ConflictingRequest {
    instance_id: Uuid,
    #[source]
    source: ConflictingRequest,
  },

  #[error("failed to encode instance {instance_id}")]
  Encode {
    instance_id: Uuid,
    #[source]
    source: EncodeError,
  },
}
