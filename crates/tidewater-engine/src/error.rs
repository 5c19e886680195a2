use thiserror::Error;
use tidewater_runtime::RuntimeError;
use tidewater_vpu::{CorruptStateError, EncodeError, ReductionError};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("process not registered: {0}")]
  UnknownProcess(String),

  #[error("instance {0} has no root activity")]
  NotStarted(Uuid),

  #[error("instance {instance_id} has corrupt state")]
  CorruptState {
    instance_id: Uuid,
    #[source]
    source: CorruptStateError,
  },

  #[error("reduction of instance {instance_id} failed")]
  Reduction {
    instance_id: Uuid,
    #[source]
    source: ReductionError<RuntimeError>,
  },

  #[error("failed to encode instance state: {0}")]
  Encode(#[from] EncodeError),

  #[error("store error: {0}")]
  Store(#[from] tidewater_store::Error),

  #[error("engine is shutting down")]
  ShuttingDown,
}
