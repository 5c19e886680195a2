use thiserror::Error;

use crate::ActivityRef;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("field '{field}' is already set")]
  AlreadySet { field: &'static str },

  #[error("activity {reference} does not exist")]
  UnknownActivity { reference: ActivityRef },

  #[error("activity at index {index} declares id {found}")]
  IdMismatch { index: usize, found: ActivityRef },

  #[error("alarm on activity {activity} sets both 'for' and 'until'")]
  ConflictingTiming { activity: ActivityRef },

  #[error("invalid process definition JSON: {0}")]
  Json(#[from] serde_json::Error),
}
