use tidewater_config::ActivityRef;
use tidewater_vpu::ChannelId;
use thiserror::Error;

use crate::expr::EvaluationError;

/// Unrecoverable errors of a reduction. Business faults never end up here.
#[derive(Debug, Error)]
pub enum RuntimeError {
  /// An expression could not be evaluated at all.
  #[error("invalid process: {0}")]
  InvalidProcess(#[from] EvaluationError),

  #[error("activity {activity} is not defined in process '{process_id}'")]
  UnknownActivity {
    process_id: String,
    activity: ActivityRef,
  },

  #[error("alarm {index} of scope {scope} is not defined")]
  UnknownAlarm { scope: ActivityRef, index: u32 },

  #[error("unexpected message '{message}' on {channel} in state {state}")]
  UnexpectedMessage {
    state: &'static str,
    channel: ChannelId,
    message: String,
  },
}
