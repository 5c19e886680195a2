use serde::{Deserialize, Serialize};
use tidewater_config::ActivityRef;
use tidewater_vpu::ChannelId;

use crate::compensation::CompensationSet;
use crate::fault::FaultData;

/// Everything sent between the processes of an instance, and by the driver
/// into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "kebab-case")]
pub enum Message {
  /// Soft stop of an event handler. An in-flight firing may finish.
  Stop,
  /// Hard stop. Running children are terminated.
  Terminate,
  /// The timer registered on this channel expired.
  Timeout,
  /// The timer registered on this channel will never expire.
  TimerCancelled,
  /// A child activity finished.
  Completed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fault: Option<FaultData>,
    #[serde(default, skip_serializing_if = "CompensationSet::is_empty")]
    compensations: CompensationSet,
  },
  /// A child activity was cancelled before it did anything.
  Cancelled,
  /// A child activity failed outside of fault handling.
  Failure { reason: String },
  /// A compensation request travelling up to whoever can run it.
  Compensate { scope: ActivityRef, reply: ChannelId },
}

impl Message {
  pub fn completed(fault: Option<FaultData>, compensations: CompensationSet) -> Self {
    Message::Completed {
      fault,
      compensations,
    }
  }

  /// Shape name, for diagnostics.
  pub fn shape(&self) -> &'static str {
    match self {
      Message::Stop => "stop",
      Message::Terminate => "terminate",
      Message::Timeout => "timeout",
      Message::TimerCancelled => "timer-cancelled",
      Message::Completed { .. } => "completed",
      Message::Cancelled => "cancelled",
      Message::Failure { .. } => "failure",
      Message::Compensate { .. } => "compensate",
    }
  }
}
