use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;

/// A side effect requested by a reduction, performed by the driver after the
/// resulting soup has been persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "kebab-case")]
pub enum Effect {
  /// Deliver exactly one timeout (or cancel) message to `channel` at `deadline`.
  RegisterTimer {
    channel: ChannelId,
    deadline: DateTime<Utc>,
  },
  /// Withdraw a timer. Safe to issue for a timer that already fired.
  CancelTimer { channel: ChannelId },
}
