use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a channel, unique within one instance for its lifetime.
///
/// Ids are handed out by the soup from a monotonic counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ch{}", self.0)
  }
}
