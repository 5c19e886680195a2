use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent::AgentInfo;
use crate::alarm::AlarmDef;
use crate::expression::Expression;

/// Index of an activity inside [`crate::ProcessDef::activities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityRef(pub u32);

impl ActivityRef {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

impl fmt::Display for ActivityRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// A compiled activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDef {
  pub id: ActivityRef,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "AgentInfo::is_empty")]
  pub agent: AgentInfo,
  #[serde(flatten)]
  pub kind: ActivityKind,
}

impl ActivityDef {
  /// Human readable label for logs: the name if present, the id otherwise.
  pub fn label(&self) -> String {
    match &self.name {
      Some(name) => name.clone(),
      None => self.id.to_string(),
    }
  }
}

/// When a `wait` activity fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deadline {
  /// Relative duration from the moment the activity starts.
  For(Expression),
  /// Absolute point in time.
  Until(Expression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityKind {
  /// Completes immediately.
  Empty,
  /// Completes immediately with the named fault.
  Throw { fault: String },
  /// Completes once the deadline passes.
  Wait { deadline: Deadline },
  /// Runs the children one after another.
  Sequence { children: Vec<ActivityRef> },
  /// Runs `body` with its alarm event handlers, and registers `compensation`
  /// as a compensation handler when the body completes without a fault.
  Scope {
    body: ActivityRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    alarms: Vec<AlarmDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compensation: Option<ActivityRef>,
  },
}

impl ActivityKind {
  /// Activities directly referenced by this kind (children, bodies, handlers).
  pub fn references(&self) -> Vec<ActivityRef> {
    match self {
      ActivityKind::Empty | ActivityKind::Throw { .. } | ActivityKind::Wait { .. } => Vec::new(),
      ActivityKind::Sequence { children } => children.clone(),
      ActivityKind::Scope {
        body,
        alarms,
        compensation,
      } => {
        let mut refs = vec![*body];
        refs.extend(alarms.iter().map(|alarm| alarm.activity));
        refs.extend(compensation.iter().copied());
        refs
      }
    }
  }
}
