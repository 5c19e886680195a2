use serde::{Deserialize, Serialize};

use crate::activity::{ActivityDef, ActivityKind, ActivityRef};
use crate::agent::AgentInfo;
use crate::error::ConfigError;

/// A compiled, immutable process definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDef {
  pub process_id: String,
  pub name: String,
  /// The activity started for every new instance.
  pub root: ActivityRef,
  pub activities: Vec<ActivityDef>,
}

impl ProcessDef {
  /// Parse and validate a definition from JSON.
  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    let def: ProcessDef = serde_json::from_str(content)?;
    def.validate()?;
    Ok(def)
  }

  pub fn activity(&self, reference: ActivityRef) -> Option<&ActivityDef> {
    self.activities.get(reference.index())
  }

  /// Check that every activity sits at its own index and that every
  /// reference (root, children, bodies, alarm activities) resolves.
  pub fn validate(&self) -> Result<(), ConfigError> {
    for (index, activity) in self.activities.iter().enumerate() {
      if activity.id.index() != index {
        return Err(ConfigError::IdMismatch {
          index,
          found: activity.id,
        });
      }
    }

    self.resolve(self.root)?;
    for activity in &self.activities {
      for reference in activity.kind.references() {
        self.resolve(reference)?;
      }
      for nested in &activity.agent.nested {
        self.resolve(*nested)?;
      }
      if let ActivityKind::Scope { alarms, .. } = &activity.kind
        && alarms
          .iter()
          .any(|alarm| alarm.for_expr.is_some() && alarm.until_expr.is_some())
      {
        return Err(ConfigError::ConflictingTiming {
          activity: activity.id,
        });
      }
    }

    Ok(())
  }

  fn resolve(&self, reference: ActivityRef) -> Result<&ActivityDef, ConfigError> {
    self
      .activity(reference)
      .ok_or(ConfigError::UnknownActivity { reference })
  }
}

/// Allocates activities into the arena and assembles a [`ProcessDef`].
///
/// ```
/// use tidewater_config::{ActivityKind, ProcessDefBuilder};
///
/// let mut builder = ProcessDefBuilder::new("orders", "Order handling");
/// let body = builder.activity("noop", ActivityKind::Empty);
/// let process = builder.build(body).unwrap();
/// assert_eq!(process.activities.len(), 1);
/// ```
#[derive(Debug)]
pub struct ProcessDefBuilder {
  process_id: String,
  name: String,
  activities: Vec<ActivityDef>,
}

impl ProcessDefBuilder {
  pub fn new(process_id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      process_id: process_id.into(),
      name: name.into(),
      activities: Vec::new(),
    }
  }

  /// Add a named activity and return its reference.
  pub fn activity(&mut self, name: impl Into<String>, kind: ActivityKind) -> ActivityRef {
    self.activity_with_agent(name, kind, AgentInfo::default())
  }

  pub fn activity_with_agent(
    &mut self,
    name: impl Into<String>,
    kind: ActivityKind,
    agent: AgentInfo,
  ) -> ActivityRef {
    let id = ActivityRef(self.activities.len() as u32);
    self.activities.push(ActivityDef {
      id,
      name: Some(name.into()),
      agent,
      kind,
    });
    id
  }

  /// Reserve a slot to be filled later with [`Self::define`], for kinds that
  /// need to reference activities created after them.
  pub fn reserve(&mut self, name: impl Into<String>) -> ActivityRef {
    self.activity(name, ActivityKind::Empty)
  }

  pub fn define(&mut self, reference: ActivityRef, kind: ActivityKind) -> Result<(), ConfigError> {
    let slot = self
      .activities
      .get_mut(reference.index())
      .ok_or(ConfigError::UnknownActivity { reference })?;
    slot.kind = kind;
    Ok(())
  }

  pub fn build(self, root: ActivityRef) -> Result<ProcessDef, ConfigError> {
    let def = ProcessDef {
      process_id: self.process_id,
      name: self.name,
      root,
      activities: self.activities,
    };
    def.validate()?;
    Ok(def)
  }
}
