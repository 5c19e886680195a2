use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::activity::ActivityRef;
use crate::error::ConfigError;

/// Static dependencies of an activity: the links entering and leaving it,
/// the variables it reads and writes, and its nested activities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub incoming_links: BTreeSet<String>,
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub outgoing_links: BTreeSet<String>,
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub variables_read: BTreeSet<String>,
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub variables_written: BTreeSet<String>,
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub nested: BTreeSet<ActivityRef>,
}

impl AgentInfo {
  pub fn builder() -> AgentInfoBuilder {
    AgentInfoBuilder::default()
  }

  pub fn is_empty(&self) -> bool {
    self.incoming_links.is_empty()
      && self.outgoing_links.is_empty()
      && self.variables_read.is_empty()
      && self.variables_written.is_empty()
      && self.nested.is_empty()
  }
}

/// Builds an [`AgentInfo`]; each set may be assigned once.
#[derive(Debug, Default)]
pub struct AgentInfoBuilder {
  incoming_links: Option<BTreeSet<String>>,
  outgoing_links: Option<BTreeSet<String>>,
  variables_read: Option<BTreeSet<String>>,
  variables_written: Option<BTreeSet<String>>,
  nested: Option<BTreeSet<ActivityRef>>,
}

pub(crate) fn init_once<T>(slot: &mut Option<T>, field: &'static str, value: T) -> Result<(), ConfigError> {
  if slot.is_some() {
    return Err(ConfigError::AlreadySet { field });
  }
  *slot = Some(value);
  Ok(())
}

fn collect_names<I, S>(items: I) -> BTreeSet<String>
where
  I: IntoIterator<Item = S>,
  S: Into<String>,
{
  items.into_iter().map(Into::into).collect()
}

impl AgentInfoBuilder {
  pub fn incoming_links<I, S>(mut self, links: I) -> Result<Self, ConfigError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    init_once(&mut self.incoming_links, "incoming_links", collect_names(links))?;
    Ok(self)
  }

  pub fn outgoing_links<I, S>(mut self, links: I) -> Result<Self, ConfigError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    init_once(&mut self.outgoing_links, "outgoing_links", collect_names(links))?;
    Ok(self)
  }

  pub fn variables_read<I, S>(mut self, variables: I) -> Result<Self, ConfigError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    init_once(&mut self.variables_read, "variables_read", collect_names(variables))?;
    Ok(self)
  }

  pub fn variables_written<I, S>(mut self, variables: I) -> Result<Self, ConfigError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    init_once(
      &mut self.variables_written,
      "variables_written",
      collect_names(variables),
    )?;
    Ok(self)
  }

  pub fn nested(mut self, nested: impl IntoIterator<Item = ActivityRef>) -> Result<Self, ConfigError> {
    init_once(&mut self.nested, "nested", nested.into_iter().collect())?;
    Ok(self)
  }

  pub fn build(self) -> AgentInfo {
    AgentInfo {
      incoming_links: self.incoming_links.unwrap_or_default(),
      outgoing_links: self.outgoing_links.unwrap_or_default(),
      variables_read: self.variables_read.unwrap_or_default(),
      variables_written: self.variables_written.unwrap_or_default(),
      nested: self.nested.unwrap_or_default(),
    }
  }
}
