use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tidewater_config::ActivityRef;

/// The undo action registered by a scope that completed without a fault.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompensationHandler {
  /// Monotonic id of the scope instance that registered the handler.
  pub scope_instance: u64,
  pub scope: ActivityRef,
  /// The compensation activity to run.
  pub activity: ActivityRef,
}

/// An unordered, duplicate-free collection of compensation handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompensationSet(BTreeSet<CompensationHandler>);

impl CompensationSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, handler: CompensationHandler) -> bool {
    self.0.insert(handler)
  }

  /// Move every handler of `other` into this set.
  pub fn merge(&mut self, other: CompensationSet) {
    self.0.extend(other.0);
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &CompensationHandler> {
    self.0.iter()
  }
}

impl FromIterator<CompensationHandler> for CompensationSet {
  fn from_iter<I: IntoIterator<Item = CompensationHandler>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}
