use std::fmt;

use serde::{Deserialize, Serialize};

/// Source text of an expression, evaluated by the runtime's expression
/// language (durations for `for`/`repeat`, absolute times for `until`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expression(String);

impl Expression {
  pub fn new(text: impl Into<String>) -> Self {
    Self(text.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for Expression {
  fn from(text: &str) -> Self {
    Self::new(text)
  }
}

impl From<String> for Expression {
  fn from(text: String) -> Self {
    Self(text)
  }
}

impl fmt::Display for Expression {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}
