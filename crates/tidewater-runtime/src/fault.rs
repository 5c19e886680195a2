use serde::{Deserialize, Serialize};

use crate::expr::BusinessFault;

/// A fault travelling up to the enclosing scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultData {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub explanation: Option<String>,
}

impl FaultData {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      explanation: None,
    }
  }

  /// Fault raised while evaluating `expression`.
  pub fn from_expression(fault: &BusinessFault, expression: &str) -> Self {
    Self {
      name: fault.name.clone(),
      explanation: Some(expression.to_string()),
    }
  }
}
