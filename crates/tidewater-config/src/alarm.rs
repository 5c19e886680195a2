use serde::{Deserialize, Serialize};

use crate::activity::ActivityRef;
use crate::agent::init_once;
use crate::error::ConfigError;
use crate::expression::Expression;

/// A compiled `onAlarm` event handler.
///
/// Which of `for`, `until` and `repeat` are present decides the schedule:
/// `for`/`until` fire once, `repeat` re-arms after each completed firing and,
/// when used alone, also governs the first firing. No expression at all means
/// the handler never fires and only waits to be stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmDef {
  #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
  pub for_expr: Option<Expression>,
  #[serde(rename = "until", default, skip_serializing_if = "Option::is_none")]
  pub until_expr: Option<Expression>,
  #[serde(rename = "repeat", default, skip_serializing_if = "Option::is_none")]
  pub repeat_expr: Option<Expression>,
  /// The activity run on every firing.
  pub activity: ActivityRef,
}

impl AlarmDef {
  pub fn builder(activity: ActivityRef) -> AlarmDefBuilder {
    AlarmDefBuilder {
      activity,
      for_expr: None,
      until_expr: None,
      repeat_expr: None,
    }
  }

  pub fn is_repeating(&self) -> bool {
    self.repeat_expr.is_some()
  }
}

#[derive(Debug)]
pub struct AlarmDefBuilder {
  activity: ActivityRef,
  for_expr: Option<Expression>,
  until_expr: Option<Expression>,
  repeat_expr: Option<Expression>,
}

impl AlarmDefBuilder {
  pub fn for_expr(mut self, expr: impl Into<Expression>) -> Result<Self, ConfigError> {
    init_once(&mut self.for_expr, "for", expr.into())?;
    Ok(self)
  }

  pub fn until_expr(mut self, expr: impl Into<Expression>) -> Result<Self, ConfigError> {
    init_once(&mut self.until_expr, "until", expr.into())?;
    Ok(self)
  }

  pub fn repeat_expr(mut self, expr: impl Into<Expression>) -> Result<Self, ConfigError> {
    init_once(&mut self.repeat_expr, "repeat", expr.into())?;
    Ok(self)
  }

  pub fn build(self) -> Result<AlarmDef, ConfigError> {
    if self.for_expr.is_some() && self.until_expr.is_some() {
      return Err(ConfigError::ConflictingTiming {
        activity: self.activity,
      });
    }

    Ok(AlarmDef {
      for_expr: self.for_expr,
      until_expr: self.until_expr,
      repeat_expr: self.repeat_expr,
      activity: self.activity,
    })
  }
}
