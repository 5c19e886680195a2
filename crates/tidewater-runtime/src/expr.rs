//! The boundary to the expression language.
//!
//! Timing expressions are evaluated through [`ExpressionEvaluator`]. A
//! failure is either a [`BusinessFault`], which the process handles like any
//! other fault, or an [`EvaluationError`], which means the process itself is
//! broken.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tidewater_config::{ActivityRef, Expression, ProcessDef};

/// What an evaluator may inspect while evaluating.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
  pub now: DateTime<Utc>,
  pub process: &'a ProcessDef,
  /// The activity owning the expression.
  pub activity: ActivityRef,
}

/// A fault raised by the expression itself, e.g. a missing variable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fault '{name}'")]
pub struct BusinessFault {
  pub name: String,
  pub message: Option<String>,
}

impl BusinessFault {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      message: None,
    }
  }
}

/// The expression cannot be evaluated at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot evaluate '{expression}': {reason}")]
pub struct EvaluationError {
  pub expression: String,
  pub reason: String,
}

impl EvaluationError {
  pub fn new(expression: &Expression, reason: impl Into<String>) -> Self {
    Self {
      expression: expression.to_string(),
      reason: reason.into(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationFailure {
  #[error(transparent)]
  Fault(#[from] BusinessFault),
  #[error(transparent)]
  Invalid(#[from] EvaluationError),
}

pub trait ExpressionEvaluator: Send + Sync {
  fn evaluate_duration(
    &self,
    expression: &Expression,
    cx: &EvaluationContext<'_>,
  ) -> Result<Duration, EvaluationFailure>;

  fn evaluate_deadline(
    &self,
    expression: &Expression,
    cx: &EvaluationContext<'_>,
  ) -> Result<DateTime<Utc>, EvaluationFailure>;
}

/// Evaluates literal ISO-8601 durations (`PT30S`, `P1DT2H`, `-PT5M`) and
/// RFC 3339 timestamps. Calendar units (years, months) are rejected since
/// they have no fixed length.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralEvaluator;

impl ExpressionEvaluator for LiteralEvaluator {
  fn evaluate_duration(
    &self,
    expression: &Expression,
    _cx: &EvaluationContext<'_>,
  ) -> Result<Duration, EvaluationFailure> {
    parse_duration(expression.as_str().trim())
      .map_err(|reason| EvaluationError::new(expression, reason).into())
  }

  fn evaluate_deadline(
    &self,
    expression: &Expression,
    _cx: &EvaluationContext<'_>,
  ) -> Result<DateTime<Utc>, EvaluationFailure> {
    DateTime::parse_from_rfc3339(expression.as_str().trim())
      .map(|t| t.with_timezone(&Utc))
      .map_err(|e| EvaluationError::new(expression, e.to_string()).into())
  }
}

fn parse_duration(text: &str) -> Result<Duration, String> {
  let (negative, rest) = match text.strip_prefix('-') {
    Some(rest) => (true, rest),
    None => (false, text),
  };
  let Some(rest) = rest.strip_prefix('P') else {
    return Err("duration must start with 'P'".to_string());
  };

  let mut total_millis: i64 = 0;
  let mut in_time = false;
  let mut number = String::new();
  let mut saw_component = false;

  for c in rest.chars() {
    match c {
      'T' if !in_time && number.is_empty() => in_time = true,
      '0'..='9' | '.' => number.push(c),
      unit => {
        if number.is_empty() {
          return Err(format!("missing value before '{unit}'"));
        }
        let value: f64 = number
          .parse()
          .map_err(|_| format!("bad number '{number}'"))?;
        let unit_millis: f64 = match (unit, in_time) {
          ('W', false) => 7.0 * 86_400_000.0,
          ('D', false) => 86_400_000.0,
          ('H', true) => 3_600_000.0,
          ('M', true) => 60_000.0,
          ('S', true) => 1_000.0,
          ('Y', false) | ('M', false) => {
            return Err("calendar units are not supported".to_string());
          }
          _ => return Err(format!("unexpected designator '{unit}'")),
        };
        let millis = value * unit_millis;
        if !millis.is_finite() || millis > i64::MAX as f64 {
          return Err("duration out of range".to_string());
        }
        total_millis = total_millis
          .checked_add(millis.round() as i64)
          .ok_or_else(|| "duration out of range".to_string())?;
        number.clear();
        saw_component = true;
      }
    }
  }

  if !number.is_empty() {
    return Err(format!("trailing value '{number}' without designator"));
  }
  if !saw_component {
    return Err("empty duration".to_string());
  }

  let duration = Duration::try_milliseconds(total_millis)
    .ok_or_else(|| "duration out of range".to_string())?;
  Ok(if negative { -duration } else { duration })
}
