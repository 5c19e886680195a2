//! Tidewater Config
//!
//! This crate contains the compiled process definition types for tidewater.
//! A definition is an immutable tree of activities stored as an arena: every
//! activity lives in [`ProcessDef::activities`] and is referenced by its
//! [`ActivityRef`] index. Suspended executions only ever store references,
//! never the definitions themselves.
//!
//! Definitions can be loaded from:
//! - JSON files (`*.process.json` inside a deployment directory)
//! - The [`ProcessDefBuilder`] (tests and embedders)
//!
//! Optional fields follow an initialize-once rule: builders reject a second
//! assignment of the same field instead of silently keeping the first one.

mod activity;
mod agent;
mod alarm;
mod error;
mod expression;
mod process;

pub use activity::{ActivityDef, ActivityKind, ActivityRef, Deadline};
pub use agent::{AgentInfo, AgentInfoBuilder};
pub use alarm::{AlarmDef, AlarmDefBuilder};
pub use error::ConfigError;
pub use expression::Expression;
pub use process::{ProcessDef, ProcessDefBuilder};
