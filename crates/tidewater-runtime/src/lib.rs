//! Tidewater Runtime
//!
//! The process templates that run on the [`tidewater_vpu`] for one process
//! instance. Every activity talks to its parent over two channels:
//!
//! ```text
//!            Terminate                   Completed { fault, compensations }
//! parent ──────────────▶ termination     parent ◀──────────────────────── child
//!                                        (also Cancelled, Failure, Compensate)
//! ```
//!
//! Alarm event handlers additionally listen on a control channel for a
//! *stop*, which lets an in-flight firing finish, while a *terminate* forces
//! the running child down. Faults raised by expressions or activities are
//! caught at the nearest scope boundary and travel up as `Completed` data;
//! only [`RuntimeError`]s (malformed expressions, inconsistent state) abort
//! a reduction.

mod activity;
mod alarm;
mod compensation;
mod error;
mod expr;
mod fault;
mod global;
mod message;
mod program;
mod scope;

pub use activity::{ActivityInfo, SequenceState};
pub use alarm::{AlarmHandler, AlarmRef};
pub use compensation::{CompensationHandler, CompensationSet};
pub use error::RuntimeError;
pub use expr::{
  BusinessFault, EvaluationContext, EvaluationError, EvaluationFailure, ExpressionEvaluator,
  LiteralEvaluator,
};
pub use fault::FaultData;
pub use global::{
  ConflictingRequest, GlobalData, OutstandingRequest, OutstandingRequests, RequestEntry,
  RequestKey, RequestManager, RequestState, RootLink,
};
pub use message::Message;
pub use program::{Handler, InstanceProgram, InstanceSoup, Process};
pub use scope::{HandlerLink, ScopeState};
