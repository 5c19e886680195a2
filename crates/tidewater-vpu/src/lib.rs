//! Tidewater VPU
//!
//! The process virtual machine: a continuation-based interpreter that runs
//! many concurrently pending processes of one instance, communicating over
//! channels, and whose whole suspended state (the *soup*) can be written to
//! an opaque blob between reductions.
//!
//! # Architecture
//!
//! ```text
//! Program (trait)            what the processes do
//! ├── run(process, cx)       runnable templates
//! └── receive(handler, ..)   continuations waiting on a choice
//!
//! ExecutionSoup<P>           global data + runnables + choice sets
//!                            + queued messages + armed timers
//!
//! Vpu<P>                     owns one soup, reduces it to quiescence
//!
//! codec::write / codec::read versioned blob, shape remapping
//! ```
//!
//! Nothing here blocks: a process waits by registering a [`Choice`] and
//! returning. Whoever drives the VPU persists the soup with [`codec::write`]
//! and only then performs the buffered [`Effect`]s.

mod channel;
mod clock;
pub mod codec;
mod context;
mod effect;
mod error;
mod program;
mod soup;
mod vpu;

#[cfg(test)]
mod testing;

pub use channel::ChannelId;
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{CorruptStateError, EncodeError, RemapTable};
pub use context::Context;
pub use effect::Effect;
pub use error::ReductionError;
pub use program::{Arm, Choice, Program};
pub use soup::ExecutionSoup;
pub use vpu::{InstanceState, RunOutcome, Vpu, VpuConfig};
