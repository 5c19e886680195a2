//! Tidewater Engine
//!
//! Drives process instances: every external event (a start, a delivered
//! message, an expired timer) becomes one *reduction* of the instance's
//! soup.
//!
//! ```text
//! deliver(instance, channel, message)
//!   ├── worker permit            bounded by EngineConfig::max_workers
//!   ├── instance lock            one reduction per instance at a time
//!   ├── load blob ─▶ codec::read ─▶ send ─▶ Vpu::execute
//!   ├── codec::write ─▶ persist  or complete the record
//!   └── perform timer effects    only after the state is durable
//! ```
//!
//! A failed reduction leaves the last persisted state in place and marks
//! the instance broken.

mod config;
mod deployer;
mod engine;
mod error;
mod registry;
mod timer;

pub use config::EngineConfig;
pub use deployer::{PROCESS_FILE_SUFFIX, ProcessDeployer, REMAP_FILE};
pub use engine::Engine;
pub use error::EngineError;
pub use registry::{ProcessRegistry, RegisteredProgram};
pub use tidewater_store::InstanceStatus;
pub use timer::{TimerEvent, TimerService, TokioTimerService};
