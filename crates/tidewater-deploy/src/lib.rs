//! Tidewater Deploy
//!
//! Watches a deployment directory for deployable sub-directories:
//!
//! ```text
//! {deploy_dir}/
//! ├── orders/
//! │   ├── deploy.xml           descriptor, exactly one, any case
//! │   └── orders.process.json
//! ├── orders.deployed          marker: "orders" was handed to the deploy hook
//! └── retired.deployed         marker without a directory: reported as removed
//! ```
//!
//! The marker is created *before* the deploy hook runs, so every directory
//! is deployed at most once, however often the directory is polled.

mod error;
mod hook;
mod poller;

pub use error::DeploymentError;
pub use hook::{DeployHook, IgnoreRemoved, UndeployHook};
pub use poller::{
  CycleReport, DEFAULT_POLL_INTERVAL, DeploymentPoller, PollerConfig, PollerHandle, RetryPolicy,
};
