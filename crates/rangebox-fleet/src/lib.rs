//! # rangebox-fleet
//!
//! Fleet lifecycle logic for the Rangebox engine:
//!
//! - [`ExerciseController`] — the pooled fleet of identical, port-keyed
//!   exercise instances (port allocation, bulk/selective start-stop,
//!   status aggregation, missions export)
//! - [`PlatformController`] — the fixed pair of platform containers,
//!   stood up through a generated deployment spec and an external tool
//! - [`LifecycleMonitor`] — the background loop that detects status
//!   drift, fans out change events and reaps expired instances
//!
//! Every controller operation resolves to one
//! [`OperationResult`](rangebox_core::OperationResult); errors never
//! escape a controller's boundary.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod exercises;
mod export;
pub mod monitor;
pub mod platform;

#[cfg(test)]
pub(crate) mod testutil;

pub use exercises::{ExerciseController, InstanceRef};
pub use monitor::{LifecycleMonitor, MonitorHandle, ReapHandle, WatchList};
pub use platform::PlatformController;
