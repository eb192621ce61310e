//! # rangebox-daemon
//!
//! The Rangebox engine: a Unix socket command server over the two fleet
//! controllers, a single worker serializing all command processing, and
//! the background lifecycle monitor.
//!
//! ```text
//! ┌──────────┐  JSON line  ┌────────────┐   queue   ┌────────────┐
//! │ clients  │────────────▶│ conn tasks │──────────▶│   worker   │
//! └──────────┘             └────────────┘           │ (dispatch) │
//!                                                   └─────┬──────┘
//!            ┌──────────────────┐   stop-one command      │
//!            │ lifecycle monitor│─────────────────────────┘
//!            └──────────────────┘      (same queue)
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod dispatch;
pub mod protocol;
pub mod registry;
pub mod server;

pub use dispatch::{run_worker, Dispatcher};
pub use protocol::{CommandEnvelope, ResultEnvelope};
pub use registry::ManagerRegistry;
pub use server::{CommandSender, CommandServer, WorkItem};
