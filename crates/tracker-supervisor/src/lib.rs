//! # tracker-supervisor
//!
//! Starts and stops the two long-running external services (speech
//! recognition and the capture agent), each in its own process group so the
//! whole tree can be signalled at once.
//!
//! - [`supervisor::Supervisor`]: idempotent start, group-signal stop, forced
//!   kill on shutdown
//! - [`status::StatusBoard`]: advisory service flags reported by `/status`

#![deny(unsafe_code)]

pub mod errors;
pub mod status;
pub mod supervisor;

pub use errors::SupervisorError;
pub use status::{ServiceStatus, StatusBoard};
pub use supervisor::{ControlOutcome, ServiceName, Supervisor};
