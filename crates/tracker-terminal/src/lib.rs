//! # tracker-terminal
//!
//! Interactive shells on pseudo-terminals, keyed by a client-chosen session
//! token and owned by exactly one channel connection.
//!
//! - [`protocol`]: JSON frames exchanged on the terminal channel
//! - [`manager::TerminalManager`]: the session registry, output pumping and
//!   process cleanup

#![deny(unsafe_code)]

pub mod errors;
pub mod manager;
pub mod protocol;

pub use errors::TerminalError;
pub use manager::{InitOutcome, TerminalManager};
pub use protocol::{ClientFrame, ServerFrame};
