//! # tracker-log
//!
//! The per-session, append-only event log and everything that reads it.
//!
//! - [`session::SessionStore`] resolves the current session directory on
//!   every call and creates new sessions with their `meta.json`
//! - [`append::EventLog`] appends one record per write, serialized behind a lock
//! - [`tail`] reads forward from a byte offset and watches the log for changes
//! - [`backward`] reads the most recent lines without scanning the whole file
//! - [`frames`] locates, reads and encodes frame images

#![deny(unsafe_code)]

pub mod append;
pub mod backward;
pub mod errors;
pub mod frames;
pub mod session;
pub mod tail;

pub use append::EventLog;
pub use errors::{LogError, Result};
pub use session::{SessionDir, SessionMeta, SessionStatus, SessionStore};
pub use tail::{Subscription, TailCursor, WatchCounter, WatchSignal};
