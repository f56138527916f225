//! # tracker-server
//!
//! Axum HTTP + `WebSocket` gateway over the session event log.
//!
//! - HTTP endpoints: frames, status, service control, session creation,
//!   bookmarks, capability manifest
//! - Channel multiplexer: one listener, five `WebSocket` channels selected by
//!   request path (`/timeline`, `/live/vision`, `/live/audio`,
//!   `/live/combined`, `/terminal`)
//! - Connection tracking with an idle stop of the supervised services
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod channels;
pub mod connections;
pub mod control;
pub mod errors;
pub mod http;
pub mod manifest;
pub mod metrics;
pub mod server;
pub mod shutdown;

pub use errors::ApiError;
pub use server::{AppState, GatewayServer};
pub use shutdown::ShutdownCoordinator;
