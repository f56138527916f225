//! # tracker-core
//!
//! Shared vocabulary for the desktop tracker gateway.
//!
//! - **Events**: [`events::Event`] with a closed set of known payloads and a
//!   catch-all that preserves unrecognized records
//! - **Branded IDs**: [`ids::ConnectionId`] and the timestamp-derived
//!   [`ids::SessionId`]
//! - **Constants**: WebSocket close codes and on-disk names
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` stack

#![deny(unsafe_code)]

pub mod constants;
pub mod events;
pub mod ids;
pub mod logging;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }
}
