//! Advisory service status flags.
//!
//! The flags record the last requested state of each service, not verified
//! liveness. Only the control endpoints mutate them.

use parking_lot::RwLock;
use serde::Serialize;

use crate::supervisor::ServiceName;

/// Snapshot reported by `/status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    /// Capture agent requested running.
    pub vision: bool,
    /// Speech recognition requested running.
    pub audio: bool,
    /// The gateway itself.
    pub backend: bool,
}

/// Process-wide status flags.
#[derive(Debug)]
pub struct StatusBoard {
    flags: RwLock<ServiceStatus>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    /// All services off, backend up.
    pub fn new() -> Self {
        Self {
            flags: RwLock::new(ServiceStatus {
                vision: false,
                audio: false,
                backend: true,
            }),
        }
    }

    /// Record the requested state of `name`.
    pub fn set(&self, name: ServiceName, running: bool) {
        let mut flags = self.flags.write();
        match name {
            ServiceName::Audio => flags.audio = running,
            ServiceName::Vision => flags.vision = running,
        }
    }

    /// Clear both service flags.
    pub fn clear_services(&self) {
        let mut flags = self.flags.write();
        flags.audio = false;
        flags.vision = false;
    }

    /// Current flags.
    pub fn snapshot(&self) -> ServiceStatus {
        *self.flags.read()
    }
}
