//! Supervisor error types.

use thiserror::Error;

/// Errors raised while managing a supervised process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The process could not be started.
    #[error("failed to start {name}: {source}")]
    Spawn {
        /// Service name.
        name: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The process started but reported no pid.
    #[error("{0} exited before its pid was recorded")]
    NoPid(String),
    /// Signalling the process failed.
    #[error("failed to signal {name}: {errno}")]
    Signal {
        /// Service name.
        name: String,
        /// OS error.
        errno: nix::errno::Errno,
    },
    /// Unrecognized service name.
    #[error("unknown service: {0}")]
    UnknownService(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_display() {
        let err = SupervisorError::Spawn {
            name: "audio".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(err.to_string(), "failed to start audio: no such file");
    }

    #[test]
    fn signal_display() {
        let err = SupervisorError::Signal {
            name: "vision".into(),
            errno: nix::errno::Errno::EPERM,
        };
        assert!(err.to_string().starts_with("failed to signal vision"));
    }
}
