//! Terminal error types.

use thiserror::Error;

/// Errors raised while creating or driving a terminal session.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// The pseudo-terminal could not be opened or configured.
    #[error("pty error: {0}")]
    Pty(String),
    /// The shell could not be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying error.
        message: String,
    },
    /// The token is bound to a different connection.
    #[error("terminal session {0} is owned by another connection")]
    TokenInUse(String),
    /// I/O error on the terminal streams.
    #[error("terminal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_display_names_program() {
        let err = TerminalError::Spawn {
            program: "/bin/nope".into(),
            message: "No such file".into(),
        };
        assert_eq!(err.to_string(), "failed to spawn /bin/nope: No such file");
    }

    #[test]
    fn token_in_use_display() {
        let err = TerminalError::TokenInUse("t1".into());
        assert!(err.to_string().contains("t1"));
    }
}
