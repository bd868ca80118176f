//! Error types for polyide

use thiserror::Error;

use crate::models::RequestId;

pub type IdeResult<T> = std::result::Result<T, IdeError>;
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum IdeError {
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to start compiler process: {0}")]
    ProcessStart(String),

    #[error("Compiler process is not running")]
    NotConnected,

    #[error("Compiler process was restarted; pending requests were aborted")]
    ProcessRestarted,

    #[error("Compiler process terminated unexpectedly")]
    ProcessTerminated,

    #[error("Request {id} timed out. The compiler may be busy or unresponsive")]
    Timeout { id: RequestId },

    #[error("No outstanding request with id {id}")]
    UnknownRequest { id: RequestId },

    #[error("Malformed markup in '{kind}' unit: {detail}")]
    MalformedMarkup { kind: char, detail: String },

    #[error("'{file}' has not been compiled in this session")]
    NotCompiled { file: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Errors the caller can recover from without touching the process.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::UnknownRequest { .. }
                | Self::MalformedMarkup { .. }
                | Self::NotCompiled { .. }
        )
    }

    /// Errors that mean the compiler process must be (re)started before any
    /// further request can succeed.
    pub fn needs_restart(&self) -> bool {
        matches!(
            self,
            Self::ProcessTerminated | Self::NotConnected | Self::ProcessStart(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_recoverable() {
        let err = EngineError::Timeout { id: RequestId(7) };
        assert!(err.is_recoverable());
        assert!(!err.needs_restart());
    }

    #[test]
    fn test_terminated_needs_restart() {
        assert!(EngineError::ProcessTerminated.needs_restart());
        assert!(!EngineError::ProcessTerminated.is_recoverable());
        assert!(EngineError::NotConnected.needs_restart());
    }

    #[test]
    fn test_restart_aborts_are_not_recoverable_in_place() {
        let err = EngineError::ProcessRestarted;
        assert!(!err.is_recoverable());
        assert!(!err.needs_restart());
    }

    #[test]
    fn test_malformed_markup_message() {
        let err = EngineError::MalformedMarkup {
            kind: 'R',
            detail: "expected number for start offset".into(),
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("'R'"));
    }
}
