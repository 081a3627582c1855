//! Runtime error types

use thiserror::Error;

/// Errors reported by the container runtime
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("no container with that id: {0}")]
    NotFound(String),

    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("log stream error: {0}")]
    Stream(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RuntimeError::NotFound(_) | RuntimeError::Rejected { status: 404, .. }
        )
    }
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => RuntimeError::Rejected {
                status: status_code,
                message,
            },
            other => RuntimeError::Unavailable(other.to_string()),
        }
    }
}

/// Result type for runtime operations
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_displays_runtime_message() {
        let err = RuntimeError::Rejected {
            status: 409,
            message: "container is running: stop the container before removing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "container is running: stop the container before removing"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(RuntimeError::NotFound("abc".to_string()).is_not_found());
        assert!(RuntimeError::Rejected {
            status: 404,
            message: "No such container: abc".to_string(),
        }
        .is_not_found());
    }
}
