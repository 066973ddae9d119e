//! Error types for container runtime calls.

use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("container or image not found: {0}")]
    NotFound(String),

    #[error("container name already in use: {0}")]
    NameConflict(String),

    #[error("runtime call timed out: {0}")]
    Timeout(String),

    #[error("cannot reach container engine: {0}")]
    Connection(String),

    #[error("image unavailable: {0}")]
    Image(String),

    #[error("engine error ({status}): {message}")]
    Engine { status: u16, message: String },
}

impl RuntimeError {
    /// Failures worth retrying: the engine may answer on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connection(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(RuntimeError::Timeout("create".into()).is_transient());
        assert!(RuntimeError::Connection("refused".into()).is_transient());
        assert!(!RuntimeError::NotFound("abc".into()).is_transient());
        assert!(
            !RuntimeError::Engine {
                status: 500,
                message: "boom".into()
            }
            .is_transient()
        );
    }
}
