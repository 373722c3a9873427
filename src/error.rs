use thiserror::Error;

/// Result type for stream flow operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while building or running a pipeline
///
/// The enum is `Clone` so that a single failure can settle a shared completion
/// signal that any number of callers may be awaiting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A user-supplied transform or sink failed
    #[error("Stage execution failed: {0}")]
    StageError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A push into a pushable source was refused
    #[error("Push rejected: {0}")]
    PushRejected(String),

    /// Readiness accounting was violated by a stage or its upstream
    #[error("Internal invariant violated: {0}")]
    InvariantViolation(String),

    /// A driver or internal task stopped unexpectedly
    #[error("Pipeline shutdown error: {0}")]
    ShutdownError(String),
}

impl PipelineError {
    /// Shorthand for raising a transform failure from user code
    pub fn stage(msg: impl Into<String>) -> Self {
        Self::StageError(msg.into())
    }
}
