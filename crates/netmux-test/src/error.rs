//! Harness errors

use thiserror::Error;

/// Misuse of the scripted mocks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    #[error("no pending request to complete")]
    NoPendingRequest,

    #[error("no pending send to complete")]
    NoPendingSend,

    #[error("interface {0} was never instantiated")]
    NotInstantiated(String),
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;
