//! Error types for engine operations.
//!
//! Data-path failures (dropped frames) never surface here; they only move
//! counters. Everything in this module is a control-path outcome returned to
//! the immediate caller or relayed through a completion.

use crate::lower::LowerStatus;
use crate::oid::Oid;
use crate::request::RequestKind;
use crate::vif::VifState;
use netmux_types::Medium;
use thiserror::Error;

/// Result type alias for engine operations.
pub type MuxResult<T> = Result<T, MuxError>;

/// Errors returned by engine operations and request completions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MuxError {
    /// An allocation or lower-layer resource ran out.
    #[error("out of resources: {context}")]
    Resources {
        /// What was being allocated.
        context: String,
    },

    /// The lower binding failed the operation.
    #[error("lower layer failed: {0}")]
    LowerLayer(LowerStatus),

    /// A frame or request did not follow the expected format.
    #[error("protocol violation: {message}")]
    ProtocolViolation {
        /// What was wrong.
        message: String,
    },

    /// A request of the same kind is already outstanding on the interface.
    #[error("a {kind} request is already outstanding on {interface}")]
    Busy {
        /// The interface name.
        interface: String,
        /// The occupied request slot.
        kind: RequestKind,
    },

    /// The request was cancelled before it reached the lower layer.
    #[error("request cancelled")]
    Cancelled,

    /// The object id is not handled.
    #[error("unsupported object id {0}")]
    InvalidOid(Oid),

    /// The request buffer has the wrong size.
    #[error("invalid buffer length {actual} (expected {expected})")]
    InvalidLength {
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },

    /// The query buffer cannot hold the answer.
    #[error("buffer too short, {needed} bytes needed")]
    BufferTooShort {
        /// Bytes required for the answer.
        needed: usize,
    },

    /// The multicast list exceeds the per-interface maximum.
    #[error("multicast list full, at most {needed} bytes accepted")]
    MulticastFull {
        /// Largest accepted list, in bytes.
        needed: usize,
    },

    /// The request buffer holds a value out of range.
    #[error("invalid data for {0}")]
    InvalidData(Oid),

    /// The operation is recognised but not supported.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The target is in a low-power state.
    #[error("{0} is not ready")]
    NotReady(String),

    /// The target is being torn down.
    #[error("{0} is shutting down")]
    Closing(String),

    /// No binding or interface with that handle.
    #[error("{0} not found")]
    NotFound(String),

    /// A lifecycle transition that the state machine does not allow.
    #[error("invalid state transition for {interface}: {from} -> {to}")]
    InvalidTransition {
        /// The interface name.
        interface: String,
        /// Current state.
        from: VifState,
        /// Requested state.
        to: VifState,
    },

    /// The upper layer refused an operation.
    #[error("upper layer failed: {0}")]
    Upper(String),
}

impl MuxError {
    /// Creates a resource exhaustion error.
    pub fn resources(context: impl Into<String>) -> Self {
        Self::Resources {
            context: context.into(),
        }
    }

    /// Creates a protocol violation error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Creates a not-found error for a handle.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Returns true if the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Busy { .. } | Self::NotReady(_) | Self::Resources { .. }
        )
    }
}

/// Errors from opening a physical binding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    #[error("out of resources while opening {device}")]
    Resources { device: String },

    #[error("lower binding open failed for {device}: {status}")]
    LowerOpenFailed { device: String, status: LowerStatus },

    #[error("{device} uses unsupported medium {medium:?}")]
    UnsupportedMedium { device: String, medium: Medium },
}

impl OpenError {
    /// The lower status behind the failure, if any.
    pub fn status(&self) -> Option<LowerStatus> {
        match self {
            Self::LowerOpenFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<OpenError> for MuxError {
    fn from(err: OpenError) -> Self {
        match err {
            OpenError::Resources { device } => MuxError::resources(device),
            OpenError::LowerOpenFailed { status, .. } => MuxError::LowerLayer(status),
            OpenError::UnsupportedMedium { device, medium } => {
                MuxError::NotSupported(format!("medium {:?} on {}", medium, device))
            }
        }
    }
}

/// Errors from creating a virtual interface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreateError {
    #[error("out of resources while creating {name}")]
    Resources { name: String },

    #[error("binding {binding} is closing")]
    BindingClosing { binding: String },

    #[error("binding {binding} not found")]
    UnknownBinding { binding: String },

    #[error("upper layer refused to instantiate {name}: {source}")]
    Instantiate {
        name: String,
        #[source]
        source: MuxError,
    },
}

impl From<CreateError> for MuxError {
    fn from(err: CreateError) -> Self {
        match err {
            CreateError::Resources { name } => MuxError::resources(name),
            CreateError::BindingClosing { binding } => MuxError::Closing(binding),
            CreateError::UnknownBinding { binding } => MuxError::NotFound(binding),
            CreateError::Instantiate { source, .. } => source,
        }
    }
}
