//! Interface to the physical adapter below a binding.
//!
//! The engine drives the lower layer through [`LowerBinding`]. Operations
//! that can finish later either hand back an [`Event`] to block on (open and
//! close) or keep ownership of the submitted object and return it through
//! `Mux::on_lower_completion` / `Mux::on_send_complete` (requests and sends).

use crate::binding::BindingId;
use crate::error::{MuxError, MuxResult};
use crate::frame::SendPacket;
use crate::lifetime::Event;
use crate::request::ForwardedRequest;
use netmux_types::Medium;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque handle of an open lower binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LowerHandle(pub u64);

/// Identifier the lower layer attaches to each indicated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LowerFrameId(pub u64);

/// Completion status reported by the lower layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LowerStatus {
    Success,
    Failure,
    Resources,
    NotSupported,
    InvalidLength,
    InvalidData,
    InvalidOid,
    BufferTooShort { needed: usize },
    AdapterNotReady,
    RequestAborted,
    /// Any other status, by numeric code.
    Code(u32),
}

impl LowerStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, LowerStatus::Success)
    }

    /// Maps the status onto the engine's error taxonomy.
    pub fn into_result(self) -> MuxResult<()> {
        match self {
            LowerStatus::Success => Ok(()),
            LowerStatus::Resources => Err(MuxError::resources("lower layer")),
            LowerStatus::BufferTooShort { needed } => Err(MuxError::BufferTooShort { needed }),
            LowerStatus::RequestAborted => Err(MuxError::Cancelled),
            other => Err(MuxError::LowerLayer(other)),
        }
    }
}

impl fmt::Display for LowerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LowerStatus::Success => f.write_str("success"),
            LowerStatus::Failure => f.write_str("failure"),
            LowerStatus::Resources => f.write_str("resources"),
            LowerStatus::NotSupported => f.write_str("not supported"),
            LowerStatus::InvalidLength => f.write_str("invalid length"),
            LowerStatus::InvalidData => f.write_str("invalid data"),
            LowerStatus::InvalidOid => f.write_str("invalid oid"),
            LowerStatus::BufferTooShort { needed } => {
                write!(f, "buffer too short ({} bytes needed)", needed)
            }
            LowerStatus::AdapterNotReady => f.write_str("adapter not ready"),
            LowerStatus::RequestAborted => f.write_str("request aborted"),
            LowerStatus::Code(code) => write!(f, "status {:#010x}", code),
        }
    }
}

/// Result of a lower operation that may complete asynchronously on an event.
#[derive(Debug)]
pub enum LowerOp<T> {
    Ready(Result<T, LowerStatus>),
    Pending(Arc<Event<Result<T, LowerStatus>>>),
}

impl<T> LowerOp<T> {
    /// Blocks until the operation completes.
    pub fn wait(self) -> Result<T, LowerStatus> {
        match self {
            LowerOp::Ready(result) => result,
            LowerOp::Pending(event) => event.wait().unwrap_or(Err(LowerStatus::Failure)),
        }
    }
}

/// Result of submitting an owned object to the lower layer.
#[derive(Debug)]
pub enum Submitted<T> {
    /// Completed during the call; ownership comes straight back.
    Complete(T, LowerStatus),
    /// The lower layer keeps the object and reports completion later.
    Pending,
}

/// What the lower layer negotiated when the binding opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowerOpened {
    pub handle: LowerHandle,
    pub medium: Medium,
}

/// Receive status attached to an indicated frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// The engine may keep the frame until the upper layer returns it.
    #[default]
    Normal,
    /// The lower layer is short of buffers: the frame has to be delivered
    /// now and is reclaimed as soon as the receive call returns.
    Resources,
}

/// A frame indicated by the lower layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowerFrame {
    pub id: LowerFrameId,
    pub data: Vec<u8>,
    pub status: ReceiveStatus,
}

impl LowerFrame {
    pub fn new(id: u64, data: Vec<u8>) -> Self {
        Self {
            id: LowerFrameId(id),
            data,
            status: ReceiveStatus::Normal,
        }
    }

    pub fn with_status(mut self, status: ReceiveStatus) -> Self {
        self.status = status;
        self
    }
}

/// The physical adapter driver below a binding.
#[cfg_attr(test, mockall::automock)]
pub trait LowerBinding: Send + Sync {
    /// Opens the adapter named `device`. `context` identifies the binding in
    /// later callbacks into the engine.
    fn open(&self, device: &str, context: BindingId) -> LowerOp<LowerOpened>;

    /// Closes an open binding.
    fn close(&self, handle: LowerHandle) -> LowerOp<()>;

    /// Submits a query or set request.
    fn request(
        &self,
        handle: LowerHandle,
        request: ForwardedRequest,
    ) -> Submitted<ForwardedRequest>;

    /// Submits one frame for transmission.
    fn send(&self, handle: LowerHandle, packet: SendPacket) -> Submitted<SendPacket>;

    /// Hands back a frame that was retained after indication.
    fn return_frame(&self, handle: LowerHandle, frame: LowerFrameId);

    /// Cancels queued sends tagged with `cancel_id`.
    fn cancel_sends(&self, handle: LowerHandle, cancel_id: u64);
}
