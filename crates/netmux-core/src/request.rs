//! Query and set requests relayed between a virtual interface and its
//! binding.
//!
//! Each interface owns one slot per request kind. A request occupies the slot
//! from the moment it is accepted until its completion has been relayed, so a
//! second request of the same kind is refused with [`MuxError::Busy`].

use crate::binding::PhysicalBinding;
use crate::error::{MuxError, MuxResult};
use crate::lifetime::Event;
use crate::lower::{LowerStatus, Submitted};
use crate::mux::Mux;
use crate::oid::Oid;
use crate::vif::{VifId, VirtualInterface};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// The two request kinds an interface can have outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Query,
    Set,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Query => f.write_str("query"),
            RequestKind::Set => f.write_str("set"),
        }
    }
}

/// What happens once the lower layer completes a request.
pub(crate) enum Continuation {
    /// A control path is blocked on the event.
    BlockWait(Arc<Event<Result<RequestReply, LowerStatus>>>),
    /// Nobody waits; the outcome is only logged.
    FireAndForget,
    /// Relay the outcome to the upper caller of the interface.
    RelayTo(VifId),
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Continuation::BlockWait(_) => f.write_str("BlockWait"),
            Continuation::FireAndForget => f.write_str("FireAndForget"),
            Continuation::RelayTo(vif) => write!(f, "RelayTo({})", vif),
        }
    }
}

/// A query or set in flight to the lower layer.
///
/// The lower layer owns the request between `LowerBinding::request` and the
/// matching `Mux::on_lower_completion`.
pub struct ForwardedRequest {
    kind: RequestKind,
    oid: Oid,
    buffer: Vec<u8>,
    bytes_transferred: usize,
    bytes_needed: usize,
    pub(crate) origin: Option<Arc<VirtualInterface>>,
    pub(crate) binding: Arc<PhysicalBinding>,
    pub(crate) continuation: Continuation,
}

impl ForwardedRequest {
    pub(crate) fn new(
        kind: RequestKind,
        oid: Oid,
        buffer: Vec<u8>,
        binding: Arc<PhysicalBinding>,
        origin: Option<Arc<VirtualInterface>>,
        continuation: Continuation,
    ) -> Self {
        Self {
            kind,
            oid,
            buffer,
            bytes_transferred: 0,
            bytes_needed: 0,
            origin,
            binding,
            continuation,
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// The set payload, or the space available for a query answer.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn bytes_transferred(&self) -> usize {
        self.bytes_transferred
    }

    pub fn bytes_needed(&self) -> usize {
        self.bytes_needed
    }

    /// Stores a query answer. Returns the status to complete the request
    /// with: success, or buffer-too-short with the required size recorded.
    pub fn respond(&mut self, answer: &[u8]) -> LowerStatus {
        if answer.len() > self.buffer.len() {
            self.bytes_needed = answer.len();
            return LowerStatus::BufferTooShort {
                needed: answer.len(),
            };
        }
        self.buffer.truncate(answer.len());
        self.buffer.copy_from_slice(answer);
        self.bytes_transferred = answer.len();
        LowerStatus::Success
    }

    /// Marks the whole set payload as consumed.
    pub fn accept(&mut self) -> LowerStatus {
        self.bytes_transferred = self.buffer.len();
        LowerStatus::Success
    }

    pub fn set_bytes_needed(&mut self, needed: usize) {
        self.bytes_needed = needed;
    }

    fn reply(&self) -> RequestReply {
        let data = match self.kind {
            RequestKind::Query => self.buffer[..self.bytes_transferred.min(self.buffer.len())].to_vec(),
            RequestKind::Set => Vec::new(),
        };
        RequestReply {
            oid: self.oid,
            data,
            bytes_transferred: self.bytes_transferred,
            bytes_needed: self.bytes_needed,
        }
    }
}

impl fmt::Debug for ForwardedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardedRequest")
            .field("kind", &self.kind)
            .field("oid", &self.oid)
            .field("len", &self.buffer.len())
            .field("binding", &self.binding.id())
            .field("continuation", &self.continuation)
            .finish()
    }
}

/// Answer to a completed query or set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestReply {
    pub oid: Oid,
    /// Query answer bytes; empty for sets.
    pub data: Vec<u8>,
    pub bytes_transferred: usize,
    pub bytes_needed: usize,
}

impl RequestReply {
    pub(crate) fn answered(oid: Oid, data: Vec<u8>) -> Self {
        let bytes_transferred = data.len();
        Self {
            oid,
            data,
            bytes_transferred,
            bytes_needed: 0,
        }
    }

    pub(crate) fn consumed(oid: Oid, bytes: usize) -> Self {
        Self {
            oid,
            data: Vec::new(),
            bytes_transferred: bytes,
            bytes_needed: 0,
        }
    }
}

/// Result of starting a request on a virtual interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Answered without involving the lower layer.
    Complete(RequestReply),
    /// Forwarded; the outcome arrives through `query_complete` or
    /// `set_complete` on the upper edge.
    Pending,
}

/// State of one request slot.
#[derive(Debug, Default)]
pub(crate) enum Slot {
    #[default]
    Empty,
    /// Accepted while the binding was in low power; submitted on resume.
    Queued(ForwardedRequest),
    /// Owned by the lower layer.
    Submitted(Oid),
}

impl Slot {
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }
}

/// One slot per request kind.
#[derive(Debug, Default)]
pub(crate) struct RequestSlots {
    pub(crate) query: Slot,
    pub(crate) set: Slot,
}

impl RequestSlots {
    pub(crate) fn get_mut(&mut self, kind: RequestKind) -> &mut Slot {
        match kind {
            RequestKind::Query => &mut self.query,
            RequestKind::Set => &mut self.set,
        }
    }

    pub(crate) fn get(&self, kind: RequestKind) -> &Slot {
        match kind {
            RequestKind::Query => &self.query,
            RequestKind::Set => &self.set,
        }
    }

    /// Removes every queued request.
    pub(crate) fn take_queued(&mut self) -> Vec<ForwardedRequest> {
        let mut queued = Vec::new();
        for slot in [&mut self.query, &mut self.set] {
            if matches!(slot, Slot::Queued(_)) {
                if let Slot::Queued(request) = std::mem::take(slot) {
                    queued.push(request);
                }
            }
        }
        queued
    }
}

impl Mux {
    /// Relays a query or set from `vif` to its binding.
    ///
    /// Returns [`RequestOutcome::Pending`] once the request is accepted; the
    /// outcome is always relayed through the upper edge, even when the lower
    /// layer completes during the call.
    ///
    /// # Errors
    ///
    /// - [`MuxError::Busy`] if a request of the same kind is outstanding
    /// - [`MuxError::Closing`] if the interface is halting
    /// - [`MuxError::NotReady`] if the interface is in low power
    #[instrument(skip(self, buffer), fields(len = buffer.len()))]
    pub fn forward(
        &self,
        vif: VifId,
        kind: RequestKind,
        oid: Oid,
        buffer: Vec<u8>,
    ) -> MuxResult<RequestOutcome> {
        let (binding, iface) = self.lookup_interface(vif)?;

        let request = {
            let mut shared = iface.shared.lock();
            let slot = shared.slots.get_mut(kind);
            if !slot.is_empty() {
                return Err(MuxError::Busy {
                    interface: iface.name().to_string(),
                    kind,
                });
            }
            if iface.is_stopping() {
                return Err(MuxError::Closing(iface.name().to_string()));
            }
            if iface.power_state().is_low_power() {
                return Err(MuxError::NotReady(iface.name().to_string()));
            }

            let request = ForwardedRequest::new(
                kind,
                oid,
                buffer,
                Arc::clone(&binding),
                Some(Arc::clone(&iface)),
                Continuation::RelayTo(vif),
            );

            // A queued request is not in flight; it is counted once submitted.
            if binding.power_state().is_low_power() {
                debug!(interface = %iface.name(), %oid, "binding in low power, queueing request");
                *slot = Slot::Queued(request);
                return Ok(RequestOutcome::Pending);
            }
            if !iface.refs.try_acquire("request") {
                return Err(MuxError::Closing(iface.name().to_string()));
            }
            iface.sends.increment();
            *slot = Slot::Submitted(oid);
            request
        };

        self.submit(&binding, request);
        Ok(RequestOutcome::Pending)
    }

    /// Cancels a request that is still queued. Returns false if nothing was
    /// queued; a submitted request always runs to completion.
    #[instrument(skip(self))]
    pub fn cancel_request(&self, vif: VifId, kind: RequestKind) -> MuxResult<bool> {
        let (_, iface) = self.lookup_interface(vif)?;
        let queued = {
            let mut shared = iface.shared.lock();
            let slot = shared.slots.get_mut(kind);
            match slot {
                Slot::Queued(_) => match std::mem::take(slot) {
                    Slot::Queued(request) => request,
                    _ => return Ok(false),
                },
                _ => return Ok(false),
            }
        };
        self.fail_unsubmitted(queued, MuxError::Cancelled);
        Ok(true)
    }

    /// Completion of a request submitted to the lower layer.
    pub fn on_lower_completion(&self, mut request: ForwardedRequest, status: LowerStatus) {
        if status.is_success() {
            if let Some(iface) = request.origin.clone() {
                post_process(&iface, &mut request);
            }
        }

        match std::mem::replace(&mut request.continuation, Continuation::FireAndForget) {
            Continuation::BlockWait(event) => {
                let outcome = if status.is_success() {
                    Ok(request.reply())
                } else {
                    Err(status)
                };
                event.signal(outcome);
            }
            Continuation::FireAndForget => {
                if status.is_success() {
                    debug!(binding = %request.binding.id(), oid = %request.oid, "request completed");
                } else {
                    warn!(binding = %request.binding.id(), oid = %request.oid, %status, "request failed");
                }
            }
            Continuation::RelayTo(vif) => {
                let Some(iface) = request.origin.take() else {
                    warn!(%vif, oid = %request.oid, "relayed request lost its interface");
                    return;
                };
                {
                    let mut shared = iface.shared.lock();
                    let slot = shared.slots.get_mut(request.kind);
                    if matches!(slot, Slot::Submitted(oid) if *oid == request.oid) {
                        *slot = Slot::Empty;
                    }
                }
                let result = if status.is_success() {
                    Ok(request.reply())
                } else {
                    Err(completion_error(&request, status))
                };
                self.relay_completion(&iface, request.kind, request.oid, result);
                iface.sends.decrement();
                self.release_interface(&iface, "request");
            }
        }
    }

    /// Hands a request to the lower layer, running the completion path
    /// directly if the lower layer completes during the call.
    pub(crate) fn submit(&self, binding: &PhysicalBinding, request: ForwardedRequest) {
        match self.lower.request(binding.handle(), request) {
            Submitted::Complete(request, status) => self.on_lower_completion(request, status),
            Submitted::Pending => {}
        }
    }

    /// Issues a request on behalf of the binding itself and blocks until it
    /// completes.
    pub(crate) fn request_blocking(
        &self,
        binding: &Arc<PhysicalBinding>,
        kind: RequestKind,
        oid: Oid,
        buffer: Vec<u8>,
    ) -> Result<RequestReply, LowerStatus> {
        let event = Arc::new(Event::new());
        let request = ForwardedRequest::new(
            kind,
            oid,
            buffer,
            Arc::clone(binding),
            None,
            Continuation::BlockWait(Arc::clone(&event)),
        );
        self.submit(binding, request);
        event.wait().unwrap_or(Err(LowerStatus::Failure))
    }

    /// Issues a request on behalf of the binding without waiting for it.
    pub(crate) fn request_detached(
        &self,
        binding: &Arc<PhysicalBinding>,
        kind: RequestKind,
        oid: Oid,
        buffer: Vec<u8>,
    ) {
        let request = ForwardedRequest::new(
            kind,
            oid,
            buffer,
            Arc::clone(binding),
            None,
            Continuation::FireAndForget,
        );
        self.submit(binding, request);
    }

    /// Submits every request queued while the binding was in low power.
    pub(crate) fn redispatch_queued(&self, binding: &Arc<PhysicalBinding>) {
        for iface in binding.referenced_members("redispatch") {
            let (submit, refused) = {
                let mut shared = iface.shared.lock();
                let queued = shared.slots.take_queued();
                if iface.is_stopping() {
                    (Vec::new(), queued)
                } else {
                    for request in &queued {
                        *shared.slots.get_mut(request.kind) = Slot::Submitted(request.oid);
                        iface.refs.acquire("request");
                        iface.sends.increment();
                    }
                    (queued, Vec::new())
                }
            };
            for request in refused {
                self.fail_unsubmitted(request, MuxError::LowerLayer(LowerStatus::Failure));
            }
            for request in submit {
                debug!(interface = %iface.name(), oid = %request.oid, "submitting deferred request");
                self.submit(binding, request);
            }
            self.release_interface(&iface, "redispatch");
        }
    }

    /// Fails every queued request of an interface.
    pub(crate) fn fail_queued(&self, iface: &VirtualInterface, error: MuxError) {
        let queued = iface.shared.lock().slots.take_queued();
        for request in queued {
            self.fail_unsubmitted(request, error.clone());
        }
    }

    /// Completes a queued request that never reached the lower layer. The
    /// slot must already be clear; queued requests hold no reference.
    fn fail_unsubmitted(&self, mut request: ForwardedRequest, error: MuxError) {
        let Some(iface) = request.origin.take() else {
            return;
        };
        debug!(interface = %iface.name(), oid = %request.oid, %error, "failing unsubmitted request");
        self.relay_completion(&iface, request.kind, request.oid, Err(error));
    }

    fn relay_completion(
        &self,
        iface: &VirtualInterface,
        kind: RequestKind,
        oid: Oid,
        result: MuxResult<RequestReply>,
    ) {
        match kind {
            RequestKind::Query => {
                self.upper
                    .query_complete(iface.id(), oid, result.map(|reply| reply.data))
            }
            RequestKind::Set => self.upper.set_complete(
                iface.id(),
                oid,
                result.map(|reply| reply.bytes_transferred),
            ),
        }
    }
}

fn completion_error(request: &ForwardedRequest, status: LowerStatus) -> MuxError {
    match status {
        LowerStatus::BufferTooShort { needed } => MuxError::BufferTooShort {
            needed: needed.max(request.bytes_needed),
        },
        LowerStatus::InvalidLength => MuxError::InvalidLength {
            expected: request.bytes_needed,
            actual: request.buffer.len(),
        },
        LowerStatus::InvalidOid => MuxError::InvalidOid(request.oid),
        LowerStatus::InvalidData => MuxError::InvalidData(request.oid),
        LowerStatus::AdapterNotReady => MuxError::NotReady(request.binding.device().to_string()),
        other => match other.into_result() {
            Err(err) => err,
            Ok(()) => MuxError::LowerLayer(other),
        },
    }
}

/// Caches or rewrites what a successful completion carries before it is
/// relayed.
fn post_process(iface: &VirtualInterface, request: &mut ForwardedRequest) {
    match (request.kind, request.oid) {
        (RequestKind::Query, Oid::LINK_SPEED) => {
            if let Some(speed) = read_u32(request.buffer()) {
                iface.set_link_speed(speed);
            }
        }
        (RequestKind::Query, Oid::PNP_CAPABILITIES) => {
            // Wake-up minimums (magic packet, pattern, link change) follow
            // the flags word; report them as unspecified.
            let end = request.bytes_transferred.min(PNP_CAPABILITIES_LEN);
            if end > 4 {
                request.buffer_mut()[4..end].fill(0);
            }
        }
        (RequestKind::Set, Oid::CURRENT_LOOKAHEAD) => {
            if let Some(lookahead) = read_u32(request.buffer()) {
                iface.set_lookahead(lookahead);
            }
        }
        _ => {}
    }
}

const PNP_CAPABILITIES_LEN: usize = 16;

pub(crate) fn read_u32(buffer: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = buffer.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}
