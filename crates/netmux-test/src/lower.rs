//! Scriptable lower layer.
//!
//! Requests and sends complete during the call unless they are set to pend,
//! in which case the test completes them explicitly in submission order.

use crate::error::{HarnessError, HarnessResult};
use netmux_core::{
    BindingId, Event, ForwardedRequest, LowerBinding, LowerFrameId, LowerHandle, LowerOp,
    LowerOpened, LowerStatus, Mux, Oid, RequestKind, SendPacket, Submitted,
};
use netmux_types::{MacAddress, Medium};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Link speed the mock reports, in units of 100 bps.
pub const MOCK_LINK_SPEED: u32 = 100;

/// Lookahead the mock reports.
pub const MOCK_LOOKAHEAD: u32 = 1500;

/// Address the mock reports for every device.
pub const MOCK_ADDRESS: MacAddress = MacAddress::new([0x00, 0xaa, 0xbb, 0xcc, 0xdd, 0x01]);

struct State {
    medium: Medium,
    open_failure: Option<LowerStatus>,
    pend_close: bool,
    pend_requests: bool,
    pend_sends: bool,
    answers: HashMap<Oid, Vec<u8>>,
    failures: HashMap<Oid, LowerStatus>,
    next_handle: u64,
    opened: Vec<(String, BindingId)>,
    closed: Vec<LowerHandle>,
    close_events: Vec<Arc<Event<Result<(), LowerStatus>>>>,
    submitted: Vec<(RequestKind, Oid, Vec<u8>)>,
    pending_requests: VecDeque<ForwardedRequest>,
    pending_sends: VecDeque<SendPacket>,
    sent: Vec<Vec<u8>>,
    returned: Vec<LowerFrameId>,
    cancelled: Vec<u64>,
}

impl Default for State {
    fn default() -> Self {
        let mut answers = HashMap::new();
        answers.insert(Oid::LINK_SPEED, MOCK_LINK_SPEED.to_le_bytes().to_vec());
        answers.insert(Oid::MAXIMUM_LOOKAHEAD, MOCK_LOOKAHEAD.to_le_bytes().to_vec());
        answers.insert(Oid::CURRENT_ADDRESS, MOCK_ADDRESS.as_bytes().to_vec());
        answers.insert(Oid::MEDIA_CONNECT_STATUS, 0u32.to_le_bytes().to_vec());
        answers.insert(Oid::PNP_CAPABILITIES, vec![0xff; 16]);
        Self {
            medium: Medium::Ethernet,
            open_failure: None,
            pend_close: false,
            pend_requests: false,
            pend_sends: false,
            answers,
            failures: HashMap::new(),
            next_handle: 0,
            opened: Vec::new(),
            closed: Vec::new(),
            close_events: Vec::new(),
            submitted: Vec::new(),
            pending_requests: VecDeque::new(),
            pending_sends: VecDeque::new(),
            sent: Vec::new(),
            returned: Vec::new(),
            cancelled: Vec::new(),
        }
    }
}

/// Hand-written lower layer recording everything the engine submits.
#[derive(Default)]
pub struct MockLower {
    state: Mutex<State>,
}

impl MockLower {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- scripting ----

    pub fn set_medium(&self, medium: Medium) {
        self.state.lock().medium = medium;
    }

    pub fn fail_open(&self, status: LowerStatus) {
        self.state.lock().open_failure = Some(status);
    }

    /// Answer queries for `oid` with `data`.
    pub fn answer(&self, oid: Oid, data: impl Into<Vec<u8>>) {
        self.state.lock().answers.insert(oid, data.into());
    }

    /// Fail every request for `oid` with `status`.
    pub fn fail(&self, oid: Oid, status: LowerStatus) {
        self.state.lock().failures.insert(oid, status);
    }

    pub fn pend_requests(&self, pend: bool) {
        self.state.lock().pend_requests = pend;
    }

    pub fn pend_sends(&self, pend: bool) {
        self.state.lock().pend_sends = pend;
    }

    /// Close returns a pending event the test signals with `finish_close`.
    pub fn pend_close(&self, pend: bool) {
        self.state.lock().pend_close = pend;
    }

    // ---- inspection ----

    pub fn opened(&self) -> Vec<(String, BindingId)> {
        self.state.lock().opened.clone()
    }

    pub fn closed(&self) -> Vec<LowerHandle> {
        self.state.lock().closed.clone()
    }

    /// Every request that reached the mock, in order.
    pub fn submitted(&self) -> Vec<(RequestKind, Oid, Vec<u8>)> {
        self.state.lock().submitted.clone()
    }

    /// Requests for `oid` that reached the mock.
    pub fn submitted_for(&self, oid: Oid) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .submitted
            .iter()
            .filter(|(_, o, _)| *o == oid)
            .map(|(_, _, data)| data.clone())
            .collect()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    pub fn returned(&self) -> Vec<LowerFrameId> {
        self.state.lock().returned.clone()
    }

    pub fn cancelled(&self) -> Vec<u64> {
        self.state.lock().cancelled.clone()
    }

    pub fn pending_requests(&self) -> usize {
        self.state.lock().pending_requests.len()
    }

    pub fn pending_sends(&self) -> usize {
        self.state.lock().pending_sends.len()
    }

    // ---- completion ----

    /// Completes the oldest pending request, answering it as a synchronous
    /// request would have been answered unless `status` is given.
    pub fn complete_request(&self, mux: &Mux, status: Option<LowerStatus>) -> HarnessResult<Oid> {
        let (request, answered) = {
            let mut state = self.state.lock();
            let mut request = state
                .pending_requests
                .pop_front()
                .ok_or(HarnessError::NoPendingRequest)?;
            let answered = answer(&state, &mut request);
            (request, answered)
        };
        let oid = request.oid();
        mux.on_lower_completion(request, status.unwrap_or(answered));
        Ok(oid)
    }

    /// Completes the oldest pending send with `status`.
    pub fn complete_send(&self, mux: &Mux, status: LowerStatus) -> HarnessResult<u64> {
        let packet = self
            .state
            .lock()
            .pending_sends
            .pop_front()
            .ok_or(HarnessError::NoPendingSend)?;
        let id = packet.id();
        if status.is_success() {
            self.state.lock().sent.push(packet.data().to_vec());
        }
        mux.on_send_complete(packet, status);
        Ok(id)
    }

    /// Signals every pending close.
    pub fn finish_close(&self) -> usize {
        let events: Vec<_> = self.state.lock().close_events.drain(..).collect();
        for event in &events {
            event.signal(Ok(()));
        }
        events.len()
    }
}

fn answer(state: &State, request: &mut ForwardedRequest) -> LowerStatus {
    if let Some(status) = state.failures.get(&request.oid()) {
        return *status;
    }
    match request.kind() {
        RequestKind::Query => match state.answers.get(&request.oid()) {
            Some(data) => request.respond(data),
            None => LowerStatus::NotSupported,
        },
        RequestKind::Set => request.accept(),
    }
}

impl LowerBinding for MockLower {
    fn open(&self, device: &str, context: BindingId) -> LowerOp<LowerOpened> {
        let mut state = self.state.lock();
        if let Some(status) = state.open_failure {
            return LowerOp::Ready(Err(status));
        }
        state.next_handle += 1;
        state.opened.push((device.to_string(), context));
        LowerOp::Ready(Ok(LowerOpened {
            handle: LowerHandle(state.next_handle),
            medium: state.medium,
        }))
    }

    fn close(&self, handle: LowerHandle) -> LowerOp<()> {
        let mut state = self.state.lock();
        state.closed.push(handle);
        if state.pend_close {
            let event = Arc::new(Event::new());
            state.close_events.push(Arc::clone(&event));
            return LowerOp::Pending(event);
        }
        LowerOp::Ready(Ok(()))
    }

    fn request(&self, _handle: LowerHandle, mut request: ForwardedRequest) -> Submitted<ForwardedRequest> {
        let mut state = self.state.lock();
        state
            .submitted
            .push((request.kind(), request.oid(), request.buffer().to_vec()));
        if state.pend_requests {
            state.pending_requests.push_back(request);
            return Submitted::Pending;
        }
        let status = answer(&state, &mut request);
        Submitted::Complete(request, status)
    }

    fn send(&self, _handle: LowerHandle, packet: SendPacket) -> Submitted<SendPacket> {
        let mut state = self.state.lock();
        if state.pend_sends {
            state.pending_sends.push_back(packet);
            return Submitted::Pending;
        }
        state.sent.push(packet.data().to_vec());
        Submitted::Complete(packet, LowerStatus::Success)
    }

    fn return_frame(&self, _handle: LowerHandle, frame: LowerFrameId) {
        self.state.lock().returned.push(frame);
    }

    fn cancel_sends(&self, _handle: LowerHandle, cancel_id: u64) {
        self.state.lock().cancelled.push(cancel_id);
    }
}
