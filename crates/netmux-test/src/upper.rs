//! Recording upper edge.

use netmux_core::{
    DeliveredFrame, IndicationKind, InitParams, Mux, MuxError, MuxResult, Oid, StatusCode,
    StatusIndication, UpperEdge, VifId, VlanTag,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// One call the engine made on the upper edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpperEvent {
    Instantiate(VifId, String),
    Teardown(VifId),
    Halted(VifId),
    Frames(VifId, usize),
    Status(VifId, StatusCode),
    IndicationComplete(VifId, IndicationKind),
    SendComplete(VifId, u64, MuxResult<()>),
    QueryComplete(VifId, Oid, MuxResult<Vec<u8>>),
    SetComplete(VifId, Oid, MuxResult<usize>),
}

/// Callback run from `indication_complete`, after the event is recorded.
pub type CompletionHook = Arc<dyn Fn(&Mux, VifId, IndicationKind) + Send + Sync>;

/// A delivered frame as the test sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub vif: VifId,
    pub data: Vec<u8>,
    pub vlan: Option<VlanTag>,
    /// Whether the engine expects the frame back.
    pub retained: bool,
}

/// Upper edge that records every call.
///
/// By default instances initialize inside `instantiate`, teardown requests
/// are acknowledged on the spot and retained frames are returned as soon as
/// they arrive. Each behavior can be switched off to leave the step to the
/// test.
pub struct RecordingUpper {
    engine: Mutex<Weak<Mux>>,
    auto_initialize: AtomicBool,
    auto_halt: AtomicBool,
    auto_return: AtomicBool,
    cancel_instantiation: AtomicBool,
    refuse_instantiation: AtomicBool,
    params: Mutex<HashMap<String, InitParams>>,
    events: Mutex<Vec<UpperEvent>>,
    received: Mutex<Vec<Received>>,
    held: Mutex<Vec<DeliveredFrame>>,
    on_indication_complete: Mutex<Option<CompletionHook>>,
}

impl Default for RecordingUpper {
    fn default() -> Self {
        Self {
            engine: Mutex::new(Weak::new()),
            auto_initialize: AtomicBool::new(true),
            auto_halt: AtomicBool::new(true),
            auto_return: AtomicBool::new(true),
            cancel_instantiation: AtomicBool::new(false),
            refuse_instantiation: AtomicBool::new(false),
            params: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            on_indication_complete: Mutex::new(None),
        }
    }
}

impl RecordingUpper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, mux: &Arc<Mux>) {
        *self.engine.lock() = Arc::downgrade(mux);
    }

    fn engine(&self) -> Option<Arc<Mux>> {
        self.engine.lock().upgrade()
    }

    pub fn set_auto_initialize(&self, on: bool) {
        self.auto_initialize.store(on, Ordering::SeqCst);
    }

    pub fn set_auto_halt(&self, on: bool) {
        self.auto_halt.store(on, Ordering::SeqCst);
    }

    pub fn set_auto_return(&self, on: bool) {
        self.auto_return.store(on, Ordering::SeqCst);
    }

    pub fn set_cancel_instantiation(&self, on: bool) {
        self.cancel_instantiation.store(on, Ordering::SeqCst);
    }

    pub fn set_refuse_instantiation(&self, on: bool) {
        self.refuse_instantiation.store(on, Ordering::SeqCst);
    }

    /// Calls back into the engine from every `indication_complete`.
    pub fn set_on_indication_complete(
        &self,
        hook: impl Fn(&Mux, VifId, IndicationKind) + Send + Sync + 'static,
    ) {
        *self.on_indication_complete.lock() = Some(Arc::new(hook));
    }

    /// Settings used when the instance named `name` initializes.
    pub fn set_params(&self, name: &str, params: InitParams) {
        self.params.lock().insert(name.to_uppercase(), params);
    }

    pub fn params_for(&self, name: &str) -> InitParams {
        self.params
            .lock()
            .get(&name.to_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    // ---- inspection ----

    pub fn events(&self) -> Vec<UpperEvent> {
        self.events.lock().clone()
    }

    pub fn take_events(&self) -> Vec<UpperEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }

    pub fn take_received(&self) -> Vec<Received> {
        std::mem::take(&mut *self.received.lock())
    }

    pub fn received_by(&self, vif: VifId) -> Vec<Received> {
        self.received
            .lock()
            .iter()
            .filter(|r| r.vif == vif)
            .cloned()
            .collect()
    }

    pub fn instantiated(&self) -> Vec<VifId> {
        self.filter(|e| match e {
            UpperEvent::Instantiate(vif, _) => Some(*vif),
            _ => None,
        })
    }

    pub fn teardowns(&self) -> Vec<VifId> {
        self.filter(|e| match e {
            UpperEvent::Teardown(vif) => Some(*vif),
            _ => None,
        })
    }

    pub fn halted(&self) -> Vec<VifId> {
        self.filter(|e| match e {
            UpperEvent::Halted(vif) => Some(*vif),
            _ => None,
        })
    }

    pub fn send_results(&self) -> Vec<(VifId, u64, MuxResult<()>)> {
        self.filter(|e| match e {
            UpperEvent::SendComplete(vif, id, result) => Some((*vif, *id, result.clone())),
            _ => None,
        })
    }

    pub fn query_results(&self) -> Vec<(VifId, Oid, MuxResult<Vec<u8>>)> {
        self.filter(|e| match e {
            UpperEvent::QueryComplete(vif, oid, result) => Some((*vif, *oid, result.clone())),
            _ => None,
        })
    }

    pub fn set_results(&self) -> Vec<(VifId, Oid, MuxResult<usize>)> {
        self.filter(|e| match e {
            UpperEvent::SetComplete(vif, oid, result) => Some((*vif, *oid, result.clone())),
            _ => None,
        })
    }

    pub fn statuses(&self) -> Vec<(VifId, StatusCode)> {
        self.filter(|e| match e {
            UpperEvent::Status(vif, code) => Some((*vif, *code)),
            _ => None,
        })
    }

    fn filter<T>(&self, pick: impl Fn(&UpperEvent) -> Option<T>) -> Vec<T> {
        self.events.lock().iter().filter_map(pick).collect()
    }

    /// Frames kept while auto-return was off.
    pub fn held_frames(&self) -> usize {
        self.held.lock().len()
    }

    /// Returns every held frame to the engine.
    pub fn return_held(&self) -> usize {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        let count = held.len();
        if let Some(mux) = self.engine() {
            for mut frame in held {
                if let Some(ticket) = frame.take_ticket() {
                    mux.return_frame(ticket);
                }
            }
        }
        count
    }

    fn record(&self, event: UpperEvent) {
        self.events.lock().push(event);
    }
}

impl UpperEdge for RecordingUpper {
    fn instantiate(&self, vif: VifId, name: &str) -> MuxResult<()> {
        self.record(UpperEvent::Instantiate(vif, name.to_string()));
        if self.refuse_instantiation.load(Ordering::SeqCst) {
            return Err(MuxError::resources(format!("instance {name}")));
        }
        if self.auto_initialize.load(Ordering::SeqCst) {
            if let Some(mux) = self.engine() {
                mux.initialize_interface(vif, self.params_for(name))?;
            }
        }
        Ok(())
    }

    fn cancel_instantiation(&self, _vif: VifId) -> bool {
        self.cancel_instantiation.load(Ordering::SeqCst)
    }

    fn request_teardown(&self, vif: VifId) {
        self.record(UpperEvent::Teardown(vif));
        if self.auto_halt.load(Ordering::SeqCst) {
            if let Some(mux) = self.engine() {
                let _ = mux.on_instance_halt(vif);
            }
        }
    }

    fn halt_acknowledged(&self, vif: VifId) {
        self.record(UpperEvent::Halted(vif));
    }

    fn deliver_frames(&self, vif: VifId, frames: Vec<DeliveredFrame>) {
        self.record(UpperEvent::Frames(vif, frames.len()));
        {
            let mut received = self.received.lock();
            received.extend(frames.iter().map(|f| Received {
                vif,
                data: f.data.clone(),
                vlan: f.vlan,
                retained: f.ticket.is_some(),
            }));
        }

        if self.auto_return.load(Ordering::SeqCst) {
            let Some(mux) = self.engine() else {
                return;
            };
            for mut frame in frames {
                if let Some(ticket) = frame.take_ticket() {
                    mux.return_frame(ticket);
                }
            }
        } else {
            self.held
                .lock()
                .extend(frames.into_iter().filter(|f| f.ticket.is_some()));
        }
    }

    fn deliver_status(&self, vif: VifId, status: StatusIndication) {
        self.record(UpperEvent::Status(vif, status.code));
    }

    fn indication_complete(&self, vif: VifId, kind: IndicationKind) {
        self.record(UpperEvent::IndicationComplete(vif, kind));
        let hook = self.on_indication_complete.lock().clone();
        if let (Some(hook), Some(mux)) = (hook, self.engine()) {
            hook(&mux, vif, kind);
        }
    }

    fn send_complete(&self, vif: VifId, send_id: u64, result: MuxResult<()>) {
        self.record(UpperEvent::SendComplete(vif, send_id, result));
    }

    fn query_complete(&self, vif: VifId, oid: Oid, result: MuxResult<Vec<u8>>) {
        self.record(UpperEvent::QueryComplete(vif, oid, result));
    }

    fn set_complete(&self, vif: VifId, oid: Oid, result: MuxResult<usize>) {
        self.record(UpperEvent::SetComplete(vif, oid, result));
    }
}
