//! Fixtures shared by the unit tests: a synchronous mock adapter and a mock
//! upper edge that records everything it is handed.

use crate::binding::BindingId;
use crate::error::MuxResult;
use crate::frame::{self, DeliveredFrame};
use crate::lower::{
    LowerFrame, LowerHandle, LowerOp, LowerOpened, LowerStatus, MockLowerBinding, Submitted,
};
use crate::mux::Mux;
use crate::oid::Oid;
use crate::request::{ForwardedRequest, RequestKind};
use crate::status::StatusIndication;
use crate::upper::{IndicationKind, InitParams, MockUpperEdge};
use crate::vif::VifId;
use crate::config::EngineConfig;
use netmux_types::{MacAddress, Medium, PacketFilter, VlanTag};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

pub(crate) const LINK_SPEED: u32 = 10_000_000;
pub(crate) const LOOKAHEAD: u32 = 256;
pub(crate) const ADAPTER_ADDRESS: MacAddress = MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

pub(crate) fn default_answer(request: &mut ForwardedRequest) -> LowerStatus {
    match (request.kind(), request.oid()) {
        (RequestKind::Query, Oid::LINK_SPEED) => request.respond(&LINK_SPEED.to_le_bytes()),
        (RequestKind::Query, Oid::MAXIMUM_LOOKAHEAD) => request.respond(&LOOKAHEAD.to_le_bytes()),
        (RequestKind::Query, Oid::CURRENT_ADDRESS) => request.respond(ADAPTER_ADDRESS.as_bytes()),
        (RequestKind::Query, Oid::MEDIA_CONNECT_STATUS) => request.respond(&0u32.to_le_bytes()),
        (RequestKind::Query, Oid::PNP_CAPABILITIES) => request.respond(&[0xff; 16]),
        (RequestKind::Query, _) => LowerStatus::NotSupported,
        (RequestKind::Set, _) => request.accept(),
    }
}

fn base<F>(answer: F, sends: bool, cancel: bool) -> MockLowerBinding
where
    F: Fn(&mut ForwardedRequest) -> LowerStatus + Send + 'static,
{
    let mut lower = MockLowerBinding::new();
    lower.expect_open().returning(|_, _| {
        LowerOp::Ready(Ok(LowerOpened {
            handle: LowerHandle(1),
            medium: Medium::Ethernet,
        }))
    });
    lower.expect_close().returning(|_| LowerOp::Ready(Ok(())));
    lower.expect_request().returning(move |_, mut request| {
        let status = answer(&mut request);
        Submitted::Complete(request, status)
    });
    if sends {
        lower
            .expect_send()
            .returning(|_, packet| Submitted::Complete(packet, LowerStatus::Success));
    }
    lower.expect_return_frame().returning(|_, _| ());
    if cancel {
        lower.expect_cancel_sends().returning(|_, _| ());
    }
    lower
}

/// Adapter that completes everything during the call.
pub(crate) fn adapter() -> MockLowerBinding {
    base(default_answer, true, true)
}

/// Like [`adapter`] with a custom request handler.
pub(crate) fn adapter_with<F>(answer: F) -> MockLowerBinding
where
    F: Fn(&mut ForwardedRequest) -> LowerStatus + Send + 'static,
{
    base(answer, true, true)
}

/// Like [`adapter`] but leaves `send` for the test to expect.
pub(crate) fn adapter_without_sends() -> MockLowerBinding {
    base(default_answer, false, true)
}

/// Like [`adapter`] but leaves `cancel_sends` for the test to expect.
pub(crate) fn adapter_without_cancel() -> MockLowerBinding {
    base(default_answer, true, false)
}

pub(crate) fn mux(lower: MockLowerBinding, upper: MockUpperEdge) -> Mux {
    let config = EngineConfig {
        power_drain: crate::config::DrainPolicy::new(200, 1),
        halt_drain: crate::config::DrainPolicy::new(20, 5),
        ..EngineConfig::default()
    };
    Mux::new(config, Arc::new(lower), Arc::new(upper))
}

/// What the upper edge was handed, plus switches for callbacks into the
/// engine.
#[derive(Default)]
pub(crate) struct Recorder {
    mux: Mutex<Weak<Mux>>,
    cancel_instantiation: AtomicBool,
    auto_initialize: AtomicBool,
    auto_halt: AtomicBool,
    instantiated: Mutex<Vec<VifId>>,
    teardowns: Mutex<Vec<VifId>>,
    halted: Mutex<Vec<VifId>>,
    frames: Mutex<Vec<(VifId, DeliveredFrame)>>,
    statuses: Mutex<Vec<(VifId, StatusIndication)>>,
    completions: Mutex<Vec<(VifId, IndicationKind)>>,
    sends: Mutex<Vec<(VifId, u64, MuxResult<()>)>>,
    queries: Mutex<Vec<(VifId, Oid, MuxResult<Vec<u8>>)>>,
    sets: Mutex<Vec<(VifId, Oid, MuxResult<usize>)>>,
}

impl Recorder {
    pub(crate) fn attach(&self, mux: &Arc<Mux>) {
        *self.mux.lock() = Arc::downgrade(mux);
    }

    fn engine(&self) -> Option<Arc<Mux>> {
        self.mux.lock().upgrade()
    }

    pub(crate) fn set_cancel_instantiation(&self, value: bool) {
        self.cancel_instantiation.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_auto_initialize(&self, value: bool) {
        self.auto_initialize.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_auto_halt(&self, value: bool) {
        self.auto_halt.store(value, Ordering::SeqCst);
    }

    pub(crate) fn instantiated(&self) -> Vec<VifId> {
        self.instantiated.lock().clone()
    }

    pub(crate) fn teardowns(&self) -> Vec<VifId> {
        self.teardowns.lock().clone()
    }

    pub(crate) fn halted(&self) -> Vec<VifId> {
        self.halted.lock().clone()
    }

    pub(crate) fn take_frames(&self) -> Vec<(VifId, DeliveredFrame)> {
        std::mem::take(&mut *self.frames.lock())
    }

    pub(crate) fn statuses(&self) -> Vec<(VifId, StatusIndication)> {
        self.statuses.lock().clone()
    }

    pub(crate) fn completions(&self) -> Vec<(VifId, IndicationKind)> {
        self.completions.lock().clone()
    }

    pub(crate) fn sends(&self) -> Vec<(VifId, u64, MuxResult<()>)> {
        self.sends.lock().clone()
    }

    pub(crate) fn queries(&self) -> Vec<(VifId, Oid, MuxResult<Vec<u8>>)> {
        self.queries.lock().clone()
    }

    pub(crate) fn sets(&self) -> Vec<(VifId, Oid, MuxResult<usize>)> {
        self.sets.lock().clone()
    }
}

/// Mock upper edge forwarding every call into `recorder`.
pub(crate) fn upper(recorder: &Arc<Recorder>) -> MockUpperEdge {
    let mut upper = MockUpperEdge::new();

    let r = Arc::clone(recorder);
    upper.expect_instantiate().returning(move |vif, _| {
        r.instantiated.lock().push(vif);
        if r.auto_initialize.load(Ordering::SeqCst) {
            if let Some(mux) = r.engine() {
                mux.initialize_interface(vif, InitParams::default())?;
            }
        }
        Ok(())
    });
    let r = Arc::clone(recorder);
    upper
        .expect_cancel_instantiation()
        .returning(move |_| r.cancel_instantiation.load(Ordering::SeqCst));
    let r = Arc::clone(recorder);
    upper.expect_request_teardown().returning(move |vif| {
        r.teardowns.lock().push(vif);
        if r.auto_halt.load(Ordering::SeqCst) {
            if let Some(mux) = r.engine() {
                mux.on_instance_halt(vif).unwrap();
            }
        }
    });
    let r = Arc::clone(recorder);
    upper
        .expect_halt_acknowledged()
        .returning(move |vif| r.halted.lock().push(vif));
    let r = Arc::clone(recorder);
    upper.expect_deliver_frames().returning(move |vif, frames| {
        let mut store = r.frames.lock();
        store.extend(frames.into_iter().map(|frame| (vif, frame)));
    });
    let r = Arc::clone(recorder);
    upper
        .expect_deliver_status()
        .returning(move |vif, status| r.statuses.lock().push((vif, status)));
    let r = Arc::clone(recorder);
    upper
        .expect_indication_complete()
        .returning(move |vif, kind| r.completions.lock().push((vif, kind)));
    let r = Arc::clone(recorder);
    upper
        .expect_send_complete()
        .returning(move |vif, id, result| r.sends.lock().push((vif, id, result)));
    let r = Arc::clone(recorder);
    upper
        .expect_query_complete()
        .returning(move |vif, oid, result| r.queries.lock().push((vif, oid, result)));
    let r = Arc::clone(recorder);
    upper
        .expect_set_complete()
        .returning(move |vif, oid, result| r.sets.lock().push((vif, oid, result)));
    upper
}

/// Creates an active interface receiving directed, broadcast and listed
/// multicast frames.
pub(crate) fn active_interface(mux: &Mux, binding: BindingId, name: &str, vlan_id: u16) -> VifId {
    let vif = mux.create_interface(binding, name).unwrap();
    mux.initialize_interface(
        vif,
        InitParams {
            vlan_id,
            ..InitParams::default()
        },
    )
    .unwrap();
    let filter = PacketFilter::DIRECTED | PacketFilter::BROADCAST | PacketFilter::MULTICAST;
    mux.set(vif, Oid::CURRENT_PACKET_FILTER, &filter.bits().to_le_bytes())
        .unwrap();
    vif
}

pub(crate) fn frame_to(id: u64, destination: MacAddress, tag: Option<VlanTag>) -> LowerFrame {
    let mut data = destination.as_bytes().to_vec();
    data.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x77]);
    data.extend_from_slice(&0x0800u16.to_be_bytes());
    data.extend_from_slice(&[0xab; 46]);
    if let Some(tag) = tag {
        data = frame::insert_tag(&data, tag);
    }
    LowerFrame::new(id, data)
}

pub(crate) fn broadcast_frame(id: u64, tag: Option<VlanTag>) -> LowerFrame {
    frame_to(id, MacAddress::BROADCAST, tag)
}
