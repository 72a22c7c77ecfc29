//! Interface to the layer that consumes virtual interfaces.

use crate::error::MuxResult;
use crate::frame::DeliveredFrame;
use crate::oid::Oid;
use crate::status::StatusIndication;
use crate::vif::VifId;
use netmux_types::MacAddress;
use serde::{Deserialize, Serialize};

/// Which indication a completion signal closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicationKind {
    /// A batch of delivered frames.
    Receive,
    /// A media status indication.
    Status,
}

/// Per-instance settings the upper layer supplies when it acknowledges
/// instantiation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitParams {
    /// Address override. Used only if unicast and locally administered.
    #[serde(default)]
    pub network_address: Option<MacAddress>,

    /// Configured VLAN id; values above 4094 fall back to 0.
    #[serde(default)]
    pub vlan_id: u16,

    /// Let a passthrough (VLAN 0) interface receive frames tagged with any
    /// VLAN, tag removed and reported as metadata.
    #[serde(default)]
    pub strip_passthrough_tags: bool,
}

/// The upper edge through which virtual interfaces are exposed.
///
/// Calls arrive without any engine lock held, so implementations may call
/// back into the engine.
#[cfg_attr(test, mockall::automock)]
pub trait UpperEdge: Send + Sync {
    /// Requests creation of the instance for `vif`.
    ///
    /// `Ok` means the request was accepted; the instance is acknowledged
    /// later through `Mux::initialize_interface` or refused through
    /// `Mux::instantiation_failed`.
    fn instantiate(&self, vif: VifId, name: &str) -> MuxResult<()>;

    /// Tries to cancel a pending instantiation. Returns true if no
    /// acknowledgment will arrive for `vif` any more.
    fn cancel_instantiation(&self, vif: VifId) -> bool;

    /// Requests teardown of an initialized instance. The upper layer answers
    /// with `Mux::on_instance_halt`.
    fn request_teardown(&self, vif: VifId);

    /// Reports that `vif` finished halting and was unlinked.
    fn halt_acknowledged(&self, vif: VifId);

    /// Delivers a batch of received frames. Frames that carry a ticket must
    /// be handed back through `Mux::return_frame`.
    fn deliver_frames(&self, vif: VifId, frames: Vec<DeliveredFrame>);

    /// Delivers a media status indication.
    fn deliver_status(&self, vif: VifId, status: StatusIndication);

    /// Closes a run of receive or status indications.
    fn indication_complete(&self, vif: VifId, kind: IndicationKind);

    /// Completes a send submitted through `Mux::send`.
    fn send_complete(&self, vif: VifId, send_id: u64, result: MuxResult<()>);

    /// Completes a pended query with the answer bytes.
    fn query_complete(&self, vif: VifId, oid: Oid, result: MuxResult<Vec<u8>>);

    /// Completes a pended set with the number of bytes consumed.
    fn set_complete(&self, vif: VifId, oid: Oid, result: MuxResult<usize>);
}
