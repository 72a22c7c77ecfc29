//! Ethernet frame helpers and the frame objects exchanged with the upper and
//! lower layers.

use crate::binding::PhysicalBinding;
use crate::error::{MuxError, MuxResult};
use crate::lower::LowerFrameId;
use crate::vif::{VifId, VirtualInterface};
use netmux_types::{MacAddress, VlanId, VlanTag, TAG_LEN, TPID};
use std::fmt;
use std::sync::Arc;

/// Destination, source and EtherType.
pub const ETH_HEADER_SIZE: usize = 14;

/// Largest untagged Ethernet frame without FCS.
pub const ETH_MAX_FRAME_SIZE: usize = 1514;

const ADDRESSES_LEN: usize = 2 * MacAddress::LEN;

/// Destination address of a frame, if the frame is long enough to carry one.
pub fn destination(frame: &[u8]) -> Option<MacAddress> {
    MacAddress::from_slice(frame)
}

/// Source address of a frame.
pub fn source(frame: &[u8]) -> Option<MacAddress> {
    MacAddress::from_slice(frame.get(MacAddress::LEN..)?)
}

/// Decodes the 802.1Q tag following the MAC addresses, if there is one.
pub fn read_tag(frame: &[u8]) -> Option<VlanTag> {
    let tpid = frame.get(ADDRESSES_LEN..ADDRESSES_LEN + 2)?;
    if u16::from_be_bytes([tpid[0], tpid[1]]) != TPID {
        return None;
    }
    let tci = frame.get(ADDRESSES_LEN + 2..ADDRESSES_LEN + TAG_LEN)?;
    Some(VlanTag::from_tci(u16::from_be_bytes([tci[0], tci[1]])))
}

/// Removes the tag in place by moving both MAC addresses forward over it.
pub fn strip_tag(frame: &mut Vec<u8>) -> Option<VlanTag> {
    let tag = read_tag(frame)?;
    frame.copy_within(..ADDRESSES_LEN, TAG_LEN);
    frame.drain(..TAG_LEN);
    Some(tag)
}

/// Builds a copy of `frame` with `tag` inserted after the MAC addresses.
pub fn insert_tag(frame: &[u8], tag: VlanTag) -> Vec<u8> {
    let mut tagged = Vec::with_capacity(frame.len() + TAG_LEN);
    tagged.extend_from_slice(&frame[..ADDRESSES_LEN.min(frame.len())]);
    tagged.extend_from_slice(&TPID.to_be_bytes());
    tagged.extend_from_slice(&tag.tci().to_be_bytes());
    if frame.len() > ADDRESSES_LEN {
        tagged.extend_from_slice(&frame[ADDRESSES_LEN..]);
    }
    tagged
}

/// Prepares an outgoing frame for an interface configured with `vlan_id`.
///
/// Returns the frame to put on the wire and whether a tag was inserted.
/// Passthrough interfaces send frames untouched.
pub(crate) fn tag_for_send(
    data: Vec<u8>,
    meta: Option<VlanTag>,
    vlan_id: VlanId,
) -> MuxResult<(Vec<u8>, bool)> {
    if vlan_id.is_untagged() {
        return Ok((data, false));
    }

    let meta = meta.unwrap_or_default();
    if meta.canonical_format {
        return Err(MuxError::protocol("canonical format tags are not supported"));
    }
    if meta.vlan_id != 0 && meta.vlan_id != vlan_id.as_u16() {
        return Err(MuxError::protocol(format!(
            "packet tagged for VLAN {} on an interface configured for VLAN {}",
            meta.vlan_id, vlan_id
        )));
    }
    if data.len() < ETH_HEADER_SIZE {
        return Err(MuxError::protocol(format!(
            "{} byte frame is shorter than an Ethernet header",
            data.len()
        )));
    }

    let id = if meta.vlan_id != 0 {
        meta.vlan_id
    } else {
        vlan_id.as_u16()
    };
    Ok((insert_tag(&data, VlanTag::new(meta.priority, id)), true))
}

/// Obligation to hand a retained frame back to the engine.
///
/// Dropping a ticket without passing it to `Mux::return_frame` leaks the
/// lower frame and keeps the interface from draining.
pub struct ReturnTicket {
    pub(crate) binding: Arc<PhysicalBinding>,
    pub(crate) vif: Arc<VirtualInterface>,
    pub(crate) frame: LowerFrameId,
}

impl ReturnTicket {
    /// The interface the frame was delivered to.
    pub fn vif(&self) -> VifId {
        self.vif.id()
    }

    /// The lower frame this delivery came from.
    pub fn lower_frame(&self) -> LowerFrameId {
        self.frame
    }
}

impl fmt::Debug for ReturnTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnTicket")
            .field("vif", &self.vif.id())
            .field("frame", &self.frame)
            .finish()
    }
}

/// A frame handed to the upper layer.
#[derive(Debug)]
pub struct DeliveredFrame {
    /// Frame bytes, with any VLAN tag already removed.
    pub data: Vec<u8>,
    /// Priority and VLAN id from the removed tag.
    pub vlan: Option<VlanTag>,
    /// Present when the upper layer has to return the frame.
    pub ticket: Option<ReturnTicket>,
}

impl DeliveredFrame {
    /// Takes the return obligation out of the frame.
    pub fn take_ticket(&mut self) -> Option<ReturnTicket> {
        self.ticket.take()
    }
}

/// A frame the upper layer asks to transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// Caller cookie echoed in `send_complete`.
    pub id: u64,
    pub data: Vec<u8>,
    /// Per-packet priority/VLAN metadata.
    pub vlan: Option<VlanTag>,
    /// Groups sends for `Mux::cancel_sends`.
    pub cancel_id: Option<u64>,
}

impl SendRequest {
    pub fn new(id: u64, data: Vec<u8>) -> Self {
        Self {
            id,
            data,
            vlan: None,
            cancel_id: None,
        }
    }

    pub fn with_vlan(mut self, tag: VlanTag) -> Self {
        self.vlan = Some(tag);
        self
    }
}

/// A frame in flight to the lower layer.
pub struct SendPacket {
    pub(crate) id: u64,
    pub(crate) cancel_id: Option<u64>,
    pub(crate) frame: Vec<u8>,
    pub(crate) tagged: bool,
    pub(crate) binding: Arc<PhysicalBinding>,
    pub(crate) vif: Arc<VirtualInterface>,
}

impl SendPacket {
    /// Bytes to transmit.
    pub fn data(&self) -> &[u8] {
        &self.frame
    }

    /// The caller cookie of the original send.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel_id(&self) -> Option<u64> {
        self.cancel_id
    }

    /// Returns true if the engine inserted a VLAN tag.
    pub fn is_tagged(&self) -> bool {
        self.tagged
    }

    /// The sending interface.
    pub fn vif(&self) -> VifId {
        self.vif.id()
    }
}

impl fmt::Debug for SendPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendPacket")
            .field("id", &self.id)
            .field("vif", &self.vif.id())
            .field("len", &self.frame.len())
            .field("tagged", &self.tagged)
            .finish()
    }
}
