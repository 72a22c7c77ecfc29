//! Frame and configuration fixtures.

use netmux_core::{frame, DrainPolicy, EngineConfig, LowerFrame, ReceiveStatus};
use netmux_types::{MacAddress, VlanTag};

/// Source address of every fixture frame.
pub const PEER: MacAddress = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x42]);

/// A multicast group used by the fixtures.
pub const GROUP: MacAddress = MacAddress::new([0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]);

/// Payload length of fixture frames: the Ethernet minimum.
pub const PAYLOAD_LEN: usize = 46;

/// Engine settings with drain budgets short enough for tests.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        power_drain: DrainPolicy::new(100, 2),
        halt_drain: DrainPolicy::new(50, 2),
        ..EngineConfig::default()
    }
}

/// Untagged IPv4 frame from [`PEER`] to `destination`.
pub fn ethernet(destination: MacAddress) -> Vec<u8> {
    let mut data = Vec::with_capacity(frame::ETH_HEADER_SIZE + PAYLOAD_LEN);
    data.extend_from_slice(destination.as_bytes());
    data.extend_from_slice(PEER.as_bytes());
    data.extend_from_slice(&0x0800u16.to_be_bytes());
    data.extend((0..PAYLOAD_LEN).map(|i| i as u8));
    data
}

/// `ethernet(destination)`, tagged when `tag` is given.
pub fn ethernet_tagged(destination: MacAddress, tag: Option<VlanTag>) -> Vec<u8> {
    let data = ethernet(destination);
    match tag {
        Some(tag) => frame::insert_tag(&data, tag),
        None => data,
    }
}

/// A frame as the lower layer indicates it.
pub fn indicated(id: u64, destination: MacAddress, tag: Option<VlanTag>) -> LowerFrame {
    LowerFrame::new(id, ethernet_tagged(destination, tag))
}

pub fn broadcast(id: u64, tag: Option<VlanTag>) -> LowerFrame {
    indicated(id, MacAddress::BROADCAST, tag)
}

/// A frame indicated while the lower layer is short of buffers.
pub fn urgent(frame: LowerFrame) -> LowerFrame {
    frame.with_status(ReceiveStatus::Resources)
}

/// Tag with priority 0 for `vlan_id`.
pub fn vlan(vlan_id: u16) -> Option<VlanTag> {
    Some(VlanTag::new(0, vlan_id))
}
