//! Object identifiers carried by query and set requests.
//!
//! Values follow the NDIS general, Ethernet and power-management object
//! numbering so request buffers map one-to-one onto what a physical adapter
//! driver understands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the object a query or set request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Oid(pub u32);

impl Oid {
    pub const SUPPORTED_LIST: Oid = Oid(0x0001_0101);
    pub const HARDWARE_STATUS: Oid = Oid(0x0001_0102);
    pub const MEDIA_SUPPORTED: Oid = Oid(0x0001_0103);
    pub const MEDIA_IN_USE: Oid = Oid(0x0001_0104);
    pub const MAXIMUM_LOOKAHEAD: Oid = Oid(0x0001_0105);
    pub const MAXIMUM_FRAME_SIZE: Oid = Oid(0x0001_0106);
    pub const LINK_SPEED: Oid = Oid(0x0001_0107);
    pub const TRANSMIT_BLOCK_SIZE: Oid = Oid(0x0001_010a);
    pub const RECEIVE_BLOCK_SIZE: Oid = Oid(0x0001_010b);
    pub const VENDOR_ID: Oid = Oid(0x0001_010c);
    pub const VENDOR_DESCRIPTION: Oid = Oid(0x0001_010d);
    pub const CURRENT_PACKET_FILTER: Oid = Oid(0x0001_010e);
    pub const CURRENT_LOOKAHEAD: Oid = Oid(0x0001_010f);
    pub const DRIVER_VERSION: Oid = Oid(0x0001_0110);
    pub const MAXIMUM_TOTAL_SIZE: Oid = Oid(0x0001_0111);
    pub const MAC_OPTIONS: Oid = Oid(0x0001_0113);
    pub const MEDIA_CONNECT_STATUS: Oid = Oid(0x0001_0114);
    pub const MAXIMUM_SEND_PACKETS: Oid = Oid(0x0001_0115);
    pub const VENDOR_DRIVER_VERSION: Oid = Oid(0x0001_0116);
    pub const SUPPORTED_GUIDS: Oid = Oid(0x0001_0117);
    pub const VLAN_ID: Oid = Oid(0x0001_021c);

    pub const XMIT_OK: Oid = Oid(0x0002_0101);
    pub const RCV_OK: Oid = Oid(0x0002_0102);
    pub const XMIT_ERROR: Oid = Oid(0x0002_0103);
    pub const RCV_ERROR: Oid = Oid(0x0002_0104);
    pub const RCV_NO_BUFFER: Oid = Oid(0x0002_0105);

    pub const PERMANENT_ADDRESS: Oid = Oid(0x0101_0101);
    pub const CURRENT_ADDRESS: Oid = Oid(0x0101_0102);
    pub const MULTICAST_LIST: Oid = Oid(0x0101_0103);
    pub const MAXIMUM_LIST_SIZE: Oid = Oid(0x0101_0104);

    pub const PNP_CAPABILITIES: Oid = Oid(0xfd01_0100);
    pub const PNP_SET_POWER: Oid = Oid(0xfd01_0101);
    pub const PNP_QUERY_POWER: Oid = Oid(0xfd01_0102);
    pub const PNP_ADD_WAKE_UP_PATTERN: Oid = Oid(0xfd01_0103);
    pub const PNP_REMOVE_WAKE_UP_PATTERN: Oid = Oid(0xfd01_0104);
    pub const PNP_WAKE_UP_PATTERN_LIST: Oid = Oid(0xfd01_0105);
    pub const PNP_ENABLE_WAKE_UP: Oid = Oid(0xfd01_0106);

    /// Queries a virtual interface answers itself or forwards, in the order
    /// reported by [`Oid::SUPPORTED_LIST`].
    pub const SUPPORTED: &'static [Oid] = &[
        Oid::SUPPORTED_LIST,
        Oid::HARDWARE_STATUS,
        Oid::MEDIA_SUPPORTED,
        Oid::MEDIA_IN_USE,
        Oid::MAXIMUM_LOOKAHEAD,
        Oid::MAXIMUM_FRAME_SIZE,
        Oid::LINK_SPEED,
        Oid::TRANSMIT_BLOCK_SIZE,
        Oid::RECEIVE_BLOCK_SIZE,
        Oid::VENDOR_ID,
        Oid::VENDOR_DESCRIPTION,
        Oid::CURRENT_PACKET_FILTER,
        Oid::CURRENT_LOOKAHEAD,
        Oid::DRIVER_VERSION,
        Oid::MAXIMUM_TOTAL_SIZE,
        Oid::MAC_OPTIONS,
        Oid::MEDIA_CONNECT_STATUS,
        Oid::MAXIMUM_SEND_PACKETS,
        Oid::VENDOR_DRIVER_VERSION,
        Oid::VLAN_ID,
        Oid::XMIT_OK,
        Oid::RCV_OK,
        Oid::XMIT_ERROR,
        Oid::RCV_ERROR,
        Oid::RCV_NO_BUFFER,
        Oid::PERMANENT_ADDRESS,
        Oid::CURRENT_ADDRESS,
        Oid::MULTICAST_LIST,
        Oid::MAXIMUM_LIST_SIZE,
        Oid::PNP_CAPABILITIES,
        Oid::PNP_SET_POWER,
        Oid::PNP_QUERY_POWER,
        Oid::PNP_ADD_WAKE_UP_PATTERN,
        Oid::PNP_REMOVE_WAKE_UP_PATTERN,
        Oid::PNP_ENABLE_WAKE_UP,
    ];

    pub const fn code(&self) -> u32 {
        self.0
    }

    fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Oid::SUPPORTED_LIST => "supported-list",
            Oid::HARDWARE_STATUS => "hardware-status",
            Oid::MEDIA_SUPPORTED => "media-supported",
            Oid::MEDIA_IN_USE => "media-in-use",
            Oid::MAXIMUM_LOOKAHEAD => "maximum-lookahead",
            Oid::MAXIMUM_FRAME_SIZE => "maximum-frame-size",
            Oid::LINK_SPEED => "link-speed",
            Oid::TRANSMIT_BLOCK_SIZE => "transmit-block-size",
            Oid::RECEIVE_BLOCK_SIZE => "receive-block-size",
            Oid::VENDOR_ID => "vendor-id",
            Oid::VENDOR_DESCRIPTION => "vendor-description",
            Oid::CURRENT_PACKET_FILTER => "current-packet-filter",
            Oid::CURRENT_LOOKAHEAD => "current-lookahead",
            Oid::DRIVER_VERSION => "driver-version",
            Oid::MAXIMUM_TOTAL_SIZE => "maximum-total-size",
            Oid::MAC_OPTIONS => "mac-options",
            Oid::MEDIA_CONNECT_STATUS => "media-connect-status",
            Oid::MAXIMUM_SEND_PACKETS => "maximum-send-packets",
            Oid::VENDOR_DRIVER_VERSION => "vendor-driver-version",
            Oid::SUPPORTED_GUIDS => "supported-guids",
            Oid::VLAN_ID => "vlan-id",
            Oid::XMIT_OK => "xmit-ok",
            Oid::RCV_OK => "rcv-ok",
            Oid::XMIT_ERROR => "xmit-error",
            Oid::RCV_ERROR => "rcv-error",
            Oid::RCV_NO_BUFFER => "rcv-no-buffer",
            Oid::PERMANENT_ADDRESS => "permanent-address",
            Oid::CURRENT_ADDRESS => "current-address",
            Oid::MULTICAST_LIST => "multicast-list",
            Oid::MAXIMUM_LIST_SIZE => "maximum-list-size",
            Oid::PNP_CAPABILITIES => "pnp-capabilities",
            Oid::PNP_SET_POWER => "pnp-set-power",
            Oid::PNP_QUERY_POWER => "pnp-query-power",
            Oid::PNP_ADD_WAKE_UP_PATTERN => "pnp-add-wake-up-pattern",
            Oid::PNP_REMOVE_WAKE_UP_PATTERN => "pnp-remove-wake-up-pattern",
            Oid::PNP_WAKE_UP_PATTERN_LIST => "pnp-wake-up-pattern-list",
            Oid::PNP_ENABLE_WAKE_UP => "pnp-enable-wake-up",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:#010x})", name, self.0),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}
