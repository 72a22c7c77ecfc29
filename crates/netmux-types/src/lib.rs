//! Common types shared by the netmux engine and its collaborators.
//!
//! This crate provides type-safe representations of the link-layer primitives
//! a multiplexed interface deals with:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers, 0 meaning untagged
//! - [`VlanTag`]: decoded 802.1Q tag control information
//! - [`PacketFilter`]: receive filter bits
//! - [`PowerState`] and [`MediaState`]: device power and link status

mod filter;
mod mac;
mod power;
mod vlan;

pub use filter::PacketFilter;
pub use mac::MacAddress;
pub use power::{MediaState, Medium, PowerState};
pub use vlan::{VlanId, VlanTag, TAG_LEN, TPID};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid VLAN ID: {0} (must be 0-4094)")]
    InvalidVlanId(u16),

    #[error("invalid power state: {0}")]
    InvalidPowerState(String),

    #[error("invalid packet filter: {0}")]
    InvalidPacketFilter(String),
}
