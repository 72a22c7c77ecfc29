//! IEEE 802.1Q VLAN identifiers and tag control information.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tag protocol identifier found in the EtherType position of a tagged frame.
pub const TPID: u16 = 0x8100;

/// Size of the tag header inserted after the two MAC addresses.
pub const TAG_LEN: usize = 4;

/// IEEE 802.1Q VLAN identifier as configured on a virtual interface.
///
/// VLAN 0 means the interface does no tag processing (passthrough).
/// VLAN 4095 is reserved and rejected.
///
/// # Examples
///
/// ```
/// use netmux_types::VlanId;
///
/// let vlan = VlanId::new(100).unwrap();
/// assert_eq!(vlan.as_u16(), 100);
/// assert!(VlanId::UNTAGGED.is_untagged());
/// assert!(VlanId::new(4095).is_err());
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    /// Maximum assignable VLAN ID.
    pub const MAX: u16 = 4094;

    /// No tagging.
    pub const UNTAGGED: VlanId = VlanId(0);

    /// Creates a new VLAN ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the VLAN ID is above 4094.
    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id <= Self::MAX {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id))
        }
    }

    /// Returns the VLAN ID as a u16.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns true for the passthrough id 0.
    pub const fn is_untagged(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept "Vlan100" as well as "100"
        let id_str = if s.to_lowercase().starts_with("vlan") {
            &s[4..]
        } else {
            s
        };

        let id: u16 = id_str
            .parse()
            .map_err(|_| ParseError::InvalidVlanId(u16::MAX))?;

        VlanId::new(id)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

/// Decoded tag control information of an 802.1Q header.
///
/// The raw 12-bit id is kept as received, so a tag may carry values that
/// [`VlanId`] would refuse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VlanTag {
    /// User priority, 0-7.
    pub priority: u8,
    /// Canonical format indicator. Frames with this bit set are not handled.
    pub canonical_format: bool,
    /// 12-bit VLAN id, 0 for priority-only tags.
    pub vlan_id: u16,
}

impl VlanTag {
    /// Builds a tag with the given priority and id and the CFI bit clear.
    pub const fn new(priority: u8, vlan_id: u16) -> Self {
        VlanTag {
            priority: priority & 0x07,
            canonical_format: false,
            vlan_id: vlan_id & 0x0fff,
        }
    }

    /// Decodes a host-order TCI value.
    pub const fn from_tci(tci: u16) -> Self {
        VlanTag {
            priority: (tci >> 13) as u8,
            canonical_format: tci & 0x1000 != 0,
            vlan_id: tci & 0x0fff,
        }
    }

    /// Encodes the tag into a host-order TCI value.
    pub const fn tci(&self) -> u16 {
        ((self.priority as u16 & 0x07) << 13)
            | if self.canonical_format { 0x1000 } else { 0 }
            | (self.vlan_id & 0x0fff)
    }

    /// Returns true when the tag carries priority only.
    pub const fn is_priority_only(&self) -> bool {
        self.vlan_id == 0
    }
}
