//! Receive packet filter bits.

use crate::ParseError;
use std::str::FromStr;

bitflags::bitflags! {
    /// Frame classes a virtual interface asks to receive.
    ///
    /// Bit values follow the NDIS packet type encoding so a filter can be
    /// set straight from a 4-byte request buffer.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct PacketFilter: u32 {
        const DIRECTED = 0x0000_0001;
        const MULTICAST = 0x0000_0002;
        const ALL_MULTICAST = 0x0000_0004;
        const BROADCAST = 0x0000_0008;
        const SOURCE_ROUTING = 0x0000_0010;
        const PROMISCUOUS = 0x0000_0020;
    }
}

impl PacketFilter {
    /// The bits a virtual interface may set.
    pub const SUPPORTED: PacketFilter = PacketFilter::DIRECTED
        .union(PacketFilter::MULTICAST)
        .union(PacketFilter::ALL_MULTICAST)
        .union(PacketFilter::BROADCAST)
        .union(PacketFilter::PROMISCUOUS);

    /// Returns true if receives are enabled at all.
    pub fn is_receiving(&self) -> bool {
        !self.is_empty()
    }
}

impl FromStr for PacketFilter {
    type Err = ParseError;

    /// Parses `"directed|broadcast"` style lists. An empty string or `"none"`
    /// yields the empty filter.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut filter = PacketFilter::empty();
        for part in s.split(['|', ',']).map(str::trim).filter(|p| !p.is_empty()) {
            filter |= match part.to_ascii_lowercase().as_str() {
                "none" => PacketFilter::empty(),
                "directed" => PacketFilter::DIRECTED,
                "multicast" => PacketFilter::MULTICAST,
                "all_multicast" | "allmulti" => PacketFilter::ALL_MULTICAST,
                "broadcast" => PacketFilter::BROADCAST,
                "promiscuous" | "promisc" => PacketFilter::PROMISCUOUS,
                _ => return Err(ParseError::InvalidPacketFilter(part.to_string())),
            };
        }
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_supported_excludes_source_routing() {
        assert!(!PacketFilter::SUPPORTED.contains(PacketFilter::SOURCE_ROUTING));
        assert_eq!(PacketFilter::SUPPORTED.bits(), 0x2f);
    }

    #[test]
    fn test_parse_list() {
        let filter: PacketFilter = "directed|broadcast".parse().unwrap();
        assert_eq!(filter, PacketFilter::DIRECTED | PacketFilter::BROADCAST);

        let none: PacketFilter = "none".parse().unwrap();
        assert!(!none.is_receiving());

        assert!("bogus".parse::<PacketFilter>().is_err());
    }
}
