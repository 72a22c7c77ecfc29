//! Query and set handling on a virtual interface.
//!
//! Most objects are answered from interface state. Link speed, media status
//! and the power-management objects belong to the adapter and are forwarded.

use crate::binding::PhysicalBinding;
use crate::error::{MuxError, MuxResult};
use crate::frame::{ETH_HEADER_SIZE, ETH_MAX_FRAME_SIZE};
use crate::mux::Mux;
use crate::oid::Oid;
use crate::request::{read_u32, RequestKind, RequestOutcome, RequestReply};
use crate::vif::{VifId, VirtualInterface};
use netmux_types::{MacAddress, Medium, PacketFilter, PowerState, VlanId, TAG_LEN};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Vendor code reported for virtual interfaces.
pub const VENDOR_ID: u32 = 0x00ff_ffff;

/// Driver version, major in the high byte.
pub const DRIVER_VERSION: u16 = 0x0001;

const HARDWARE_STATUS_READY: u32 = 0;

const MAC_OPTION_COPY_LOOKAHEAD_DATA: u32 = 0x0000_0001;
const MAC_OPTION_TRANSFERS_NOT_PEND: u32 = 0x0000_0004;
const MAC_OPTION_8021P_PRIORITY: u32 = 0x0000_0040;
const MAC_OPTION_NO_LOOPBACK: u32 = 0x0000_0080;
const MAC_OPTION_8021Q_VLAN: u32 = 0x0000_0200;

/// Largest payload an interface accepts: the tag travels inside the
/// adapter's frame.
const MAX_FRAME_SIZE: u32 = (ETH_MAX_FRAME_SIZE - ETH_HEADER_SIZE - TAG_LEN) as u32;
const MAX_TOTAL_SIZE: u32 = (ETH_MAX_FRAME_SIZE - TAG_LEN) as u32;

enum Answer {
    Local(Vec<u8>),
    Forward,
}

fn u32_bytes(value: u32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

fn saturating_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// 64-bit counters are reported in 32 bits when the caller's buffer only
/// holds that much.
fn counter_bytes(value: u64, buffer_len: usize) -> Vec<u8> {
    if buffer_len >= 8 || buffer_len == 0 {
        value.to_le_bytes().to_vec()
    } else {
        u32_bytes(saturating_u32(value))
    }
}

fn exact_u32(oid: Oid, data: &[u8]) -> MuxResult<u32> {
    if data.len() != 4 {
        return Err(MuxError::InvalidLength {
            expected: 4,
            actual: data.len(),
        });
    }
    read_u32(data).ok_or(MuxError::InvalidData(oid))
}

impl Mux {
    /// Queries `oid` on `vif` with room for `buffer_len` answer bytes.
    ///
    /// # Errors
    ///
    /// - [`MuxError::Busy`] while another query is outstanding
    /// - [`MuxError::InvalidOid`] for objects the interface does not know
    /// - [`MuxError::BufferTooShort`] with the size the answer needs
    #[instrument(skip(self))]
    pub fn query(&self, vif: VifId, oid: Oid, buffer_len: usize) -> MuxResult<RequestOutcome> {
        let (binding, iface) = self.lookup_interface(vif)?;
        self.ensure_slot_free(&iface, RequestKind::Query)?;

        match self.answer_query(&binding, &iface, oid, buffer_len)? {
            Answer::Forward => self.forward(vif, RequestKind::Query, oid, vec![0; buffer_len]),
            Answer::Local(data) if data.len() > buffer_len => {
                Err(MuxError::BufferTooShort { needed: data.len() })
            }
            Answer::Local(data) => Ok(RequestOutcome::Complete(RequestReply::answered(oid, data))),
        }
    }

    /// Sets `oid` on `vif` to `data`.
    ///
    /// # Errors
    ///
    /// - [`MuxError::Busy`] while another set is outstanding
    /// - [`MuxError::InvalidLength`] for a payload of the wrong size
    /// - [`MuxError::NotSupported`] for filter bits the engine does not handle
    /// - [`MuxError::MulticastFull`] when the list exceeds the maximum
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn set(&self, vif: VifId, oid: Oid, data: &[u8]) -> MuxResult<RequestOutcome> {
        let (binding, iface) = self.lookup_interface(vif)?;
        self.ensure_slot_free(&iface, RequestKind::Set)?;

        match oid {
            Oid::PNP_ADD_WAKE_UP_PATTERN
            | Oid::PNP_REMOVE_WAKE_UP_PATTERN
            | Oid::PNP_ENABLE_WAKE_UP => self.forward(vif, RequestKind::Set, oid, data.to_vec()),
            Oid::CURRENT_LOOKAHEAD => {
                // The adapter has to look far enough to see the tag as well.
                let lookahead = exact_u32(oid, data)?.saturating_add(TAG_LEN as u32);
                self.forward(vif, RequestKind::Set, oid, u32_bytes(lookahead))
            }
            Oid::PNP_SET_POWER => {
                let code = exact_u32(oid, data)?;
                let state = PowerState::from_code(code).ok_or(MuxError::InvalidData(oid))?;
                self.change_interface_power(&iface, state);
                Ok(set_done(oid, data))
            }
            Oid::MULTICAST_LIST => {
                self.set_multicast_list(&iface, data)?;
                Ok(set_done(oid, data))
            }
            Oid::CURRENT_PACKET_FILTER => {
                let bits = exact_u32(oid, data)?;
                let filter = PacketFilter::from_bits(bits)
                    .filter(|f| PacketFilter::SUPPORTED.contains(*f))
                    .ok_or_else(|| {
                        MuxError::NotSupported(format!("packet filter {:#x}", bits))
                    })?;
                self.apply_packet_filter(&binding, &iface, filter);
                Ok(set_done(oid, data))
            }
            Oid::VLAN_ID => {
                let id = exact_u32(oid, data)?;
                let vlan = u16::try_from(id)
                    .ok()
                    .and_then(|id| VlanId::new(id).ok())
                    .ok_or(MuxError::InvalidData(oid))?;
                iface.addressing.write().vlan_id = vlan;
                debug!(interface = iface.name(), vlan_id = %vlan, "VLAN id changed");
                Ok(set_done(oid, data))
            }
            _ => Err(MuxError::InvalidOid(oid)),
        }
    }

    fn ensure_slot_free(&self, iface: &VirtualInterface, kind: RequestKind) -> MuxResult<()> {
        if iface.shared.lock().slots.get(kind).is_empty() {
            Ok(())
        } else {
            Err(MuxError::Busy {
                interface: iface.name().to_string(),
                kind,
            })
        }
    }

    fn answer_query(
        &self,
        binding: &PhysicalBinding,
        iface: &VirtualInterface,
        oid: Oid,
        buffer_len: usize,
    ) -> MuxResult<Answer> {
        let lookahead = iface.link_props().lookahead.saturating_sub(ETH_HEADER_SIZE as u32);
        let stats = iface.counters.snapshot();

        let data = match oid {
            Oid::SUPPORTED_LIST => Oid::SUPPORTED
                .iter()
                .flat_map(|oid| oid.code().to_le_bytes())
                .collect(),
            Oid::HARDWARE_STATUS => u32_bytes(HARDWARE_STATUS_READY),
            Oid::MEDIA_SUPPORTED | Oid::MEDIA_IN_USE => u32_bytes(Medium::Ethernet.code()),
            Oid::MAXIMUM_LOOKAHEAD | Oid::CURRENT_LOOKAHEAD => u32_bytes(lookahead),
            Oid::MAXIMUM_FRAME_SIZE => u32_bytes(MAX_FRAME_SIZE),
            Oid::MAXIMUM_TOTAL_SIZE
            | Oid::TRANSMIT_BLOCK_SIZE
            | Oid::RECEIVE_BLOCK_SIZE => u32_bytes(MAX_TOTAL_SIZE),
            Oid::MAC_OPTIONS => u32_bytes(
                MAC_OPTION_COPY_LOOKAHEAD_DATA
                    | MAC_OPTION_TRANSFERS_NOT_PEND
                    | MAC_OPTION_NO_LOOPBACK
                    | MAC_OPTION_8021P_PRIORITY
                    | MAC_OPTION_8021Q_VLAN,
            ),
            Oid::VENDOR_ID | Oid::VENDOR_DRIVER_VERSION => u32_bytes(VENDOR_ID),
            Oid::VENDOR_DESCRIPTION => {
                let mut description = self.config.vendor_description.clone().into_bytes();
                description.push(0);
                description
            }
            Oid::DRIVER_VERSION => DRIVER_VERSION.to_le_bytes().to_vec(),
            Oid::CURRENT_PACKET_FILTER => u32_bytes(iface.packet_filter().bits()),
            Oid::PERMANENT_ADDRESS => iface.addressing.read().permanent.as_bytes().to_vec(),
            Oid::CURRENT_ADDRESS => iface.current_address().as_bytes().to_vec(),
            Oid::MULTICAST_LIST => iface
                .rx_filter
                .read()
                .multicast
                .iter()
                .flat_map(|address| *address.as_bytes())
                .collect(),
            Oid::MAXIMUM_LIST_SIZE => u32_bytes(saturating_u32(self.config.max_multicast_list as u64)),
            Oid::MAXIMUM_SEND_PACKETS => u32_bytes(self.config.max_send_packets),
            Oid::XMIT_OK => counter_bytes(stats.good_transmits, buffer_len),
            Oid::RCV_OK => counter_bytes(stats.good_receives, buffer_len),
            Oid::XMIT_ERROR => u32_bytes(saturating_u32(stats.transmit_failures)),
            Oid::RCV_ERROR => u32_bytes(saturating_u32(stats.receive_errors())),
            Oid::RCV_NO_BUFFER => u32_bytes(saturating_u32(stats.receive_resource_errors)),
            Oid::VLAN_ID => u32_bytes(u32::from(iface.vlan_id().as_u16())),
            Oid::PNP_QUERY_POWER => Vec::new(),
            Oid::LINK_SPEED
            | Oid::MEDIA_CONNECT_STATUS
            | Oid::PNP_CAPABILITIES
            | Oid::PNP_WAKE_UP_PATTERN_LIST => return Ok(Answer::Forward),
            Oid::SUPPORTED_GUIDS => {
                return Err(MuxError::NotSupported(oid.to_string()));
            }
            _ => {
                debug!(binding = %binding.id(), %oid, "unknown query");
                return Err(MuxError::InvalidOid(oid));
            }
        };
        Ok(Answer::Local(data))
    }

    /// Replaces the multicast set of an interface.
    fn set_multicast_list(&self, iface: &VirtualInterface, data: &[u8]) -> MuxResult<()> {
        if data.len() % MacAddress::LEN != 0 {
            return Err(MuxError::InvalidLength {
                expected: (data.len() / MacAddress::LEN + 1) * MacAddress::LEN,
                actual: data.len(),
            });
        }
        let limit = self.config.max_multicast_list * MacAddress::LEN;
        if data.len() > limit {
            return Err(MuxError::MulticastFull { needed: limit });
        }
        let addresses: Vec<MacAddress> = data
            .chunks_exact(MacAddress::LEN)
            .filter_map(MacAddress::from_slice)
            .collect();
        debug!(interface = iface.name(), count = addresses.len(), "multicast list replaced");
        iface.rx_filter.write().multicast = addresses;
        Ok(())
    }

    /// Stores the interface filter and recomputes the binding filter from
    /// the union of all interfaces. The adapter runs promiscuous while any
    /// interface wants traffic and with an empty filter otherwise.
    pub(crate) fn apply_packet_filter(
        &self,
        binding: &Arc<PhysicalBinding>,
        iface: &VirtualInterface,
        filter: PacketFilter,
    ) {
        let push = {
            let arena = binding.interfaces.write();
            iface.rx_filter.write().packet_filter = filter;
            let union = arena
                .iter()
                .fold(PacketFilter::empty(), |acc, i| acc | i.packet_filter());

            let mut current = binding.packet_filter.lock();
            if union.is_empty() && !current.is_empty() {
                *current = PacketFilter::empty();
                Some(*current)
            } else if !union.is_empty() && current.is_empty() {
                *current = PacketFilter::PROMISCUOUS;
                Some(*current)
            } else {
                None
            }
        };

        debug!(interface = iface.name(), filter = ?filter, "packet filter set");
        if let Some(adapter_filter) = push {
            debug!(binding = %binding.id(), filter = ?adapter_filter, "changing adapter packet filter");
            self.request_detached(
                binding,
                RequestKind::Set,
                Oid::CURRENT_PACKET_FILTER,
                u32_bytes(adapter_filter.bits()),
            );
        }
    }
}

fn set_done(oid: Oid, data: &[u8]) -> RequestOutcome {
    RequestOutcome::Complete(RequestReply::consumed(oid, data.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Recorder};
    use crate::upper::InitParams;
    use pretty_assertions::assert_eq;

    fn setup() -> (Arc<Recorder>, Mux, VifId) {
        let recorder = Arc::new(Recorder::default());
        let mux = testing::mux(testing::adapter(), testing::upper(&recorder));
        let binding = mux.open("eth0").unwrap();
        let vif = mux.create_interface(binding, "vlan5").unwrap();
        mux.initialize_interface(
            vif,
            InitParams {
                vlan_id: 5,
                ..InitParams::default()
            },
        )
        .unwrap();
        (recorder, mux, vif)
    }

    fn local(outcome: RequestOutcome) -> Vec<u8> {
        match outcome {
            RequestOutcome::Complete(reply) => reply.data,
            RequestOutcome::Pending => panic!("expected a local answer"),
        }
    }

    #[test]
    fn test_local_answers() {
        let (_, mux, vif) = setup();
        let lookahead = testing::LOOKAHEAD - ETH_HEADER_SIZE as u32;
        assert_eq!(
            local(mux.query(vif, Oid::CURRENT_LOOKAHEAD, 4).unwrap()),
            lookahead.to_le_bytes().to_vec()
        );
        assert_eq!(
            local(mux.query(vif, Oid::MAXIMUM_FRAME_SIZE, 4).unwrap()),
            1496u32.to_le_bytes().to_vec()
        );
        assert_eq!(
            local(mux.query(vif, Oid::TRANSMIT_BLOCK_SIZE, 4).unwrap()),
            1510u32.to_le_bytes().to_vec()
        );
        assert_eq!(
            local(mux.query(vif, Oid::VLAN_ID, 4).unwrap()),
            5u32.to_le_bytes().to_vec()
        );
        assert_eq!(
            local(mux.query(vif, Oid::CURRENT_ADDRESS, 6).unwrap()),
            MacAddress::for_virtual_interface(0).as_bytes().to_vec()
        );
        let supported = local(mux.query(vif, Oid::SUPPORTED_LIST, 1024).unwrap());
        assert_eq!(supported.len(), Oid::SUPPORTED.len() * 4);
    }

    #[test]
    fn test_counter_width_follows_buffer() {
        let (_, mux, vif) = setup();
        assert_eq!(local(mux.query(vif, Oid::RCV_OK, 8).unwrap()).len(), 8);
        assert_eq!(local(mux.query(vif, Oid::RCV_OK, 4).unwrap()).len(), 4);
        assert!(matches!(
            mux.query(vif, Oid::RCV_OK, 0),
            Err(MuxError::BufferTooShort { needed: 8 })
        ));
    }

    #[test]
    fn test_query_errors() {
        let (_, mux, vif) = setup();
        assert!(matches!(
            mux.query(vif, Oid::CURRENT_ADDRESS, 4),
            Err(MuxError::BufferTooShort { needed: 6 })
        ));
        assert!(matches!(
            mux.query(vif, Oid::SUPPORTED_GUIDS, 64),
            Err(MuxError::NotSupported(_))
        ));
        assert_eq!(
            mux.query(vif, Oid(0x0deadbee), 4),
            Err(MuxError::InvalidOid(Oid(0x0deadbee)))
        );
    }

    #[test]
    fn test_forwarded_query_relays_and_caches_link_speed() {
        let (recorder, mux, vif) = setup();
        assert_eq!(
            mux.query(vif, Oid::LINK_SPEED, 4).unwrap(),
            RequestOutcome::Pending
        );
        let queries = recorder.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(
            queries[0],
            (vif, Oid::LINK_SPEED, Ok(testing::LINK_SPEED.to_le_bytes().to_vec()))
        );
        assert_eq!(mux.interface_info(vif).unwrap().link_speed, testing::LINK_SPEED);
    }

    #[test]
    fn test_pnp_capabilities_minimums_are_masked() {
        let (recorder, mux, vif) = setup();
        mux.query(vif, Oid::PNP_CAPABILITIES, 16).unwrap();
        let (_, _, result) = recorder.queries().remove(0);
        let data = result.unwrap();
        assert_eq!(&data[..4], &[0xff; 4]);
        assert_eq!(&data[4..], &[0; 12]);
    }

    #[test]
    fn test_set_lookahead_adds_tag_and_caches() {
        let (recorder, mux, vif) = setup();
        mux.set(vif, Oid::CURRENT_LOOKAHEAD, &200u32.to_le_bytes())
            .unwrap();
        assert_eq!(recorder.sets(), vec![(vif, Oid::CURRENT_LOOKAHEAD, Ok(4))]);
        assert_eq!(mux.interface_info(vif).unwrap().lookahead, 204);
    }

    #[test]
    fn test_set_validation() {
        let (_, mux, vif) = setup();
        assert_eq!(
            mux.set(vif, Oid::CURRENT_PACKET_FILTER, &[1, 0]),
            Err(MuxError::InvalidLength {
                expected: 4,
                actual: 2
            })
        );
        assert!(matches!(
            mux.set(vif, Oid::CURRENT_PACKET_FILTER, &0x10u32.to_le_bytes()),
            Err(MuxError::NotSupported(_))
        ));
        assert_eq!(
            mux.set(vif, Oid::VLAN_ID, &4095u32.to_le_bytes()),
            Err(MuxError::InvalidData(Oid::VLAN_ID))
        );
        assert!(matches!(
            mux.set(vif, Oid::MULTICAST_LIST, &[1, 2, 3]),
            Err(MuxError::InvalidLength { .. })
        ));
        let too_many = vec![0x01; (mux.config().max_multicast_list + 1) * 6];
        assert_eq!(
            mux.set(vif, Oid::MULTICAST_LIST, &too_many),
            Err(MuxError::MulticastFull {
                needed: mux.config().max_multicast_list * 6
            })
        );
        assert_eq!(
            mux.set(vif, Oid::PNP_SET_POWER, &[1, 0, 0]),
            Err(MuxError::InvalidLength {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(
            mux.set(vif, Oid::MAXIMUM_FRAME_SIZE, &[0; 4]),
            Err(MuxError::InvalidOid(Oid::MAXIMUM_FRAME_SIZE))
        );
    }

    #[test]
    fn test_packet_filter_drives_binding_filter() {
        let (_, mux, vif) = setup();
        let binding = vif.binding;
        assert!(mux.binding_info(binding).unwrap().packet_filter.is_empty());

        let filter = PacketFilter::DIRECTED | PacketFilter::BROADCAST;
        mux.set(vif, Oid::CURRENT_PACKET_FILTER, &filter.bits().to_le_bytes())
            .unwrap();
        assert_eq!(mux.interface_info(vif).unwrap().packet_filter, filter);
        assert_eq!(
            mux.binding_info(binding).unwrap().packet_filter,
            PacketFilter::PROMISCUOUS
        );

        mux.set(vif, Oid::CURRENT_PACKET_FILTER, &0u32.to_le_bytes())
            .unwrap();
        assert!(mux.binding_info(binding).unwrap().packet_filter.is_empty());
    }

    #[test]
    fn test_set_vlan_and_multicast() {
        let (_, mux, vif) = setup();
        mux.set(vif, Oid::VLAN_ID, &9u32.to_le_bytes()).unwrap();
        assert_eq!(mux.interface_info(vif).unwrap().vlan_id, 9);

        let group = [0x01, 0x00, 0x5e, 0x00, 0x00, 0x01];
        mux.set(vif, Oid::MULTICAST_LIST, &group).unwrap();
        assert_eq!(
            local(mux.query(vif, Oid::MULTICAST_LIST, 64).unwrap()),
            group.to_vec()
        );
    }
}
