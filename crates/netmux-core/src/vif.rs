//! Virtual interfaces multiplexed over a binding.

use crate::binding::{BindingId, PhysicalBinding};
use crate::config::EngineConfig;
use crate::lifetime::{Event, Outstanding, RefCount, RefSnapshot};
use crate::receive::PendingReceive;
use crate::request::RequestSlots;
use crate::stats::VifCounters;
use crate::status::StatusCode;
use crate::upper::InitParams;
use netmux_types::{MacAddress, PacketFilter, PowerState, VlanId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::warn;

/// Generation-checked handle of a virtual interface.
///
/// The slot of a removed interface is reused with a new generation, so a
/// stale handle never resolves to a newer interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VifId {
    pub binding: BindingId,
    pub slot: u32,
    pub generation: u32,
}

impl fmt::Display for VifId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/vif{}.{}", self.binding, self.slot, self.generation)
    }
}

/// Lifecycle of a virtual interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VifState {
    Created,
    InitPending,
    Active,
    Halting,
    Destroyed,
}

impl VifState {
    pub fn can_transition_to(&self, next: VifState) -> bool {
        use VifState::*;
        matches!(
            (self, next),
            (Created, InitPending)
                | (Created, Destroyed)
                | (InitPending, Active)
                | (InitPending, Destroyed)
                | (Active, Halting)
                | (Halting, Destroyed)
        )
    }
}

impl fmt::Display for VifState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VifState::Created => "created",
            VifState::InitPending => "init-pending",
            VifState::Active => "active",
            VifState::Halting => "halting",
            VifState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub(crate) struct Addressing {
    pub(crate) permanent: MacAddress,
    pub(crate) current: MacAddress,
    pub(crate) vlan_id: VlanId,
    pub(crate) strip_passthrough_tags: bool,
}

#[derive(Debug, Default)]
pub(crate) struct RxFilter {
    pub(crate) packet_filter: PacketFilter,
    pub(crate) multicast: Vec<MacAddress>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LinkProps {
    pub(crate) link_speed: u32,
    pub(crate) lookahead: u32,
}

#[derive(Debug)]
pub(crate) struct PowerTrack {
    pub(crate) state: PowerState,
    pub(crate) last_indicated: StatusCode,
    pub(crate) latest_unindicated: StatusCode,
}

/// State touched by both the data path and request completions. Never held
/// across a call into the lower or upper layer.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) slots: RequestSlots,
    pub(crate) rx_queue: Vec<PendingReceive>,
    pub(crate) receive_complete_pending: bool,
    pub(crate) status_complete_pending: bool,
}

/// One virtual interface.
#[derive(Debug)]
pub struct VirtualInterface {
    id: VifId,
    name: String,
    number: u32,
    binding: RwLock<Weak<PhysicalBinding>>,
    state: Mutex<VifState>,
    stopping: AtomicBool,
    pub(crate) init_done: Event<()>,
    pub(crate) refs: RefCount,
    pub(crate) sends: Outstanding,
    pub(crate) receives: Outstanding,
    pub(crate) addressing: RwLock<Addressing>,
    pub(crate) rx_filter: RwLock<RxFilter>,
    link: Mutex<LinkProps>,
    pub(crate) power: Mutex<PowerTrack>,
    pub(crate) shared: Mutex<Shared>,
    pub(crate) counters: VifCounters,
}

impl VirtualInterface {
    pub(crate) fn new(
        id: VifId,
        name: &str,
        number: u32,
        binding: &Arc<PhysicalBinding>,
        config: &EngineConfig,
    ) -> Self {
        let link = binding.link_props();
        let generated = MacAddress::for_virtual_interface(number);
        Self {
            id,
            name: name.to_string(),
            number,
            binding: RwLock::new(Arc::downgrade(binding)),
            state: Mutex::new(VifState::Created),
            stopping: AtomicBool::new(false),
            init_done: Event::new(),
            refs: RefCount::new(name),
            sends: Outstanding::new(),
            receives: Outstanding::new(),
            addressing: RwLock::new(Addressing {
                permanent: generated,
                current: generated,
                vlan_id: VlanId::UNTAGGED,
                strip_passthrough_tags: false,
            }),
            rx_filter: RwLock::new(RxFilter {
                packet_filter: PacketFilter::empty(),
                multicast: Vec::with_capacity(config.max_multicast_list),
            }),
            link: Mutex::new(link),
            power: Mutex::new(PowerTrack {
                state: PowerState::D0,
                last_indicated: StatusCode::MediaConnect,
                latest_unindicated: StatusCode::MediaConnect,
            }),
            shared: Mutex::new(Shared {
                rx_queue: Vec::with_capacity(config.rx_batch_capacity),
                ..Shared::default()
            }),
            counters: VifCounters::default(),
        }
    }

    pub fn id(&self) -> VifId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn state(&self) -> VifState {
        *self.state.lock()
    }

    /// Moves to `next` if the lifecycle allows it. Returns the previous
    /// state on success.
    pub(crate) fn transition(&self, next: VifState) -> Result<VifState, VifState> {
        let mut state = self.state.lock();
        let current = *state;
        if !current.can_transition_to(next) {
            return Err(current);
        }
        *state = next;
        Ok(current)
    }

    /// Final state after unlinking, whatever the interface was doing.
    pub(crate) fn mark_destroyed(&self) -> VifState {
        std::mem::replace(&mut *self.state.lock(), VifState::Destroyed)
    }

    pub(crate) fn binding(&self) -> Option<Arc<PhysicalBinding>> {
        self.binding.read().upgrade()
    }

    pub(crate) fn detach_binding(&self) -> Option<Arc<PhysicalBinding>> {
        std::mem::take(&mut *self.binding.write()).upgrade()
    }

    /// Marks the interface stopping. Returns true for the first caller only.
    pub(crate) fn begin_stop(&self) -> bool {
        !self.stopping.swap(true, Ordering::AcqRel)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn power_state(&self) -> PowerState {
        self.power.lock().state
    }

    /// Reference totals over the whole life of the interface.
    pub fn references(&self) -> RefSnapshot {
        self.refs.snapshot()
    }

    /// True while frames may be queued for the interface.
    pub(crate) fn can_receive(&self) -> bool {
        !self.is_stopping() && self.state() == VifState::Active && !self.power_state().is_low_power()
    }

    /// Applies the receive filter to a destination address.
    pub(crate) fn matches_destination(&self, destination: &MacAddress) -> bool {
        let filter = self.rx_filter.read();
        let bits = filter.packet_filter;
        if bits.contains(PacketFilter::PROMISCUOUS) {
            return true;
        }
        if destination.is_broadcast() {
            return bits.contains(PacketFilter::BROADCAST);
        }
        if destination.is_multicast() {
            return bits.contains(PacketFilter::ALL_MULTICAST)
                || (bits.contains(PacketFilter::MULTICAST)
                    && filter.multicast.contains(destination));
        }
        bits.contains(PacketFilter::DIRECTED) && *destination == self.addressing.read().current
    }

    /// Applies the settings supplied when the upper layer acknowledged the
    /// instance.
    pub(crate) fn apply_init(&self, params: &InitParams) {
        let mut addressing = self.addressing.write();
        match params.network_address {
            Some(address) if address.is_unicast() && address.is_local() => {
                addressing.current = address;
            }
            Some(address) => {
                warn!(interface = %self.name, %address, "ignoring network address override, not a locally administered unicast address");
            }
            None => {}
        }
        addressing.vlan_id = VlanId::new(params.vlan_id).unwrap_or_else(|_| {
            warn!(interface = %self.name, vlan_id = params.vlan_id, "VLAN id out of range, using 0");
            VlanId::UNTAGGED
        });
        addressing.strip_passthrough_tags = params.strip_passthrough_tags;
    }

    pub fn vlan_id(&self) -> VlanId {
        self.addressing.read().vlan_id
    }

    pub fn current_address(&self) -> MacAddress {
        self.addressing.read().current
    }

    pub fn packet_filter(&self) -> PacketFilter {
        self.rx_filter.read().packet_filter
    }

    pub(crate) fn link_props(&self) -> LinkProps {
        *self.link.lock()
    }

    pub(crate) fn set_link_speed(&self, link_speed: u32) {
        self.link.lock().link_speed = link_speed;
    }

    pub(crate) fn set_lookahead(&self, lookahead: u32) {
        self.link.lock().lookahead = lookahead;
    }

    /// Waits until outstanding sends, then outstanding receives, reach zero.
    /// Returns false if `deadline` passed first.
    pub(crate) fn wait_quiescent(&self, deadline: Instant) -> bool {
        self.sends.wait_idle_until(deadline) && self.receives.wait_idle_until(deadline)
    }

    pub fn info(&self) -> InterfaceInfo {
        let addressing = self.addressing.read();
        let link = self.link_props();
        InterfaceInfo {
            id: self.id,
            name: self.name.clone(),
            number: self.number,
            state: self.state(),
            stopping: self.is_stopping(),
            power: self.power_state(),
            vlan_id: addressing.vlan_id.as_u16(),
            permanent_address: addressing.permanent,
            current_address: addressing.current,
            packet_filter: self.packet_filter(),
            link_speed: link.link_speed,
            lookahead: link.lookahead,
            outstanding_sends: self.sends.count(),
            outstanding_receives: self.receives.count(),
            references: self.refs.count(),
            stats: self.counters.snapshot(),
        }
    }
}

/// Point-in-time view of a virtual interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceInfo {
    pub id: VifId,
    pub name: String,
    pub number: u32,
    pub state: VifState,
    pub stopping: bool,
    pub power: PowerState,
    pub vlan_id: u16,
    pub permanent_address: MacAddress,
    pub current_address: MacAddress,
    pub packet_filter: PacketFilter,
    pub link_speed: u32,
    pub lookahead: u32,
    pub outstanding_sends: usize,
    pub outstanding_receives: usize,
    pub references: usize,
    pub stats: crate::stats::VifStats,
}
