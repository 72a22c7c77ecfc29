//! Physical bindings and the arena of interfaces hung off each one.

use crate::lifetime::{Outstanding, RefCount};
use crate::lower::LowerHandle;
use crate::stats::{BindingCounters, BindingStats};
use crate::vif::{LinkProps, VifId, VirtualInterface};
use netmux_types::{MacAddress, MediaState, Medium, PacketFilter, PowerState};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Handle of an open binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BindingId(pub u32);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bind{}", self.0)
    }
}

#[derive(Debug, Default)]
struct ArenaSlot {
    generation: u32,
    entry: Option<Arc<VirtualInterface>>,
}

/// Interfaces of one binding, addressed by slot and generation.
///
/// Membership is the ordered set of occupied slots; iteration follows slot
/// order.
#[derive(Debug, Default)]
pub(crate) struct InterfaceArena {
    slots: Vec<ArenaSlot>,
    free: Vec<u32>,
    members: BTreeSet<u32>,
}

impl InterfaceArena {
    /// Places a new interface built by `build` from its slot and generation.
    pub(crate) fn insert_with(
        &mut self,
        build: impl FnOnce(u32, u32) -> Arc<VirtualInterface>,
    ) -> Arc<VirtualInterface> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(ArenaSlot::default());
                // The arena is capped far below u32::MAX by MAX_INTERFACES.
                (self.slots.len() - 1) as u32
            }
        };
        let entry = &mut self.slots[slot as usize];
        let iface = build(slot, entry.generation);
        entry.entry = Some(Arc::clone(&iface));
        self.members.insert(slot);
        iface
    }

    pub(crate) fn get(&self, id: VifId) -> Option<&Arc<VirtualInterface>> {
        let slot = self.slots.get(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    /// Removes the interface and retires its generation.
    pub(crate) fn remove(&mut self, id: VifId) -> Option<Arc<VirtualInterface>> {
        let slot = self.slots.get_mut(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.members.remove(&id.slot);
        self.free.push(id.slot);
        Some(entry)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<VirtualInterface>> {
        self.members
            .iter()
            .filter_map(|slot| self.slots[*slot as usize].entry.as_ref())
    }

    pub(crate) fn find_by_name(&self, name: &str) -> Option<&Arc<VirtualInterface>> {
        self.iter().find(|iface| iface.name().eq_ignore_ascii_case(name))
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AdapterProps {
    pub(crate) link_speed: u32,
    pub(crate) lookahead: u32,
    pub(crate) address: MacAddress,
    pub(crate) media: MediaState,
}

/// The open connection to one physical adapter.
#[derive(Debug)]
pub struct PhysicalBinding {
    id: BindingId,
    device: String,
    handle: LowerHandle,
    medium: Medium,
    props: RwLock<AdapterProps>,
    pub(crate) packet_filter: Mutex<PacketFilter>,
    power: Mutex<PowerState>,
    pub(crate) interfaces: RwLock<InterfaceArena>,
    /// Interfaces currently linked; `close` waits for this to drain.
    pub(crate) linked: Outstanding,
    next_number: AtomicU32,
    pub(crate) refs: RefCount,
    closing: AtomicBool,
    pub(crate) counters: BindingCounters,
}

impl PhysicalBinding {
    pub(crate) fn new(
        id: BindingId,
        device: &str,
        handle: LowerHandle,
        medium: Medium,
        link_speed: u32,
        lookahead: u32,
    ) -> Self {
        Self {
            id,
            device: device.to_string(),
            handle,
            medium,
            props: RwLock::new(AdapterProps {
                link_speed,
                lookahead,
                address: MacAddress::ZERO,
                media: MediaState::Connected,
            }),
            packet_filter: Mutex::new(PacketFilter::empty()),
            power: Mutex::new(PowerState::D0),
            interfaces: RwLock::new(InterfaceArena::default()),
            linked: Outstanding::new(),
            next_number: AtomicU32::new(0),
            refs: RefCount::new(device),
            closing: AtomicBool::new(false),
            counters: BindingCounters::default(),
        }
    }

    pub fn id(&self) -> BindingId {
        self.id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn handle(&self) -> LowerHandle {
        self.handle
    }

    pub fn medium(&self) -> Medium {
        self.medium
    }

    pub fn power_state(&self) -> PowerState {
        *self.power.lock()
    }

    pub(crate) fn set_power_state(&self, state: PowerState) -> PowerState {
        std::mem::replace(&mut *self.power.lock(), state)
    }

    pub fn packet_filter(&self) -> PacketFilter {
        *self.packet_filter.lock()
    }

    pub(crate) fn update_props(&self, update: impl FnOnce(&mut AdapterProps)) {
        update(&mut self.props.write());
    }

    pub(crate) fn link_props(&self) -> LinkProps {
        let props = self.props.read();
        LinkProps {
            link_speed: props.link_speed,
            lookahead: props.lookahead,
        }
    }

    pub(crate) fn next_number(&self) -> u32 {
        self.next_number.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::AcqRel)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Snapshot of the linked interfaces, taken under the read lock.
    pub(crate) fn members(&self) -> Vec<Arc<VirtualInterface>> {
        self.interfaces.read().iter().cloned().collect()
    }

    /// Like [`PhysicalBinding::members`], but each returned interface holds a
    /// reference taken under the read lock. The caller releases one per
    /// interface once done with it.
    pub(crate) fn referenced_members(&self, reason: &'static str) -> Vec<Arc<VirtualInterface>> {
        self.interfaces
            .read()
            .iter()
            .filter(|iface| iface.refs.try_acquire(reason))
            .cloned()
            .collect()
    }

    pub fn interface_count(&self) -> usize {
        self.interfaces.read().len()
    }

    pub fn stats(&self) -> BindingStats {
        self.counters.snapshot()
    }

    pub fn info(&self) -> BindingInfo {
        let props = *self.props.read();
        BindingInfo {
            id: self.id,
            device: self.device.clone(),
            link_speed: props.link_speed,
            lookahead: props.lookahead,
            address: props.address,
            media: props.media,
            packet_filter: self.packet_filter(),
            power: self.power_state(),
            interfaces: self.interface_count(),
            references: self.refs.count(),
            closing: self.is_closing(),
            stats: self.stats(),
        }
    }
}

/// Point-in-time view of a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingInfo {
    pub id: BindingId,
    pub device: String,
    pub link_speed: u32,
    pub lookahead: u32,
    pub address: MacAddress,
    pub media: MediaState,
    pub packet_filter: PacketFilter,
    pub power: PowerState,
    pub interfaces: usize,
    pub references: usize,
    pub closing: bool,
    pub stats: BindingStats,
}
