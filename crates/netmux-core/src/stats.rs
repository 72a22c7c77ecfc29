//! Per-interface and per-binding counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one virtual interface.
#[derive(Debug, Default)]
pub struct VifCounters {
    pub(crate) good_transmits: AtomicU64,
    pub(crate) good_receives: AtomicU64,
    pub(crate) transmit_failures: AtomicU64,
    pub(crate) receive_resource_errors: AtomicU64,
    pub(crate) receive_format_errors: AtomicU64,
    pub(crate) receive_vlan_errors: AtomicU64,
}

impl VifCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> VifStats {
        VifStats {
            good_transmits: self.good_transmits.load(Ordering::Relaxed),
            good_receives: self.good_receives.load(Ordering::Relaxed),
            transmit_failures: self.transmit_failures.load(Ordering::Relaxed),
            receive_resource_errors: self.receive_resource_errors.load(Ordering::Relaxed),
            receive_format_errors: self.receive_format_errors.load(Ordering::Relaxed),
            receive_vlan_errors: self.receive_vlan_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`VifCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VifStats {
    pub good_transmits: u64,
    pub good_receives: u64,
    pub transmit_failures: u64,
    pub receive_resource_errors: u64,
    pub receive_format_errors: u64,
    pub receive_vlan_errors: u64,
}

impl VifStats {
    /// All receive errors, as reported for the receive-error query.
    pub fn receive_errors(&self) -> u64 {
        self.receive_resource_errors + self.receive_format_errors + self.receive_vlan_errors
    }
}

/// Live counters of one binding.
#[derive(Debug, Default)]
pub struct BindingCounters {
    pub(crate) frames_indicated: AtomicU64,
    pub(crate) frames_unclaimed: AtomicU64,
    pub(crate) frames_filtered: AtomicU64,
    pub(crate) runt_frames: AtomicU64,
}

impl BindingCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BindingStats {
        BindingStats {
            frames_indicated: self.frames_indicated.load(Ordering::Relaxed),
            frames_unclaimed: self.frames_unclaimed.load(Ordering::Relaxed),
            frames_filtered: self.frames_filtered.load(Ordering::Relaxed),
            runt_frames: self.runt_frames.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BindingCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BindingStats {
    /// Frames the lower layer indicated.
    pub frames_indicated: u64,
    /// Frames no interface accepted.
    pub frames_unclaimed: u64,
    /// Frames dropped because every interface filter was empty.
    pub frames_filtered: u64,
    /// Frames shorter than an Ethernet header.
    pub runt_frames: u64,
}
