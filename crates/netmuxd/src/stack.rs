//! Upper edge that logs everything it is handed.
//!
//! Instances initialize as soon as they are instantiated, with the settings
//! configured for their name. Teardown requests are acknowledged on the
//! spot. Delivered frames are counted and returned immediately.

use netmux_core::{
    DeliveredFrame, IndicationKind, InterfaceConfig, Mux, MuxConfig, MuxResult, Oid,
    StatusIndication, UpperEdge, VifId,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// What the stack has seen since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StackCounters {
    pub instances: u64,
    pub halted: u64,
    pub frames: u64,
    pub status_indications: u64,
    pub sends_completed: u64,
    pub sends_failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    instances: AtomicU64,
    halted: AtomicU64,
    frames: AtomicU64,
    status_indications: AtomicU64,
    sends_completed: AtomicU64,
    sends_failed: AtomicU64,
}

/// Logging upper stack.
#[derive(Debug, Default)]
pub struct LoggingStack {
    engine: Mutex<Weak<Mux>>,
    config: RwLock<MuxConfig>,
    counters: Counters,
}

impl LoggingStack {
    pub fn new(config: MuxConfig) -> Self {
        Self {
            engine: Mutex::new(Weak::new()),
            config: RwLock::new(config),
            counters: Counters::default(),
        }
    }

    /// Points the stack at the engine it calls back into.
    pub fn attach(&self, mux: &Arc<Mux>) {
        *self.engine.lock() = Arc::downgrade(mux);
    }

    /// Replaces the configuration consulted for new instances.
    pub fn update_config(&self, config: MuxConfig) {
        *self.config.write() = config;
    }

    pub fn counters(&self) -> StackCounters {
        let c = &self.counters;
        StackCounters {
            instances: c.instances.load(Ordering::Relaxed),
            halted: c.halted.load(Ordering::Relaxed),
            frames: c.frames.load(Ordering::Relaxed),
            status_indications: c.status_indications.load(Ordering::Relaxed),
            sends_completed: c.sends_completed.load(Ordering::Relaxed),
            sends_failed: c.sends_failed.load(Ordering::Relaxed),
        }
    }

    fn engine(&self) -> Option<Arc<Mux>> {
        self.engine.lock().upgrade()
    }

    fn interface_config(&self, name: &str) -> InterfaceConfig {
        self.config
            .read()
            .interface(name)
            .cloned()
            .unwrap_or_else(|| InterfaceConfig::new(name))
    }
}

impl UpperEdge for LoggingStack {
    fn instantiate(&self, vif: VifId, name: &str) -> MuxResult<()> {
        let settings = self.interface_config(name);
        info!(%vif, name, vlan_id = settings.vlan_id, "instantiating interface");
        self.counters.instances.fetch_add(1, Ordering::Relaxed);
        if let Some(mux) = self.engine() {
            mux.initialize_interface(vif, settings.init_params())?;
        }
        Ok(())
    }

    fn cancel_instantiation(&self, vif: VifId) -> bool {
        // Instances initialize inside instantiate; there is never one pending.
        debug!(%vif, "nothing to cancel");
        false
    }

    fn request_teardown(&self, vif: VifId) {
        info!(%vif, "teardown requested");
        let Some(mux) = self.engine() else {
            return;
        };
        if let Err(err) = mux.on_instance_halt(vif) {
            warn!(%vif, %err, "halt failed");
        }
    }

    fn halt_acknowledged(&self, vif: VifId) {
        self.counters.halted.fetch_add(1, Ordering::Relaxed);
        info!(%vif, "interface halted");
    }

    fn deliver_frames(&self, vif: VifId, frames: Vec<DeliveredFrame>) {
        self.counters
            .frames
            .fetch_add(frames.len() as u64, Ordering::Relaxed);
        let mux = self.engine();
        for mut frame in frames {
            debug!(%vif, len = frame.data.len(), vlan = ?frame.vlan, "frame received");
            if let (Some(ticket), Some(mux)) = (frame.take_ticket(), mux.as_ref()) {
                mux.return_frame(ticket);
            }
        }
    }

    fn deliver_status(&self, vif: VifId, status: StatusIndication) {
        self.counters
            .status_indications
            .fetch_add(1, Ordering::Relaxed);
        info!(%vif, code = ?status.code, "media status");
    }

    fn indication_complete(&self, vif: VifId, kind: IndicationKind) {
        debug!(%vif, ?kind, "indication complete");
    }

    fn send_complete(&self, vif: VifId, send_id: u64, result: MuxResult<()>) {
        match result {
            Ok(()) => {
                self.counters.sends_completed.fetch_add(1, Ordering::Relaxed);
                debug!(%vif, send_id, "send complete");
            }
            Err(err) => {
                self.counters.sends_failed.fetch_add(1, Ordering::Relaxed);
                warn!(%vif, send_id, %err, "send failed");
            }
        }
    }

    fn query_complete(&self, vif: VifId, oid: Oid, result: MuxResult<Vec<u8>>) {
        match result {
            Ok(data) => debug!(%vif, %oid, len = data.len(), "query complete"),
            Err(err) => warn!(%vif, %oid, %err, "query failed"),
        }
    }

    fn set_complete(&self, vif: VifId, oid: Oid, result: MuxResult<usize>) {
        match result {
            Ok(bytes) => debug!(%vif, %oid, bytes, "set complete"),
            Err(err) => warn!(%vif, %oid, %err, "set failed"),
        }
    }
}
