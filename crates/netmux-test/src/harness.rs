//! An engine wired to the scripted lower layer and the recording upper edge.

use crate::fixtures;
use crate::lower::MockLower;
use crate::upper::RecordingUpper;
use netmux_core::{
    BindingId, EngineConfig, InitParams, LowerBinding, Mux, Oid, PacketFilter, UpperEdge, VifId,
};
use std::sync::Arc;

pub struct Harness {
    pub lower: Arc<MockLower>,
    pub upper: Arc<RecordingUpper>,
    pub mux: Arc<Mux>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fixtures::test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        crate::init_test_logging();
        let lower = Arc::new(MockLower::new());
        let upper = Arc::new(RecordingUpper::new());
        let mux = Arc::new(Mux::new(
            config,
            Arc::clone(&lower) as Arc<dyn LowerBinding>,
            Arc::clone(&upper) as Arc<dyn UpperEdge>,
        ));
        upper.attach(&mux);
        Self { lower, upper, mux }
    }

    /// Opens `device` with no interfaces.
    pub fn open(&self, device: &str) -> BindingId {
        self.mux.open(device).expect("open binding")
    }

    /// Creates an initialized interface on `binding` with `vlan_id`,
    /// receiving directed, broadcast and listed multicast frames.
    pub fn active(&self, binding: BindingId, name: &str, vlan_id: u16) -> VifId {
        self.upper.set_params(
            name,
            InitParams {
                vlan_id,
                ..InitParams::default()
            },
        );
        let vif = self
            .mux
            .create_interface(binding, name)
            .expect("create interface");
        self.set_filter(
            vif,
            PacketFilter::DIRECTED | PacketFilter::BROADCAST | PacketFilter::MULTICAST,
        );
        vif
    }

    pub fn set_filter(&self, vif: VifId, filter: PacketFilter) {
        self.mux
            .set(vif, Oid::CURRENT_PACKET_FILTER, &filter.bits().to_le_bytes())
            .expect("set packet filter");
    }

    /// References held on `vif` beyond the one its link holds.
    pub fn extra_references(&self, vif: VifId) -> usize {
        self.mux
            .interface_info(vif)
            .map(|info| info.references.saturating_sub(1))
            .unwrap_or(0)
    }
}
