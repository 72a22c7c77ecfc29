//! Binding and interface power transitions.

use crate::binding::BindingId;
use crate::error::MuxResult;
use crate::mux::Mux;
use crate::status::StatusIndication;
use crate::upper::IndicationKind;
use crate::vif::{VifId, VirtualInterface};
use netmux_types::PowerState;
use tracing::{info, instrument, warn};

impl Mux {
    /// The adapter below the binding changed power state.
    ///
    /// Entering low power blocks until every linked interface has no
    /// outstanding sends or receives, bounded by the power drain policy.
    /// Returning to D0 submits the requests queued in the meantime.
    #[instrument(skip(self))]
    pub fn on_binding_power_change(&self, binding: BindingId, state: PowerState) -> MuxResult<()> {
        let binding = self.lookup_binding(binding)?;
        let previous = binding.set_power_state(state);
        info!(binding = %binding.id(), %previous, %state, "binding power state changed");

        if state.is_low_power() {
            let deadline = self.config.power_drain.deadline();
            for iface in binding.members() {
                if !iface.wait_quiescent(deadline) {
                    warn!(
                        interface = iface.name(),
                        sends = iface.sends.count(),
                        receives = iface.receives.count(),
                        budget = ?self.config.power_drain.budget(),
                        "interface did not drain before power down"
                    );
                }
            }
        } else if previous.is_low_power() {
            self.redispatch_queued(&binding);
        }
        Ok(())
    }

    /// Changes the power state of one interface.
    #[instrument(skip(self))]
    pub fn on_interface_power_change(&self, vif: VifId, state: PowerState) -> MuxResult<()> {
        let (_, iface) = self.lookup_interface(vif)?;
        self.change_interface_power(&iface, state);
        Ok(())
    }

    /// Going to low power remembers the last indicated media status; waking
    /// up indicates the latest one if it changed while asleep.
    pub(crate) fn change_interface_power(&self, iface: &VirtualInterface, state: PowerState) {
        let reindicate = {
            let mut power = iface.power.lock();
            let previous = std::mem::replace(&mut power.state, state);
            if previous.is_low_power() && !state.is_low_power() {
                if power.last_indicated != power.latest_unindicated {
                    power.last_indicated = power.latest_unindicated;
                    Some(power.latest_unindicated)
                } else {
                    None
                }
            } else {
                if !previous.is_low_power() && state.is_low_power() {
                    power.latest_unindicated = power.last_indicated;
                }
                None
            }
        };
        info!(interface = iface.name(), %state, "interface power state changed");

        if let Some(code) = reindicate {
            self.upper
                .deliver_status(iface.id(), StatusIndication::new(code));
            self.upper
                .indication_complete(iface.id(), IndicationKind::Status);
        }
    }
}
