//! Send path.

use crate::error::{MuxError, MuxResult};
use crate::frame::{self, SendPacket, SendRequest};
use crate::lower::{LowerStatus, Submitted};
use crate::mux::Mux;
use crate::stats::VifCounters;
use crate::vif::{VifId, VifState};
use std::sync::Arc;
use tracing::{debug, instrument, trace};

impl Mux {
    /// Transmits frames on `vif`.
    ///
    /// Every packet is completed through `send_complete` on the upper edge,
    /// including packets refused before they reach the lower layer.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::NotFound`] for an unknown interface; nothing is
    /// completed in that case.
    #[instrument(skip(self, packets), fields(count = packets.len()))]
    pub fn send(&self, vif: VifId, packets: Vec<SendRequest>) -> MuxResult<()> {
        let (binding, iface) = self.lookup_interface(vif)?;

        for request in packets {
            let refused = if iface.is_stopping() || iface.state() != VifState::Active {
                Some(MuxError::Closing(iface.name().to_string()))
            } else if iface.power_state().is_low_power() {
                Some(MuxError::NotReady(iface.name().to_string()))
            } else {
                None
            };
            if let Some(err) = refused {
                self.upper.send_complete(vif, request.id, Err(err));
                continue;
            }

            let (data, tagged) = match frame::tag_for_send(request.data, request.vlan, iface.vlan_id()) {
                Ok(prepared) => prepared,
                Err(err) => {
                    debug!(interface = iface.name(), id = request.id, %err, "refusing packet");
                    self.upper.send_complete(vif, request.id, Err(err));
                    continue;
                }
            };

            if !iface.refs.try_acquire("send") {
                self.upper
                    .send_complete(vif, request.id, Err(MuxError::Closing(iface.name().to_string())));
                continue;
            }
            iface.sends.increment();
            let packet = SendPacket {
                id: request.id,
                cancel_id: request.cancel_id,
                frame: data,
                tagged,
                binding: Arc::clone(&binding),
                vif: Arc::clone(&iface),
            };
            trace!(?packet, "submitting send");
            match self.lower.send(binding.handle(), packet) {
                Submitted::Complete(packet, status) => self.on_send_complete(packet, status),
                Submitted::Pending => {}
            }
        }
        Ok(())
    }

    /// Completion of a send submitted to the lower layer.
    pub fn on_send_complete(&self, packet: SendPacket, status: LowerStatus) {
        let SendPacket { id, vif, .. } = packet;
        if status.is_success() {
            VifCounters::bump(&vif.counters.good_transmits);
        } else {
            VifCounters::bump(&vif.counters.transmit_failures);
        }
        self.upper.send_complete(vif.id(), id, status.into_result());
        vif.sends.decrement();
        self.release_interface(&vif, "send");
    }

    /// Asks the lower layer to cancel queued sends tagged with `cancel_id`.
    #[instrument(skip(self))]
    pub fn cancel_sends(&self, vif: VifId, cancel_id: u64) -> MuxResult<()> {
        let (binding, _) = self.lookup_interface(vif)?;
        self.lower.cancel_sends(binding.handle(), cancel_id);
        Ok(())
    }
}
