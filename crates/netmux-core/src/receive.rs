//! Receive path: matching, VLAN handling and batched delivery.

use crate::binding::{BindingId, PhysicalBinding};
use crate::frame::{self, DeliveredFrame, ReturnTicket, ETH_HEADER_SIZE};
use crate::lower::{LowerFrame, LowerFrameId, ReceiveStatus};
use crate::mux::Mux;
use crate::stats::{BindingCounters, VifCounters};
use crate::upper::IndicationKind;
use crate::vif::{VifState, VirtualInterface};
use netmux_types::VlanTag;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// A frame queued for one interface.
#[derive(Debug)]
pub(crate) struct PendingReceive {
    data: Vec<u8>,
    vlan: Option<VlanTag>,
    frame: LowerFrameId,
    /// False for frames the lower layer reclaims when the receive call
    /// returns.
    retained: bool,
}

/// What the VLAN policy decided for one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VlanVerdict {
    /// Deliver, removing the tag if there is one.
    Accept(Option<VlanTag>),
    /// Not for this interface; no counter moves.
    Skip,
    /// Tag has the canonical format bit set.
    FormatError,
    /// Tag carries another VLAN id.
    VlanMismatch,
}

fn vlan_verdict(iface: &VirtualInterface, tag: Option<VlanTag>) -> VlanVerdict {
    let Some(tag) = tag else {
        return VlanVerdict::Accept(None);
    };
    if tag.canonical_format {
        return VlanVerdict::FormatError;
    }

    let addressing = iface.addressing.read();
    if addressing.vlan_id.is_untagged() {
        if tag.is_priority_only() || addressing.strip_passthrough_tags {
            VlanVerdict::Accept(Some(tag))
        } else {
            VlanVerdict::Skip
        }
    } else if !tag.is_priority_only() && tag.vlan_id != addressing.vlan_id.as_u16() {
        VlanVerdict::VlanMismatch
    } else {
        VlanVerdict::Accept(Some(tag))
    }
}

impl Mux {
    /// A frame indicated by the lower binding.
    ///
    /// Returns how many deliveries retain the frame; the lower layer gets one
    /// `return_frame` call for each of them.
    pub fn on_frame_received(&self, binding: BindingId, frame: LowerFrame) -> usize {
        let Ok(binding) = self.lookup_binding(binding) else {
            debug!(%binding, "frame for an unknown binding");
            return 0;
        };
        let counters = &binding.counters;
        BindingCounters::bump(&counters.frames_indicated);

        if frame.data.len() < ETH_HEADER_SIZE {
            BindingCounters::bump(&counters.runt_frames);
            return 0;
        }
        if binding.packet_filter().is_empty() {
            BindingCounters::bump(&counters.frames_filtered);
            return 0;
        }
        let Some(destination) = frame::destination(&frame.data) else {
            BindingCounters::bump(&counters.runt_frames);
            return 0;
        };
        let tag = frame::read_tag(&frame.data);
        let deliver_now = frame.status == ReceiveStatus::Resources;

        let mut accepted = 0;
        let mut flush = Vec::new();
        {
            let arena = binding.interfaces.read();
            for iface in arena.iter() {
                if !iface.can_receive() || !iface.matches_destination(&destination) {
                    continue;
                }
                let strip = match vlan_verdict(iface, tag) {
                    VlanVerdict::Accept(strip) => strip,
                    VlanVerdict::Skip => continue,
                    VlanVerdict::FormatError => {
                        VifCounters::bump(&iface.counters.receive_format_errors);
                        continue;
                    }
                    VlanVerdict::VlanMismatch => {
                        VifCounters::bump(&iface.counters.receive_vlan_errors);
                        continue;
                    }
                };

                let mut data = frame.data.clone();
                let vlan = match strip {
                    Some(_) => frame::strip_tag(&mut data),
                    None => None,
                };

                // Halt sets the stop flag before it drains the queue under
                // the same lock, so a frame queued here is always flushed.
                let full = {
                    let mut shared = iface.shared.lock();
                    if iface.is_stopping() || !iface.refs.try_acquire("receive") {
                        continue;
                    }
                    iface.receives.increment();
                    shared.rx_queue.push(PendingReceive {
                        data,
                        vlan,
                        frame: frame.id,
                        retained: !deliver_now,
                    });
                    shared.rx_queue.len() >= self.config.rx_batch_capacity
                };
                VifCounters::bump(&iface.counters.good_receives);
                accepted += 1;
                if full || deliver_now {
                    flush.push(Arc::clone(iface));
                }
            }
        }

        for iface in &flush {
            self.flush_receive_queue(&binding, iface);
        }

        if accepted == 0 {
            BindingCounters::bump(&counters.frames_unclaimed);
            trace!(binding = %binding.id(), %destination, "frame not claimed");
            return 0;
        }
        if deliver_now {
            0
        } else {
            accepted
        }
    }

    /// Delivers the frames queued for `iface` in one batch, or hands them
    /// back to the lower layer if the interface cannot take them.
    pub(crate) fn flush_receive_queue(&self, binding: &Arc<PhysicalBinding>, iface: &Arc<VirtualInterface>) {
        let queued = std::mem::take(&mut iface.shared.lock().rx_queue);
        if queued.is_empty() {
            return;
        }

        let mut reclaimed = 0;
        if iface.can_receive() {
            let frames = queued
                .into_iter()
                .map(|pending| {
                    if !pending.retained {
                        reclaimed += 1;
                    }
                    DeliveredFrame {
                        data: pending.data,
                        vlan: pending.vlan,
                        ticket: pending.retained.then(|| ReturnTicket {
                            binding: Arc::clone(binding),
                            vif: Arc::clone(iface),
                            frame: pending.frame,
                        }),
                    }
                })
                .collect::<Vec<_>>();
            trace!(interface = iface.name(), count = frames.len(), "delivering frames");
            self.upper.deliver_frames(iface.id(), frames);
            iface.shared.lock().receive_complete_pending = true;
        } else {
            debug!(interface = iface.name(), count = queued.len(), "interface cannot receive, returning frames");
            for pending in queued {
                if pending.retained {
                    self.lower.return_frame(binding.handle(), pending.frame);
                } else {
                    VifCounters::bump(&iface.counters.receive_resource_errors);
                }
                reclaimed += 1;
            }
        }

        for _ in 0..reclaimed {
            iface.receives.decrement();
            self.release_interface(iface, "receive");
        }
    }

    /// The lower binding finished a run of indications. Flushes every
    /// interface and signals receive-complete once per interface that got
    /// frames since the last call.
    #[instrument(skip(self))]
    pub fn on_receive_batch_complete(&self, binding: BindingId) {
        let Ok(binding) = self.lookup_binding(binding) else {
            return;
        };
        for iface in binding.referenced_members("indicate") {
            self.flush_receive_queue(&binding, &iface);
            let pending = std::mem::take(&mut iface.shared.lock().receive_complete_pending);
            // An earlier callback in this loop may have unlinked the interface.
            if pending && iface.state() != VifState::Destroyed {
                self.upper.indication_complete(iface.id(), IndicationKind::Receive);
            }
            self.release_interface(&iface, "indicate");
        }
    }

    /// The upper layer is done with a retained frame.
    pub fn return_frame(&self, ticket: ReturnTicket) {
        let ReturnTicket {
            binding,
            vif,
            frame,
        } = ticket;
        self.lower.return_frame(binding.handle(), frame);
        vif.receives.decrement();
        self.release_interface(&vif, "receive");
    }
}
