//! Media status fan-out from a binding to its interfaces.

use crate::binding::BindingId;
use crate::mux::Mux;
use crate::upper::IndicationKind;
use crate::vif::{VifState, VirtualInterface};
use netmux_types::MediaState;
use serde::Serialize;
use tracing::{debug, instrument};

/// Status codes a lower binding can indicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusCode {
    MediaConnect,
    MediaDisconnect,
    /// Anything else; never forwarded to interfaces.
    Other(u32),
}

impl StatusCode {
    pub fn media_state(&self) -> Option<MediaState> {
        match self {
            StatusCode::MediaConnect => Some(MediaState::Connected),
            StatusCode::MediaDisconnect => Some(MediaState::Disconnected),
            StatusCode::Other(_) => None,
        }
    }
}

/// A status indication with its optional payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusIndication {
    pub code: StatusCode,
    pub payload: Vec<u8>,
}

impl StatusIndication {
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            payload: Vec::new(),
        }
    }
}

impl Mux {
    /// A status indication from the lower binding.
    ///
    /// Only media connect and disconnect reach the interfaces. An interface
    /// in low power records the status and gets it when it wakes up.
    #[instrument(skip(self, indication), fields(code = ?indication.code))]
    pub fn on_status(&self, binding: BindingId, indication: StatusIndication) {
        let Ok(binding) = self.lookup_binding(binding) else {
            debug!("status for an unknown binding");
            return;
        };
        let Some(media) = indication.code.media_state() else {
            debug!(binding = %binding.id(), "ignoring status indication");
            return;
        };
        binding.update_props(|props| props.media = media);

        for iface in binding.referenced_members("status") {
            if !accepts_status(&iface) {
                self.release_interface(&iface, "status");
                continue;
            }
            let deliver = {
                let mut power = iface.power.lock();
                if power.state.is_low_power() {
                    power.latest_unindicated = indication.code;
                    false
                } else {
                    power.last_indicated = indication.code;
                    true
                }
            };
            if deliver {
                self.upper.deliver_status(iface.id(), indication.clone());
                iface.shared.lock().status_complete_pending = true;
            }
            self.release_interface(&iface, "status");
        }
    }

    /// Closes a run of status indications: every interface that got a status
    /// since the last call sees exactly one completion.
    #[instrument(skip(self))]
    pub fn on_status_complete(&self, binding: BindingId) {
        let Ok(binding) = self.lookup_binding(binding) else {
            return;
        };
        for iface in binding.members() {
            let pending = std::mem::take(&mut iface.shared.lock().status_complete_pending);
            if pending && iface.state() != VifState::Destroyed {
                self.upper.indication_complete(iface.id(), IndicationKind::Status);
            }
        }
    }
}

fn accepts_status(iface: &VirtualInterface) -> bool {
    !iface.is_stopping() && iface.state() == VifState::Active
}
