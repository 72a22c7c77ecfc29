//! Simulated Ethernet adapter.
//!
//! Every frame sent on a loopback binding lands on its wire and is indicated
//! back as a received frame the next time the wire is pumped. Requests and
//! sends complete during the call.

use netmux_core::{
    BindingId, ForwardedRequest, LowerBinding, LowerFrame, LowerFrameId, LowerHandle, LowerOp,
    LowerOpened, LowerStatus, Mux, Oid, RequestKind, SendPacket, Submitted,
};
use netmux_types::{MacAddress, MediaState, Medium};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Link speed reported by every loopback device, in units of 100 bps.
pub const LOOPBACK_LINK_SPEED: u32 = 10_000_000;

/// Lookahead reported by every loopback device.
pub const LOOPBACK_LOOKAHEAD: u32 = 1500;

/// Frames held on one wire before further sends fail with resources.
const WIRE_CAPACITY: usize = 256;

#[derive(Debug)]
struct Device {
    name: String,
    binding: BindingId,
    address: MacAddress,
    media: MediaState,
    wire: Vec<Vec<u8>>,
    // Copies held by interfaces. Returns can overtake the count added after
    // indication, so it may dip below zero briefly.
    retained: i64,
    next_frame: u64,
}

/// Loopback lower layer.
#[derive(Debug, Default)]
pub struct LoopbackAdapter {
    devices: Mutex<HashMap<LowerHandle, Device>>,
    next_handle: AtomicU64,
}

impl LoopbackAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open loopback devices.
    pub fn device_count(&self) -> usize {
        self.devices.lock().len()
    }

    /// Frames indicated up and not yet returned.
    pub fn retained_frames(&self) -> usize {
        let held: i64 = self.devices.lock().values().map(|d| d.retained).sum();
        held.max(0) as usize
    }

    /// Places a frame on the wire of `device` as if it arrived from outside.
    pub fn inject(&self, device: &str, frame: Vec<u8>) -> bool {
        let mut devices = self.devices.lock();
        match devices.values_mut().find(|d| d.name == device) {
            Some(dev) => {
                dev.wire.push(frame);
                true
            }
            None => false,
        }
    }

    /// Flips the media state of `device` and reports it to the engine.
    pub fn set_media(&self, mux: &Mux, device: &str, media: MediaState) {
        let binding = {
            let mut devices = self.devices.lock();
            let Some(dev) = devices.values_mut().find(|d| d.name == device) else {
                warn!(device, "no such loopback device");
                return;
            };
            dev.media = media;
            dev.binding
        };
        let code = match media {
            MediaState::Connected => netmux_core::StatusCode::MediaConnect,
            MediaState::Disconnected => netmux_core::StatusCode::MediaDisconnect,
        };
        mux.on_status(binding, netmux_core::StatusIndication::new(code));
        mux.on_status_complete(binding);
    }

    /// Indicates every frame on every wire to the engine. Returns the number
    /// of frames indicated.
    pub fn pump(&self, mux: &Mux) -> usize {
        let batches: Vec<(BindingId, Vec<LowerFrame>)> = {
            let mut devices = self.devices.lock();
            devices
                .values_mut()
                .filter(|d| !d.wire.is_empty())
                .map(|dev| {
                    let frames = dev
                        .wire
                        .drain(..)
                        .map(|data| {
                            dev.next_frame += 1;
                            LowerFrame::new(dev.next_frame, data)
                        })
                        .collect::<Vec<_>>();
                    (dev.binding, frames)
                })
                .collect()
        };

        let mut indicated = 0;
        for (binding, frames) in batches {
            for frame in frames {
                indicated += 1;
                let kept = mux.on_frame_received(binding, frame);
                self.hold(binding, kept);
            }
            mux.on_receive_batch_complete(binding);
        }
        if indicated > 0 {
            trace!(indicated, "pumped loopback wires");
        }
        indicated
    }

    fn hold(&self, binding: BindingId, copies: usize) {
        let mut devices = self.devices.lock();
        if let Some(dev) = devices.values_mut().find(|d| d.binding == binding) {
            dev.retained += copies as i64;
        }
    }

    fn answer(device: &Device, request: &mut ForwardedRequest) -> LowerStatus {
        match (request.kind(), request.oid()) {
            (RequestKind::Query, Oid::LINK_SPEED) => {
                request.respond(&LOOPBACK_LINK_SPEED.to_le_bytes())
            }
            (RequestKind::Query, Oid::MAXIMUM_LOOKAHEAD) => {
                request.respond(&LOOPBACK_LOOKAHEAD.to_le_bytes())
            }
            (RequestKind::Query, Oid::CURRENT_ADDRESS) => request.respond(device.address.as_bytes()),
            (RequestKind::Query, Oid::MEDIA_CONNECT_STATUS) => {
                request.respond(&device.media.code().to_le_bytes())
            }
            (RequestKind::Query, Oid::PNP_CAPABILITIES) => request.respond(&[0u8; 16]),
            (RequestKind::Query, _) => LowerStatus::NotSupported,
            (RequestKind::Set, _) => request.accept(),
        }
    }
}

impl LowerBinding for LoopbackAdapter {
    fn open(&self, device: &str, context: BindingId) -> LowerOp<LowerOpened> {
        if device.is_empty() {
            return LowerOp::Ready(Err(LowerStatus::Failure));
        }
        let n = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = LowerHandle(n);
        let address = MacAddress::new([0x02, 0x4c, 0x42, 0x00, (n >> 8) as u8, n as u8]);
        self.devices.lock().insert(
            handle,
            Device {
                name: device.to_string(),
                binding: context,
                address,
                media: MediaState::Connected,
                wire: Vec::new(),
                retained: 0,
                next_frame: 0,
            },
        );
        debug!(device, ?handle, %address, "loopback device opened");
        LowerOp::Ready(Ok(LowerOpened {
            handle,
            medium: Medium::Ethernet,
        }))
    }

    fn close(&self, handle: LowerHandle) -> LowerOp<()> {
        match self.devices.lock().remove(&handle) {
            Some(dev) => {
                if dev.retained > 0 {
                    warn!(device = %dev.name, retained = dev.retained, "closing with frames outstanding");
                }
                LowerOp::Ready(Ok(()))
            }
            None => LowerOp::Ready(Err(LowerStatus::Failure)),
        }
    }

    fn request(&self, handle: LowerHandle, mut request: ForwardedRequest) -> Submitted<ForwardedRequest> {
        let status = match self.devices.lock().get(&handle) {
            Some(dev) => Self::answer(dev, &mut request),
            None => LowerStatus::AdapterNotReady,
        };
        trace!(oid = %request.oid(), %status, "loopback request");
        Submitted::Complete(request, status)
    }

    fn send(&self, handle: LowerHandle, packet: SendPacket) -> Submitted<SendPacket> {
        let status = match self.devices.lock().get_mut(&handle) {
            Some(dev) if dev.media == MediaState::Disconnected => LowerStatus::Failure,
            Some(dev) if dev.wire.len() >= WIRE_CAPACITY => LowerStatus::Resources,
            Some(dev) => {
                dev.wire.push(packet.data().to_vec());
                LowerStatus::Success
            }
            None => LowerStatus::AdapterNotReady,
        };
        Submitted::Complete(packet, status)
    }

    fn return_frame(&self, handle: LowerHandle, frame: LowerFrameId) {
        if let Some(dev) = self.devices.lock().get_mut(&handle) {
            dev.retained -= 1;
            trace!(device = %dev.name, ?frame, "frame returned");
        }
    }

    fn cancel_sends(&self, handle: LowerHandle, cancel_id: u64) {
        // Sends complete synchronously; nothing is ever queued.
        trace!(?handle, cancel_id, "cancel on loopback ignored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_open_and_close() {
        let adapter = LoopbackAdapter::new();
        let opened = adapter.open("lo0", BindingId(1)).wait().unwrap();
        assert_eq!(opened.medium, Medium::Ethernet);
        assert_eq!(adapter.device_count(), 1);
        assert_eq!(adapter.close(opened.handle).wait(), Ok(()));
        assert_eq!(adapter.device_count(), 0);
        assert_eq!(adapter.close(opened.handle).wait(), Err(LowerStatus::Failure));
    }

    #[test]
    fn test_empty_device_name_fails() {
        let adapter = LoopbackAdapter::new();
        assert!(adapter.open("", BindingId(1)).wait().is_err());
    }

    #[test]
    fn test_inject_unknown_device() {
        let adapter = LoopbackAdapter::new();
        assert!(!adapter.inject("lo9", vec![0; 60]));
    }
}
