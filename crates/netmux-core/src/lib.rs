//! Network interface multiplexing engine
//!
//! Binds to physical Ethernet adapters and exposes any number of virtual
//! interfaces over each one. Every virtual interface owns a MAC address, a
//! receive filter, an optional 802.1Q VLAN id and a power state. The engine
//! fans received frames out to matching interfaces, tags and forwards their
//! sends, answers or forwards their queries and sets, and keeps every object
//! alive until the last outstanding operation that touches it has drained.
//!
//! The engine sits between two traits:
//!
//! - [`LowerBinding`]: the physical adapter driver below a binding
//! - [`UpperEdge`]: the layer that consumes virtual interfaces
//!
//! Calls into the engine are synchronous and thread-safe; completions from
//! either side may arrive on any thread.

pub mod binding;
pub mod config;
pub mod error;
pub mod frame;
pub mod info;
pub mod lifetime;
pub mod lower;
pub mod mux;
pub mod oid;
pub mod power;
pub mod receive;
pub mod request;
pub mod send;
pub mod stats;
pub mod status;
pub mod upper;
pub mod vif;

#[cfg(test)]
pub(crate) mod testing;

pub use binding::{BindingId, BindingInfo, PhysicalBinding};
pub use config::{
    BindingConfig, ConfigError, DrainPolicy, EngineConfig, InterfaceConfig, MuxConfig,
    DEFAULT_CONFIG_PATH,
};
pub use error::{CreateError, MuxError, MuxResult, OpenError};
pub use frame::{DeliveredFrame, ReturnTicket, SendPacket, SendRequest};
pub use info::{DRIVER_VERSION, VENDOR_ID};
pub use lifetime::{Event, LifetimeError, Outstanding, RefCount, RefSnapshot, Release};
pub use lower::{
    LowerBinding, LowerFrame, LowerFrameId, LowerHandle, LowerOp, LowerOpened, LowerStatus,
    ReceiveStatus, Submitted,
};
pub use mux::{Mux, MAX_INTERFACES};
pub use oid::Oid;
pub use request::{ForwardedRequest, RequestKind, RequestOutcome, RequestReply};
pub use stats::{BindingStats, VifStats};
pub use status::{StatusCode, StatusIndication};
pub use upper::{IndicationKind, InitParams, UpperEdge};
pub use vif::{InterfaceInfo, VifId, VifState, VirtualInterface};

pub use netmux_types::{MacAddress, MediaState, Medium, PacketFilter, PowerState, VlanId, VlanTag};
