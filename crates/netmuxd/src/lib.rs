//! netmux daemon
//!
//! Runs the multiplexing engine over a simulated loopback adapter with an
//! upper stack that logs every indication. Bindings and interfaces come from
//! a TOML configuration that can be reloaded with SIGHUP.

pub mod daemon;
pub mod error;
pub mod loopback;
pub mod source;
pub mod stack;

pub use daemon::{Daemon, Report, PUMP_INTERVAL};
pub use error::{DaemonError, Result};
pub use loopback::{LoopbackAdapter, LOOPBACK_LINK_SPEED, LOOPBACK_LOOKAHEAD};
pub use source::{ConfigSource, StaticSource, TomlFileSource};
pub use stack::{LoggingStack, StackCounters};
