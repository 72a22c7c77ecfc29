//! Engine and binding configuration.
//!
//! Loaded from TOML. Default location: /etc/netmux/netmux.toml
//!
//! ```toml
//! [engine]
//! default_link_speed = 100000
//! rx_batch_capacity = 16
//!
//! [engine.power_drain]
//! max_polls = 10000
//! poll_interval_ms = 1
//!
//! [[binding]]
//! device = "eth0"
//!
//! [[binding.interface]]
//! name = "vlan100"
//! vlan_id = 100
//! ```

use crate::upper::InitParams;
use netmux_types::{MacAddress, VlanId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/netmux/netmux.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Bounded wait used when draining outstanding operations.
///
/// The total budget is `max_polls * poll_interval_ms`; waiters are woken as
/// soon as the counters drain, the interval only sizes the budget and the
/// spacing of progress logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainPolicy {
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl DrainPolicy {
    pub const fn new(max_polls: u32, poll_interval_ms: u64) -> Self {
        Self {
            max_polls,
            poll_interval_ms,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Total time a drain may take.
    pub fn budget(&self) -> Duration {
        self.poll_interval() * self.max_polls
    }

    /// Deadline for a drain starting now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.budget()
    }
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self::new(default_max_polls(), default_poll_interval_ms())
    }
}

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Link speed in units of 100 bps used when the adapter query fails.
    #[serde(default = "default_link_speed")]
    pub default_link_speed: u32,

    /// Lookahead size used when the adapter query fails.
    #[serde(default = "default_lookahead")]
    pub default_lookahead: u32,

    /// Frames accumulated per interface before a batch is delivered.
    #[serde(default = "default_rx_batch_capacity")]
    pub rx_batch_capacity: usize,

    /// Multicast addresses an interface may hold.
    #[serde(default = "default_max_multicast_list")]
    pub max_multicast_list: usize,

    /// Reported in the maximum-send-packets query.
    #[serde(default = "default_max_send_packets")]
    pub max_send_packets: u32,

    /// Reported in the vendor-description query.
    #[serde(default = "default_vendor_description")]
    pub vendor_description: String,

    /// Drain applied when the binding enters low power.
    #[serde(default = "default_power_drain")]
    pub power_drain: DrainPolicy,

    /// Drain applied while an interface halts and while a binding waits for
    /// its interfaces to unlink.
    #[serde(default = "default_halt_drain")]
    pub halt_drain: DrainPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_link_speed: default_link_speed(),
            default_lookahead: default_lookahead(),
            rx_batch_capacity: default_rx_batch_capacity(),
            max_multicast_list: default_max_multicast_list(),
            max_send_packets: default_max_send_packets(),
            vendor_description: default_vendor_description(),
            power_drain: default_power_drain(),
            halt_drain: default_halt_drain(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rx_batch_capacity == 0 {
            return Err(ConfigError::invalid("rx_batch_capacity", "must be at least 1"));
        }
        if self.max_multicast_list == 0 {
            return Err(ConfigError::invalid("max_multicast_list", "must be at least 1"));
        }
        if self.power_drain.max_polls == 0 || self.halt_drain.max_polls == 0 {
            return Err(ConfigError::invalid("max_polls", "must be at least 1"));
        }
        Ok(())
    }
}

/// One virtual interface of a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,

    #[serde(default)]
    pub vlan_id: u16,

    #[serde(default)]
    pub network_address: Option<MacAddress>,

    #[serde(default)]
    pub strip_passthrough_tags: bool,
}

impl InterfaceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vlan_id: 0,
            network_address: None,
            strip_passthrough_tags: false,
        }
    }

    /// Settings handed to the engine when the instance initializes.
    pub fn init_params(&self) -> InitParams {
        InitParams {
            network_address: self.network_address,
            vlan_id: self.vlan_id,
            strip_passthrough_tags: self.strip_passthrough_tags,
        }
    }
}

/// One physical binding and the interfaces multiplexed over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConfig {
    pub device: String,

    #[serde(default, rename = "interface")]
    pub interfaces: Vec<InterfaceConfig>,
}

impl BindingConfig {
    /// Interface names in configuration order.
    pub fn interface_names(&self) -> Vec<String> {
        self.interfaces.iter().map(|i| i.name.clone()).collect()
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default, rename = "binding")]
    pub bindings: Vec<BindingConfig>,
}

impl MuxConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates a configuration string.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: MuxConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;

        let mut devices = HashSet::new();
        for binding in &self.bindings {
            if binding.device.is_empty() {
                return Err(ConfigError::invalid("binding.device", "must not be empty"));
            }
            if !devices.insert(binding.device.as_str()) {
                return Err(ConfigError::invalid(
                    "binding.device",
                    format!("{} is configured twice", binding.device),
                ));
            }

            let mut names = HashSet::new();
            for iface in &binding.interfaces {
                if iface.name.is_empty() {
                    return Err(ConfigError::invalid(
                        "binding.interface.name",
                        format!("empty interface name on {}", binding.device),
                    ));
                }
                if !names.insert(iface.name.to_uppercase()) {
                    return Err(ConfigError::invalid(
                        "binding.interface.name",
                        format!("{} is configured twice on {}", iface.name, binding.device),
                    ));
                }
                VlanId::new(iface.vlan_id).map_err(|e| {
                    ConfigError::invalid(format!("{}.vlan_id", iface.name), e.to_string())
                })?;
            }
        }
        Ok(())
    }

    /// Looks up a binding by device name.
    pub fn binding(&self, device: &str) -> Option<&BindingConfig> {
        self.bindings.iter().find(|b| b.device == device)
    }

    /// Looks up an interface by name (case-insensitive) across all bindings.
    pub fn interface(&self, name: &str) -> Option<&InterfaceConfig> {
        self.bindings
            .iter()
            .flat_map(|b| b.interfaces.iter())
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// Interface names configured for `device`, empty when unknown.
    pub fn names_for(&self, device: &str) -> Vec<String> {
        self.binding(device)
            .map(BindingConfig::interface_names)
            .unwrap_or_default()
    }
}

fn default_link_speed() -> u32 {
    100_000
}

fn default_lookahead() -> u32 {
    512
}

fn default_rx_batch_capacity() -> usize {
    16
}

fn default_max_multicast_list() -> usize {
    32
}

fn default_max_send_packets() -> u32 {
    16
}

fn default_vendor_description() -> String {
    "netmux virtual interface".to_string()
}

fn default_max_polls() -> u32 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    1
}

fn default_power_drain() -> DrainPolicy {
    DrainPolicy::new(10_000, 1)
}

fn default_halt_drain() -> DrainPolicy {
    DrainPolicy::new(500, 20)
}
