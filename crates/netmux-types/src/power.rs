//! Device power states, media connection status and link medium.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device power state of a binding or a virtual interface.
///
/// `D0` is the working state. Every other state counts as low power and
/// stops traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    #[default]
    D0,
    D1,
    D2,
    D3,
}

impl PowerState {
    /// Returns true for any state other than `D0`.
    pub const fn is_low_power(&self) -> bool {
        !matches!(self, PowerState::D0)
    }

    /// Decodes the 32-bit device state used in set-power requests.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(PowerState::D0),
            2 => Some(PowerState::D1),
            3 => Some(PowerState::D2),
            4 => Some(PowerState::D3),
            _ => None,
        }
    }

    /// Encodes the state for set-power requests.
    pub const fn code(&self) -> u32 {
        match self {
            PowerState::D0 => 1,
            PowerState::D1 => 2,
            PowerState::D2 => 3,
            PowerState::D3 => 4,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PowerState::D0 => "D0",
            PowerState::D1 => "D1",
            PowerState::D2 => "D2",
            PowerState::D3 => "D3",
        };
        f.write_str(name)
    }
}

impl FromStr for PowerState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "d0" | "working" => Ok(PowerState::D0),
            "d1" => Ok(PowerState::D1),
            "d2" => Ok(PowerState::D2),
            "d3" | "off" => Ok(PowerState::D3),
            _ => Err(ParseError::InvalidPowerState(s.to_string())),
        }
    }
}

/// Media connection status reported by the physical adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaState {
    #[default]
    Connected,
    Disconnected,
}

impl MediaState {
    /// Encodes the status the way a media-connect-status query reports it.
    pub const fn code(&self) -> u32 {
        match self {
            MediaState::Connected => 0,
            MediaState::Disconnected => 1,
        }
    }
}

/// Link medium negotiated when the lower binding is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Medium {
    /// IEEE 802.3 Ethernet, the only medium the engine multiplexes.
    Ethernet,
    /// Anything else, identified by the lower layer's medium code.
    Other(u32),
}

impl Medium {
    pub const fn code(&self) -> u32 {
        match self {
            Medium::Ethernet => 0,
            Medium::Other(code) => *code,
        }
    }
}
