//! Station identity tags
//!
//! Each station is known to the transport system by a short tag. The plant
//! names stations after their PLC address: `B` plus the final IPv4 octet.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Short station tag used in routing messages, topics and logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationIdentity(String);

impl StationIdentity {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Derive the plant tag from the station's field-bus host.
    /// Returns `None` when the host is not an IPv4 address.
    pub fn from_bus_host(host: &str) -> Option<Self> {
        match host.parse::<IpAddr>().ok()? {
            IpAddr::V4(addr) => Some(Self(format!("B{}", addr.octets()[3]))),
            IpAddr::V6(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
