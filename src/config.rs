//! Default configuration constants and well-known channel names.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// Default listening port for the simulation server.
pub const DEFAULT_PORT: u16 = 42932;

/// Request channel on which the server answers with a scenario preview.
pub const CH_SCENARIO_PREVIEW: &str = "general.scenario.preview";

/// Request channel on which the server answers with the list of scenario titles.
pub const CH_CORE_SCENARIO_TITLES: &str = "general.core.scenarios.titles";

/// Binding restriction for a [`Listener`](crate::Listener).
///
/// `Local` restricts acceptance to same-host callers; `Any` listens on all
/// interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Loopback only (`127.0.0.1`).
    Local,
    /// All interfaces (`0.0.0.0`).
    Any,
}

impl Scope {
    /// The host address this scope binds to.
    pub fn host(self) -> IpAddr {
        match self {
            Scope::Local => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Scope::Any => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}
