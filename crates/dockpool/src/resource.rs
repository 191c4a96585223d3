//! Provisioned container handle and published-port lookup.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

/// Transport protocol of a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Sctp => "sctp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = PoolError;

    fn from_str(s: &str) -> PoolResult<Self> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "sctp" => Ok(Self::Sctp),
            other => Err(PoolError::InvalidPort(format!(
                "unknown protocol {:?}",
                other
            ))),
        }
    }
}

/// A container-side port, written `80/tcp` by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    pub number: u16,
    pub protocol: Protocol,
}

impl Port {
    pub fn new(number: u16, protocol: Protocol) -> Self {
        Self { number, protocol }
    }

    pub fn tcp(number: u16) -> Self {
        Self::new(number, Protocol::Tcp)
    }

    pub fn udp(number: u16) -> Self {
        Self::new(number, Protocol::Udp)
    }

    /// Parse a `(protocol, port)` pair such as `("tcp", "80")`.
    pub fn parse(proto: &str, port: &str) -> PoolResult<Self> {
        let protocol = proto.parse()?;
        let number = match port.parse::<u16>() {
            Ok(0) | Err(_) => {
                return Err(PoolError::InvalidPort(format!(
                    "invalid port number {:?}",
                    port
                )))
            }
            Ok(n) => n,
        };
        Ok(Self { number, protocol })
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol)
    }
}

impl FromStr for Port {
    type Err = PoolError;

    fn from_str(s: &str) -> PoolResult<Self> {
        match s.split_once('/') {
            Some((port, proto)) => Self::parse(proto, port),
            None => Self::parse("tcp", s),
        }
    }
}

/// A host-side binding of a published port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: String,
}

impl PortBinding {
    pub fn new(host_ip: impl Into<String>, host_port: impl Into<String>) -> Self {
        Self {
            host_ip: host_ip.into(),
            host_port: host_port.into(),
        }
    }

    /// `host:port`, with IPv6 hosts in brackets.
    pub fn address(&self) -> String {
        if self.host_ip.contains(':') {
            format!("[{}]:{}", self.host_ip, self.host_port)
        } else {
            format!("{}:{}", self.host_ip, self.host_port)
        }
    }
}

/// Published ports as reported by inspect, bindings in engine order.
pub type PortMap = HashMap<Port, Vec<PortBinding>>;

/// A running container returned by [`crate::Pool::run`].
///
/// The port map is captured once, right after the container starts, and is
/// never refreshed.
#[derive(Debug, Clone)]
pub struct Resource {
    id: String,
    ports: PortMap,
}

impl Resource {
    pub(crate) fn new(id: impl Into<String>, ports: PortMap) -> Self {
        Self {
            id: id.into(),
            ports,
        }
    }

    /// A handle that only knows its container id, for purging containers
    /// whose `run` was cancelled or that were found by external tooling.
    pub fn detached(id: impl Into<String>) -> Self {
        Self::new(id, PortMap::new())
    }

    /// Engine-assigned container id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ports(&self) -> &PortMap {
        &self.ports
    }

    /// All host bindings of a published port.
    pub fn bindings(&self, port: Port) -> &[PortBinding] {
        self.ports.get(&port).map(Vec::as_slice).unwrap_or_default()
    }

    /// Resolve a container port to the `host:port` address of its first
    /// binding.
    ///
    /// Fails with [`PoolError::InvalidPort`] when the pair does not parse and
    /// with [`PoolError::PortNotFound`] when the port was never published.
    pub fn host_port(&self, proto: &str, port: &str) -> PoolResult<String> {
        let port = Port::parse(proto, port)?;
        self.bindings(port)
            .first()
            .map(PortBinding::address)
            .ok_or_else(|| PoolError::PortNotFound(port.to_string()))
    }
}
