//! Peer addressing: interconnect protocol tags, peer URLs and host resolution.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DimError, Result};

/// Host used when neither an address nor an interface is configured
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Interconnect protocol tag carried in every peer URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "tcp")]
    Tcp,
    #[serde(rename = "verbs")]
    Verbs,
    #[serde(rename = "ofi+tcp")]
    OfiTcp,
    #[serde(rename = "ofi+verbs")]
    OfiVerbs,
    #[serde(rename = "ofi+gni")]
    OfiGni,
    #[serde(rename = "ucx+tcp")]
    UcxTcp,
    #[serde(rename = "ucx+verbs")]
    UcxVerbs,
    #[serde(rename = "sm+shm")]
    SmShm,
    #[serde(rename = "bmi+tcp")]
    BmiTcp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Verbs => "verbs",
            Protocol::OfiTcp => "ofi+tcp",
            Protocol::OfiVerbs => "ofi+verbs",
            Protocol::OfiGni => "ofi+gni",
            Protocol::UcxTcp => "ucx+tcp",
            Protocol::UcxVerbs => "ucx+verbs",
            Protocol::SmShm => "sm+shm",
            Protocol::BmiTcp => "bmi+tcp",
        }
    }

    /// Whether the stream-emulated bulk backend can carry this protocol.
    pub fn is_stream_based(self) -> bool {
        matches!(
            self,
            Protocol::Tcp | Protocol::OfiTcp | Protocol::UcxTcp | Protocol::BmiTcp
        )
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = DimError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "tcp" => Protocol::Tcp,
            "verbs" => Protocol::Verbs,
            "ofi+tcp" => Protocol::OfiTcp,
            "ofi+verbs" => Protocol::OfiVerbs,
            "ofi+gni" => Protocol::OfiGni,
            "ucx+tcp" => Protocol::UcxTcp,
            "ucx+verbs" => Protocol::UcxVerbs,
            "sm+shm" => Protocol::SmShm,
            "bmi+tcp" => Protocol::BmiTcp,
            other => return Err(DimError::UnsupportedProtocol(other.to_string())),
        })
    }
}

/// Address of a peer daemon, rendered as `protocol://host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerUrl {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl PeerUrl {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
        }
    }

    /// Same peer on a different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }
}

impl fmt::Display for PeerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.protocol, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
        }
    }
}

impl FromStr for PeerUrl {
    type Err = DimError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DimError::InvalidAddress(s.to_string());

        let (protocol, rest) = s.split_once("://").ok_or_else(invalid)?;
        let protocol: Protocol = protocol.parse()?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self::new(protocol, host, port))
    }
}

/// IPv4 address assigned to the named network interface.
#[cfg(unix)]
pub fn resolve_interface(name: &str) -> Result<String> {
    use nix::ifaddrs::getifaddrs;
    use std::net::SocketAddrV4;

    let addrs = getifaddrs()
        .map_err(|e| DimError::AddressResolution(format!("getifaddrs failed: {e}")))?;

    addrs
        .filter(|ifa| ifa.interface_name == name)
        .find_map(|ifa| {
            ifa.address
                .as_ref()
                .and_then(|addr| addr.as_sockaddr_in().copied())
                .map(|sin| SocketAddrV4::from(sin).ip().to_string())
        })
        .ok_or_else(|| {
            DimError::AddressResolution(format!("no IPv4 address on interface '{name}'"))
        })
}

#[cfg(not(unix))]
pub fn resolve_interface(name: &str) -> Result<String> {
    Err(DimError::AddressResolution(format!(
        "interface lookup is not supported on this platform (interface '{name}')"
    )))
}

/// Host the local daemon binds: explicit address, then interface, then loopback.
pub fn resolve_host(address: Option<&str>, interface: Option<&str>) -> Result<String> {
    match (address, interface) {
        (Some(address), _) => Ok(address.to_string()),
        (None, Some(interface)) => resolve_interface(interface),
        (None, None) => Ok(LOOPBACK_HOST.to_string()),
    }
}
