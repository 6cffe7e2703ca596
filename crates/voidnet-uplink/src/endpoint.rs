//! Satellite agent addressing.

use std::net::{IpAddr, SocketAddr};

/// Port the agent listens on when the registered address carries none.
pub const DEFAULT_AGENT_PORT: u16 = 8001;

/// Where a satellite's agent lives and the key it expects.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentEndpoint {
    address: String,
    api_key: String,
}

impl AgentEndpoint {
    pub fn new(address: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            api_key: api_key.into(),
        }
    }

    /// Address as registered.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    /// `host:port` to connect to. An address that already names a port is
    /// used verbatim; otherwise `default_port` is appended.
    pub fn authority(&self, default_port: u16) -> String {
        let address = self.address.trim();
        if address.parse::<SocketAddr>().is_ok() {
            return address.to_string();
        }
        if let Ok(ip) = address.parse::<IpAddr>() {
            return SocketAddr::new(ip, default_port).to_string();
        }
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                address.to_string()
            }
            _ => format!("{address}:{default_port}"),
        }
    }
}

impl std::fmt::Debug for AgentEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentEndpoint")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(address: &str) -> AgentEndpoint {
        AgentEndpoint::new(address, "k")
    }

    #[test]
    fn bare_ip_gets_default_port() {
        assert_eq!(endpoint("10.0.0.5").authority(8001), "10.0.0.5:8001");
        assert_eq!(endpoint("::1").authority(8001), "[::1]:8001");
    }

    #[test]
    fn explicit_port_is_kept() {
        assert_eq!(endpoint("10.0.0.5:9000").authority(8001), "10.0.0.5:9000");
        assert_eq!(endpoint("sat-a.lan:9000").authority(8001), "sat-a.lan:9000");
    }

    #[test]
    fn hostname_gets_default_port() {
        assert_eq!(endpoint("sat-a.lan").authority(8001), "sat-a.lan:8001");
    }

    #[test]
    fn debug_hides_key() {
        let rendered = format!("{:?}", AgentEndpoint::new("10.0.0.5", "supersecret"));
        assert!(!rendered.contains("supersecret"));
    }
}
