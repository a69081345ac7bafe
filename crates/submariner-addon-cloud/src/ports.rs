//! Ports Submariner needs opened between and within clusters

use std::fmt;

use submariner_addon_common::crd::SubmarinerConfigSpec;

/// VXLAN port used by the route agent inside a cluster
pub const ROUTE_PORT: u16 = 4800;
/// Gateway metrics
pub const GATEWAY_METRICS_PORT: u16 = 8080;
/// Globalnet metrics
pub const GLOBALNET_METRICS_PORT: u16 = 8081;
/// IP protocol number of ESP
pub const ESP_PROTOCOL: u8 = 50;
/// IP protocol number of AH
pub const AH_PROTOCOL: u8 = 51;

/// Transport of a firewall opening
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// UDP port
    Udp(u16),
    /// TCP port
    Tcp(u16),
    /// Raw IP protocol number (ESP, AH)
    Ip(u8),
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp(port) => write!(f, "UDP/{port}"),
            Protocol::Tcp(port) => write!(f, "TCP/{port}"),
            Protocol::Ip(proto) => write!(f, "IP/{proto}"),
        }
    }
}

/// A single firewall opening
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortSpec {
    /// What to open
    pub protocol: Protocol,
    /// Human-readable purpose
    pub description: &'static str,
    /// Opened between nodes of the same cluster only
    pub internal: bool,
}

impl PortSpec {
    fn external(protocol: Protocol, description: &'static str) -> Self {
        Self {
            protocol,
            description,
            internal: false,
        }
    }

    fn internal(protocol: Protocol, description: &'static str) -> Self {
        Self {
            protocol,
            description,
            internal: true,
        }
    }
}

/// Openings required for a config
pub fn submariner_ports(spec: &SubmarinerConfigSpec) -> Vec<PortSpec> {
    vec![
        PortSpec::external(Protocol::Udp(spec.ipsec_natt_port), "IPsec NAT-T"),
        PortSpec::external(Protocol::Udp(spec.ipsec_ike_port), "IPsec IKE"),
        PortSpec::external(Protocol::Udp(spec.natt_discovery_port), "NAT discovery"),
        PortSpec::external(Protocol::Ip(ESP_PROTOCOL), "IPsec ESP"),
        PortSpec::external(Protocol::Ip(AH_PROTOCOL), "IPsec AH"),
        PortSpec::internal(Protocol::Udp(ROUTE_PORT), "route agent VXLAN"),
        PortSpec::internal(Protocol::Tcp(GATEWAY_METRICS_PORT), "gateway metrics"),
        PortSpec::internal(Protocol::Tcp(GLOBALNET_METRICS_PORT), "globalnet metrics"),
    ]
}

/// One-line summary, e.g. `UDP/4500 (IPsec NAT-T), UDP/500 (IPsec IKE)`
pub fn describe_ports(ports: &[PortSpec]) -> String {
    ports
        .iter()
        .map(|p| format!("{} ({})", p.protocol, p.description))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_opens_standard_ports() {
        let ports = submariner_ports(&SubmarinerConfigSpec::default());
        let external: Vec<_> = ports.iter().filter(|p| !p.internal).map(|p| p.protocol).collect();
        assert_eq!(
            external,
            vec![
                Protocol::Udp(4500),
                Protocol::Udp(500),
                Protocol::Udp(4490),
                Protocol::Ip(50),
                Protocol::Ip(51),
            ]
        );
        assert!(ports.iter().any(|p| p.internal && p.protocol == Protocol::Udp(4800)));
    }

    #[test]
    fn custom_ports_are_honoured() {
        let spec = SubmarinerConfigSpec {
            ipsec_natt_port: 4501,
            ipsec_ike_port: 501,
            ..Default::default()
        };
        let ports = submariner_ports(&spec);
        assert_eq!(ports[0].protocol, Protocol::Udp(4501));
        assert_eq!(ports[1].protocol, Protocol::Udp(501));
    }

    #[test]
    fn summary_names_each_opening() {
        let ports = submariner_ports(&SubmarinerConfigSpec::default());
        let summary = describe_ports(&ports[..2]);
        assert_eq!(summary, "UDP/4500 (IPsec NAT-T), UDP/500 (IPsec IKE)");
    }
}
