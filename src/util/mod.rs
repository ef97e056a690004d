use std::net::{IpAddr, SocketAddr};

use local_ip_address::{list_afinet_netifas, local_ip};
use str0m::net::Protocol;
use str0m::Candidate;
use tracing::{debug, info};

use crate::error::{ClientError, Result};

/// Pick an IPv4 address that can be shared with the gateway as an ICE host candidate.
///
/// Walks the network interfaces, skipping loopback, link-local and broadcast
/// addresses, and falls back to the address of the default route.
pub fn select_host_address() -> Result<IpAddr> {
    if let Ok(interfaces) = list_afinet_netifas() {
        for (name, ip) in interfaces {
            debug!("iface: {} / {:?}", name, ip);
            if let IpAddr::V4(v4) = ip {
                if !v4.is_loopback() && !v4.is_link_local() && !v4.is_broadcast() {
                    info!(%ip, iface = %name, "Selected host address");
                    return Ok(ip);
                }
            }
        }
    }

    local_ip().map_err(|e| ClientError::Peer(format!("no usable network interface: {e}")))
}

/// A UDP host candidate for a bound socket address
pub fn host_candidate(addr: SocketAddr) -> Result<Candidate> {
    Candidate::host(addr, Protocol::Udp)
        .map_err(|e| ClientError::Peer(format!("invalid host candidate {addr}: {e}")))
}

/// `mid` of the first media section of an SDP blob
pub fn first_mid(sdp: &str) -> Option<String> {
    sdp.lines()
        .find_map(|line| line.trim_end().strip_prefix("a=mid:"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_mid() {
        let sdp = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:1\r\n";
        assert_eq!(first_mid(sdp).as_deref(), Some("0"));
        assert_eq!(first_mid("v=0\r\n"), None);
    }

    #[test]
    fn test_host_candidate() {
        let addr: SocketAddr = "192.168.1.20:40000".parse().unwrap();
        let candidate = host_candidate(addr).unwrap();
        assert_eq!(candidate.addr(), addr);
    }
}
