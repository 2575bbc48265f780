//! Host candidates for TCP endpoints.
//!
//! Candidates use the familiar ICE line format so they travel in the same
//! descriptor field as any other candidate:
//!
//! ```text
//! candidate:<foundation> 1 tcp <priority> <ip> <port> typ host
//! ```

use crate::config::DirectConfig;
use crate::descriptor::NetworkCandidate;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::debug;

const BASE_PRIORITY: u32 = 2_130_706_431;

/// Formats a host candidate. Lower `index` gets higher priority.
pub fn host_candidate(index: usize, addr: SocketAddr) -> NetworkCandidate {
    let priority = BASE_PRIORITY.saturating_sub(index as u32);
    NetworkCandidate::new(format!(
        "candidate:{} 1 tcp {} {} {} typ host",
        index + 1,
        priority,
        addr.ip(),
        addr.port()
    ))
}

/// Extracts the address of a TCP host candidate.
pub fn parse_candidate(candidate: &NetworkCandidate) -> Option<SocketAddr> {
    let line = candidate.candidate.trim();
    let line = line.strip_prefix("a=").unwrap_or(line);
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 || !fields[0].starts_with("candidate:") {
        return None;
    }
    if !fields[2].eq_ignore_ascii_case("tcp") || fields[6] != "typ" {
        return None;
    }
    let ip: IpAddr = fields[4].parse().ok()?;
    let port: u16 = fields[5].parse().ok()?;
    Some(SocketAddr::new(ip, port))
}

/// Addresses under which a listener bound to `bound` can be reached.
pub async fn gather_addresses(config: &DirectConfig, bound: SocketAddr) -> Vec<SocketAddr> {
    let port = bound.port();
    let mut ips: Vec<IpAddr> = Vec::new();

    if !bound.ip().is_unspecified() {
        ips.push(bound.ip());
    } else {
        ips.extend(config.advertise_addrs.iter().copied());
        if config.discover_outbound {
            match outbound_ip().await {
                Some(ip) => ips.push(ip),
                None => debug!("No outbound interface found"),
            }
        }
        if config.include_loopback {
            ips.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
    }

    let mut out: Vec<SocketAddr> = Vec::new();
    for ip in ips {
        let addr = SocketAddr::new(ip, port);
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    out
}

/// The local address of the interface holding the default route.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
async fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).await.ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified() && !ip.is_loopback()).then_some(ip)
}
