//! Client IP extraction with proxy support
//!
//! `X-Forwarded-For` and `X-Real-IP` are only believed when the connection
//! peer is a trusted proxy (`TRUSTED_PROXIES`, IPs or CIDRs). With no trusted
//! proxies configured the peer address is always used.
//!
//! `X-Forwarded-For` is walked right-to-left: the first address that is not a
//! trusted proxy is the client. Entries a client prepends itself are never
//! reached.
//!
//! Example: `X-Forwarded-For: spoofed, real-client, trusted-proxy`
//! - trusted-proxy is skipped, real-client is returned

use actix_web::{web, HttpRequest};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProxyRule {
    Addr(IpAddr),
    Cidr(IpAddr, u8),
}

impl ProxyRule {
    fn matches(&self, ip: &IpAddr) -> bool {
        match self {
            ProxyRule::Addr(addr) => addr == ip,
            ProxyRule::Cidr(network, prefix) => ip_in_cidr(ip, network, *prefix),
        }
    }
}

/// Proxies whose forwarding headers are trusted
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    rules: Vec<ProxyRule>,
}

impl TrustedProxies {
    /// Parse configured entries; invalid ones are skipped with a warning
    pub fn new(entries: &[String]) -> Self {
        let rules = entries
            .iter()
            .filter_map(|entry| {
                let rule = parse_rule(entry.trim());
                if rule.is_none() {
                    warn!(entry = %entry, "Ignoring invalid trusted proxy entry");
                }
                rule
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn is_trusted(&self, ip: &str) -> bool {
        match parse_ip(ip) {
            Some(addr) => self.rules.iter().any(|rule| rule.matches(&addr)),
            None => false,
        }
    }

    /// Client IP for a request whose connection peer is `peer`
    pub fn client_ip(&self, peer: &str, forwarded_for: Option<&str>, real_ip: Option<&str>) -> String {
        if !self.is_trusted(peer) {
            return peer.to_string();
        }

        if let Some(chain) = forwarded_for {
            for ip in chain.split(',').map(str::trim).rev() {
                if parse_ip(ip).is_none() {
                    warn!(ip = %ip, "Invalid IP in X-Forwarded-For chain, skipping");
                    continue;
                }
                if !self.is_trusted(ip) {
                    debug!(client_ip = %ip, peer_ip = %peer, "Client IP from X-Forwarded-For");
                    return ip.to_string();
                }
            }
        }

        if let Some(value) = real_ip.map(str::trim) {
            if parse_ip(value).is_some() {
                return value.to_string();
            }
        }

        peer.to_string()
    }
}

fn parse_rule(entry: &str) -> Option<ProxyRule> {
    match entry.split_once('/') {
        Some((network, prefix)) => {
            let network = IpAddr::from_str(network).ok()?;
            let prefix: u8 = prefix.parse().ok()?;
            let max = if network.is_ipv4() { 32 } else { 128 };
            (prefix <= max).then_some(ProxyRule::Cidr(network, prefix))
        }
        None => IpAddr::from_str(entry).ok().map(ProxyRule::Addr),
    }
}

/// Accepts a bare address or `address:port`
fn parse_ip(raw: &str) -> Option<IpAddr> {
    IpAddr::from_str(raw)
        .ok()
        .or_else(|| SocketAddr::from_str(raw).ok().map(|s| s.ip()))
}

fn ip_in_cidr(ip: &IpAddr, network: &IpAddr, prefix: u8) -> bool {
    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            let mask = if prefix == 0 { 0 } else { !0u32 << (32 - prefix) };
            (u32::from(*ip) & mask) == (u32::from(*net) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            let mask = if prefix == 0 { 0 } else { !0u128 << (128 - prefix) };
            (u128::from(*ip) & mask) == (u128::from(*net) & mask)
        }
        _ => false,
    }
}

/// Extract the client's IP address from the request
///
/// Uses the [`TrustedProxies`] registered as app data; without it only the
/// peer address is used. Returns "unknown" when there is no peer address.
pub fn extract_ip(req: &HttpRequest) -> String {
    let peer = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let Some(proxies) = req.app_data::<web::Data<TrustedProxies>>() else {
        return peer;
    };

    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());
    proxies.client_ip(&peer, header("X-Forwarded-For"), header("X-Real-IP"))
}
