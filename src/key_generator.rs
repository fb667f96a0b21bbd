//! Client key derivation for rate limiting.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use std::net::{IpAddr, Ipv4Addr};

pub const CLIENT_IP_HEADER: &str = "client-ip";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Derives the opaque key a client's rate window is stored under.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    namespace: String,
}

impl KeyGenerator {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// `<namespace>:<sha256(ip) as hex>`. The address itself never appears
    /// in the key.
    pub fn generate_key(&self, ip: &IpAddr) -> String {
        let digest = Sha256::digest(ip.to_string().as_bytes());
        format!("{}:{}", self.namespace, hex::encode(digest))
    }

    /// Client address by precedence: `Client-IP` header, then the first
    /// entry of `X-Forwarded-For`, then the peer address.
    ///
    /// The first source that is present wins even if it does not parse; an
    /// unparsable or missing address becomes `0.0.0.0`.
    pub fn extract_client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> IpAddr {
        let header_value = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let candidate = header_value(CLIENT_IP_HEADER).or_else(|| {
            header_value(FORWARDED_FOR_HEADER)
                .and_then(|xff| xff.split(',').next())
                .map(str::trim)
        });

        match candidate {
            Some(raw) => raw
                .parse()
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            None => peer.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        }
    }

    pub fn key_for_request(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> String {
        self.generate_key(&Self::extract_client_ip(headers, peer))
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new("ip")
    }
}
