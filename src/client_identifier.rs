//! Resolution of inbound request identity into a rate limit key.

use axum::http::HeaderMap;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const REAL_IP_HEADER: &str = "x-real-ip";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

const UNKNOWN_CLIENT: &str = "unknown";

/// Opaque, non-empty identifier of a client. Requests with equal keys share
/// one quota.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RateLimitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity signals presented by a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSignals {
    pub api_key: Option<String>,
    pub client_id: Option<String>,
    /// Address reported by a trusted proxy.
    pub real_ip: Option<String>,
    /// Raw `X-Forwarded-For` chain, comma separated.
    pub forwarded_for: Option<String>,
    /// Peer address of the connection.
    pub remote_addr: Option<SocketAddr>,
}

impl RequestSignals {
    pub fn from_headers(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            api_key: header(API_KEY_HEADER),
            client_id: header(CLIENT_ID_HEADER),
            real_ip: header(REAL_IP_HEADER),
            forwarded_for: header(FORWARDED_FOR_HEADER),
            remote_addr,
        }
    }
}

/// Which hop of the forwarded chain identifies the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardedHop {
    /// The left-most address, i.e. the original client.
    #[default]
    First,
    /// Zero-based position in the chain. Falls back to the first hop when the
    /// chain is shorter.
    Nth(usize),
}

impl From<usize> for ForwardedHop {
    fn from(index: usize) -> Self {
        if index == 0 {
            ForwardedHop::First
        } else {
            ForwardedHop::Nth(index)
        }
    }
}

/// Picks the rate limit key from request signals.
///
/// Precedence, first non-empty wins: API key, client id, real IP, forwarded
/// chain, connection address.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentifier {
    forwarded_hop: ForwardedHop,
}

impl ClientIdentifier {
    pub fn new(forwarded_hop: ForwardedHop) -> Self {
        Self { forwarded_hop }
    }

    pub fn resolve(&self, signals: &RequestSignals) -> RateLimitKey {
        let key = non_empty(signals.api_key.as_deref())
            .or_else(|| non_empty(signals.client_id.as_deref()))
            .or_else(|| non_empty(signals.real_ip.as_deref()))
            .or_else(|| {
                signals
                    .forwarded_for
                    .as_deref()
                    .and_then(|chain| self.pick_hop(chain))
            })
            .map(str::to_string)
            .or_else(|| signals.remote_addr.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

        RateLimitKey(key)
    }

    fn pick_hop<'a>(&self, chain: &'a str) -> Option<&'a str> {
        let hops: Vec<&str> = chain
            .split(',')
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .collect();

        match self.forwarded_hop {
            ForwardedHop::First => hops.first().copied(),
            ForwardedHop::Nth(index) => hops.get(index).or_else(|| hops.first()).copied(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
