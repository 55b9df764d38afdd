//! Client address resolution.
//!
//! The socket peer is the client unless it is a configured proxy. Only then
//! are `X-Forwarded-For` and `X-Real-IP` consulted, so a direct caller cannot
//! pick its own address by sending those headers.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

/// The resolved client address, stored in request extensions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// Peers allowed to report the original client address.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies(Arc<[IpAddr]>);

impl TrustedProxies {
    pub fn new(proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        Self(proxies.into_iter().collect())
    }

    fn contains(&self, ip: IpAddr) -> bool {
        self.0.contains(&ip)
    }

    /// Resolve the client for a request received from `peer`.
    ///
    /// Forwarded hops are read right to left; the first one that is not itself
    /// a trusted proxy is the client.
    pub fn resolve(&self, peer: IpAddr, headers: &HeaderMap) -> IpAddr {
        if !self.contains(peer) {
            return peer;
        }

        if let Some(chain) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            let hops: Vec<IpAddr> = chain
                .split(',')
                .filter_map(|hop| hop.trim().parse().ok())
                .collect();
            if let Some(client) = hops.iter().rev().find(|hop| !self.contains(**hop)) {
                return *client;
            }
            if let Some(first) = hops.first() {
                return *first;
            }
        }

        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(peer)
    }
}

/// Attach [`ClientIp`] for requests that carry a socket peer.
pub async fn client_ip_middleware(
    State(trusted): State<TrustedProxies>,
    mut req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    if let Some(peer) = peer {
        let client = trusted.resolve(peer, req.headers());
        req.extensions_mut().insert(ClientIp(client));
    }
    next.run(req).await
}

/// The resolved client address, else the socket peer, else `"unknown"`.
pub fn client_ip(req: &Request) -> String {
    if let Some(ClientIp(ip)) = req.extensions().get::<ClientIp>() {
        return ip.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
