use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};

/// Caller address recorded on audit entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// Attach the caller's [`ClientIp`] when one can be determined.
///
/// `ConnectInfo` is absent when the router is driven without a socket.
pub async fn extract_client_ip(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    if let Some(ip) = resolve_client_ip(request.headers(), peer) {
        request.extensions_mut().insert(ClientIp(ip));
    }
    next.run(request).await
}

/// First usable address from `X-Forwarded-For` (leftmost hop), then
/// `X-Real-IP`, then the socket peer. Unparsable headers are skipped.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    header("x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .and_then(parse_ip)
        .or_else(|| header("x-real-ip").and_then(parse_ip))
        .or_else(|| peer.map(|addr| addr.ip()))
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse().ok()
}
