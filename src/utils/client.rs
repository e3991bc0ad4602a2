// src/utils/client.rs

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, header},
    middleware::Next,
    response::Response,
};

use crate::config::Config;

/// Who is on the other end of the request, as recorded in the audit trail.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: String,
}

/// Resolves the client IP behind an optional reverse proxy.
///
/// The first `X-Forwarded-For` hop is used when the direct peer is a trusted
/// proxy, or when no proxies are configured. Otherwise the peer address wins.
pub fn resolve_client_ip(
    peer: Option<String>,
    forwarded_for: Option<&str>,
    trusted_proxies: &[String],
) -> Option<String> {
    let peer_trusted = match &peer {
        Some(addr) => trusted_proxies.is_empty() || trusted_proxies.contains(addr),
        None => trusted_proxies.is_empty(),
    };

    if peer_trusted {
        let first_hop = forwarded_for
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = first_hop {
            return Some(hop.to_string());
        }
    }

    peer
}

/// Axum Middleware: attaches a `ClientContext` to every request.
pub async fn client_context_middleware(
    State(config): State<Config>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let forwarded_for = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok());

    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let context = ClientContext {
        ip: resolve_client_ip(peer, forwarded_for, &config.trusted_proxies),
        user_agent,
    };

    req.extensions_mut().insert(context);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_header_honoured_from_trusted_proxy() {
        let trusted = vec!["10.0.0.1".to_string()];
        assert_eq!(
            resolve_client_ip(
                Some("10.0.0.1".into()),
                Some("203.0.113.9, 10.0.0.1"),
                &trusted
            ),
            Some("203.0.113.9".to_string())
        );
    }

    #[test]
    fn forwarded_header_ignored_from_untrusted_peer() {
        let trusted = vec!["10.0.0.1".to_string()];
        assert_eq!(
            resolve_client_ip(Some("198.51.100.4".into()), Some("203.0.113.9"), &trusted),
            Some("198.51.100.4".to_string())
        );
    }

    #[test]
    fn no_proxy_list_trusts_header() {
        assert_eq!(
            resolve_client_ip(Some("127.0.0.1".into()), Some(" 203.0.113.9 "), &[]),
            Some("203.0.113.9".to_string())
        );
        assert_eq!(
            resolve_client_ip(Some("127.0.0.1".into()), None, &[]),
            Some("127.0.0.1".to_string())
        );
        assert_eq!(resolve_client_ip(None, None, &[]), None);
    }
}
