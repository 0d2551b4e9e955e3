//! Tier/identity extraction for incoming proxied requests (spec §4.6).

use crate::config::ExtractorConfig;
use hyper::header::HeaderMap;
use hyper::{Body, Request, Uri};
use std::net::{IpAddr, SocketAddr};

/// What the proxy needs to know about a request before it can be routed.
#[derive(Debug, Clone)]
pub struct ExtractedIdentity {
    pub tier_name: String,
    pub sticky_id: Option<String>,
    pub client_ip: IpAddr,
}

/// Derive `(tier, sticky_id, client_ip)` from a request and hand back a
/// reconstructed request with its body intact. The body is always fully
/// buffered (so it can be forwarded byte-for-byte); the JSON tier lookup is
/// only attempted when the buffered size is within `max_body_peek_bytes`.
pub async fn extract(
    req: Request<Body>,
    config: &ExtractorConfig,
    sticky_header: Option<&str>,
    trusted_proxy_header: Option<&str>,
    default_tier: &str,
    peer_addr: SocketAddr,
) -> anyhow::Result<(Request<Body>, ExtractedIdentity)> {
    let (parts, body) = req.into_parts();
    let body_bytes = hyper::body::to_bytes(body).await?;

    let tier_name = tier_from_body(&parts.headers, &body_bytes, config)
        .or_else(|| tier_from_query(&parts.uri))
        .or_else(|| tier_from_header(&parts.headers, config))
        .unwrap_or_else(|| default_tier.to_string());

    let sticky_id = sticky_header
        .and_then(|name| parts.headers.get(name))
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    let client_ip = resolve_client_ip(&parts.headers, trusted_proxy_header, peer_addr);

    let identity = ExtractedIdentity {
        tier_name,
        sticky_id,
        client_ip,
    };
    let req = Request::from_parts(parts, Body::from(body_bytes));
    Ok((req, identity))
}

/// Resolve the client's IP from the trusted proxy header (if configured
/// and present) or else the TCP peer address (spec §4.6).
pub fn resolve_client_ip(
    headers: &HeaderMap,
    trusted_proxy_header: Option<&str>,
    peer_addr: SocketAddr,
) -> IpAddr {
    trusted_proxy_header
        .and_then(|name| headers.get(name))
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .unwrap_or(peer_addr.ip())
}

fn tier_from_body(headers: &HeaderMap, body: &[u8], config: &ExtractorConfig) -> Option<String> {
    let content_type = headers.get(hyper::header::CONTENT_TYPE)?.to_str().ok()?;
    if !content_type.starts_with("application/json") || body.is_empty() {
        return None;
    }
    if body.len() > config.max_body_peek_bytes {
        return None;
    }
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get(config.tier_field_name.as_str())?
        .as_str()
        .map(|s| s.to_string())
}

fn tier_from_query(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "tier")
        .map(|(_, v)| v.into_owned())
}

fn tier_from_header(headers: &HeaderMap, config: &ExtractorConfig) -> Option<String> {
    headers
        .get(config.tier_header.as_str())?
        .to_str()
        .ok()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Request;

    fn config() -> ExtractorConfig {
        ExtractorConfig {
            tier_field_name: "tier".to_string(),
            tier_header: "X-Tier".to_string(),
            max_body_peek_bytes: 65536,
        }
    }

    fn peer() -> SocketAddr {
        "203.0.113.9:54321".parse().unwrap()
    }

    #[tokio::test]
    async fn prefers_json_body_field_over_query_and_header() {
        let req = Request::builder()
            .uri("/v1/infer?tier=medium")
            .header("content-type", "application/json")
            .header("x-tier", "lite")
            .body(Body::from(r#"{"tier":"gpu-large","prompt":"hi"}"#))
            .unwrap();
        let (_, identity) = extract(req, &config(), None, None, "lite", peer())
            .await
            .unwrap();
        assert_eq!(identity.tier_name, "gpu-large");
    }

    #[tokio::test]
    async fn falls_back_to_query_then_header_then_default() {
        let req = Request::builder()
            .uri("/v1/infer?tier=medium")
            .header("x-tier", "lite")
            .body(Body::empty())
            .unwrap();
        let (_, identity) = extract(req, &config(), None, None, "lite", peer())
            .await
            .unwrap();
        assert_eq!(identity.tier_name, "medium");

        let req = Request::builder()
            .uri("/v1/infer")
            .header("x-tier", "lite")
            .body(Body::empty())
            .unwrap();
        let (_, identity) = extract(req, &config(), None, None, "lite", peer())
            .await
            .unwrap();
        assert_eq!(identity.tier_name, "lite");

        let req = Request::builder().uri("/v1/infer").body(Body::empty()).unwrap();
        let (_, identity) = extract(req, &config(), None, None, "lite", peer())
            .await
            .unwrap();
        assert_eq!(identity.tier_name, "lite");
    }

    #[tokio::test]
    async fn body_is_preserved_for_forwarding() {
        let payload = r#"{"tier":"medium","prompt":"hello"}"#;
        let req = Request::builder()
            .header("content-type", "application/json")
            .body(Body::from(payload))
            .unwrap();
        let (req, _) = extract(req, &config(), None, None, "lite", peer()).await.unwrap();
        let bytes = hyper::body::to_bytes(req.into_body()).await.unwrap();
        assert_eq!(bytes.as_ref(), payload.as_bytes());
    }

    #[tokio::test]
    async fn sticky_header_and_trusted_proxy_header_are_honored() {
        let req = Request::builder()
            .uri("/v1/infer")
            .header("x-session-id", "sess-42")
            .header("x-forwarded-for", "198.51.100.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        let (_, identity) = extract(
            req,
            &config(),
            Some("x-session-id"),
            Some("x-forwarded-for"),
            "lite",
            peer(),
        )
        .await
        .unwrap();
        assert_eq!(identity.sticky_id.as_deref(), Some("sess-42"));
        assert_eq!(identity.client_ip, "198.51.100.7".parse::<IpAddr>().unwrap());
    }
}
