// src/proxy/forward.rs
use super::endpoint::select_endpoint;
use crate::error::AppError;
use crate::registry::BackendDescriptor;
use hyper::client::HttpConnector;
use hyper::{Body, Client, HeaderMap, Request, Response, Uri};
use hyper_tls::HttpsConnector;
use std::time::Duration;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub type ProxyClient = Client<HttpsConnector<HttpConnector>, Body>;

pub fn build_client() -> ProxyClient {
    let https = HttpsConnector::new();
    Client::builder().build(https)
}

/// Forward `req` to the endpoint of `desc` authoritative for its path,
/// preserving the path and stripping hop-by-hop headers (spec §4.7).
pub async fn forward(
    client: &ProxyClient,
    desc: &BackendDescriptor,
    mut req: Request<Body>,
    timeout: Duration,
) -> Result<Response<Body>, AppError> {
    let endpoint = select_endpoint(desc, req.uri().path());
    *req.uri_mut() = rewrite_uri(&endpoint.url, req.uri())?;
    strip_hop_by_hop(req.headers_mut());

    match tokio::time::timeout(timeout, client.request(req)).await {
        Ok(Ok(mut resp)) => {
            strip_hop_by_hop(resp.headers_mut());
            Ok(resp)
        }
        Ok(Err(e)) => Err(AppError::Upstream(e.to_string())),
        Err(_) => Err(AppError::UpstreamTimeout),
    }
}

fn rewrite_uri(endpoint: &url::Url, original: &Uri) -> Result<Uri, AppError> {
    let host = endpoint
        .host_str()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("endpoint URL has no host")))?;
    let authority = match endpoint.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let path_and_query = original.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    Uri::builder()
        .scheme(endpoint.scheme())
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_preserves_path_and_query_replaces_authority() {
        let endpoint: url::Url = "http://backend-1.internal:9100".parse().unwrap();
        let original: Uri = "/v1/infer?tier=medium".parse().unwrap();
        let rewritten = rewrite_uri(&endpoint, &original).unwrap();
        assert_eq!(rewritten.authority().unwrap().as_str(), "backend-1.internal:9100");
        assert_eq!(rewritten.path_and_query().unwrap().as_str(), "/v1/infer?tier=medium");
        assert_eq!(rewritten.scheme_str(), Some("http"));
    }

    #[test]
    fn strip_hop_by_hop_removes_only_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("x-request-id", "abc".parse().unwrap());
        strip_hop_by_hop(&mut headers);
        assert!(headers.get("connection").is_none());
        assert!(headers.get("x-request-id").is_some());
    }
}
