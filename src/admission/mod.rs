//! Admission front: rate limiting, auth, body-size cap and security headers
//! (spec §6 "Authentication", "Rate limiting", "Request body size", "Read-
//! header timeout", and "A fixed security-header set").
//!
//! These checks run in front of every handler except `/health`, mirroring
//! the teacher's layered-middleware shape (`tower::Service` composition)
//! but implemented as a small set of functions the handler calls directly,
//! since `RequestHandler` is a single hand-rolled `Service` rather than a
//! `tower` stack.

use crate::config::{AuthConfig, RateLimitConfig};
use crate::error::AppError;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use hyper::{HeaderMap, Response};
use std::net::IpAddr;
use std::num::NonZeroU32;

type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Per-client-IP token bucket (spec §6 "Rate limiting per client IP
/// (token-bucket) applies to all endpoints").
pub struct RateLimiterFront {
    limiter: Option<KeyedLimiter>,
}

impl RateLimiterFront {
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self { limiter: None };
        }
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::new(1).unwrap());
        let burst = NonZeroU32::new(config.burst.max(config.requests_per_second)).unwrap_or(per_second);
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            limiter: Some(RateLimiter::keyed(quota)),
        }
    }

    /// Returns `Err(AppError::RateLimited)` when the client's bucket is empty.
    pub fn check(&self, client_ip: IpAddr) -> Result<(), AppError> {
        match &self.limiter {
            None => Ok(()),
            Some(limiter) => limiter.check_key(&client_ip).map_err(|_| AppError::RateLimited),
        }
    }
}

/// Validates `X-API-Key` against the configured key list (spec §6).
/// `/health` is exempt; callers skip this check for that route.
pub fn check_auth(config: &AuthConfig, headers: &HeaderMap) -> Result<(), AppError> {
    if !config.enabled() {
        return Ok(());
    }
    let provided = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if config.api_keys.iter().any(|k| k == provided) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Rejects bodies declared (via `Content-Length`) larger than the
/// configured cap. The extractor also buffers the body itself, so this is
/// a cheap early rejection, not the only enforcement.
pub fn check_content_length(headers: &HeaderMap, max_body_bytes: usize) -> Result<(), AppError> {
    if let Some(len) = headers
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok())
    {
        if len > max_body_bytes {
            return Err(AppError::PayloadTooLarge);
        }
    }
    Ok(())
}

/// A fixed set of security headers injected on every response (spec §6).
pub fn apply_security_headers<B>(resp: &mut Response<B>) {
    let headers = resp.headers_mut();
    headers.insert("x-content-type-options", "nosniff".parse().unwrap());
    headers.insert("x-frame-options", "DENY".parse().unwrap());
    headers.insert("referrer-policy", "no-referrer".parse().unwrap());
    headers.insert(
        "strict-transport-security",
        "max-age=63072000; includeSubDomains".parse().unwrap(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_disabled_when_no_keys_configured() {
        let config = AuthConfig { api_keys: vec![] };
        let headers = HeaderMap::new();
        assert!(check_auth(&config, &headers).is_ok());
    }

    #[test]
    fn auth_rejects_missing_or_wrong_key() {
        let config = AuthConfig {
            api_keys: vec!["secret".to_string()],
        };
        let mut headers = HeaderMap::new();
        assert!(matches!(check_auth(&config, &headers), Err(AppError::Unauthorized)));

        headers.insert("x-api-key", "wrong".parse().unwrap());
        assert!(matches!(check_auth(&config, &headers), Err(AppError::Unauthorized)));

        headers.insert("x-api-key", "secret".parse().unwrap());
        assert!(check_auth(&config, &headers).is_ok());
    }

    #[test]
    fn content_length_over_cap_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(hyper::header::CONTENT_LENGTH, "1000".parse().unwrap());
        assert!(check_content_length(&headers, 500).is_err());
        assert!(check_content_length(&headers, 2000).is_ok());
    }

    #[test]
    fn rate_limiter_disabled_always_allows() {
        let front = RateLimiterFront::new(&RateLimitConfig {
            enabled: false,
            requests_per_second: 1,
            burst: 1,
        });
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..10 {
            assert!(front.check(ip).is_ok());
        }
    }

    #[test]
    fn rate_limiter_eventually_rejects_burst() {
        let front = RateLimiterFront::new(&RateLimitConfig {
            enabled: true,
            requests_per_second: 1,
            burst: 1,
        });
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(front.check(ip).is_ok());
        assert!(front.check(ip).is_err());
    }
}
