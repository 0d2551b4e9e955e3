//! Crate-wide error type and the per-request panic boundary (spec §7).

use crate::scorer::SelectionError;
use futures::FutureExt;
use hyper::{Body, Response, StatusCode};
use std::panic::AssertUnwindSafe;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream request timed out")]
    UpstreamTimeout,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("unauthorized")]
    Unauthorized,

    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Selection(SelectionError::NoActiveBackends)
            | AppError::Selection(SelectionError::NoCapacity) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Selection(SelectionError::UnknownTier(_))
            | AppError::Selection(SelectionError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            AppError::Selection(e) => e.reason_code(),
            AppError::Upstream(_) => "UPSTREAM_ERROR",
            AppError::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound => "NOT_FOUND",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Render as the JSON error body described in spec §6.
    pub fn into_response(self) -> Response<Body> {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.reason_code(), "request failed");
        } else {
            tracing::warn!(error = %self, code = self.reason_code(), "request rejected");
        }
        let body = serde_json::json!({
            "error": self.reason_code(),
            "message": self.to_string(),
        });
        Response::builder()
            .status(status)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| Response::new(Body::from("{\"error\":\"INTERNAL_ERROR\"}")))
    }
}

/// Runs `fut` with a panic boundary so one misbehaving request can't take
/// down its connection task (spec §7 "a panic inside request handling is
/// caught at the per-request boundary and surfaced as a 500").
pub async fn catch_panic<F>(fut: F) -> Result<Response<Body>, AppError>
where
    F: std::future::Future<Output = Result<Response<Body>, AppError>> + Send,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(&panic);
            tracing::error!(panic = %message, "request handler panicked");
            Err(AppError::Internal(anyhow::anyhow!("panic: {message}")))
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn catch_panic_converts_to_internal_error() {
        let result = catch_panic(async { panic!("boom") }).await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn catch_panic_passes_through_ok() {
        let result = catch_panic(async { Ok(Response::new(Body::empty())) }).await;
        assert!(result.is_ok());
    }

    #[test]
    fn selection_errors_map_to_503_or_400() {
        assert_eq!(
            AppError::Selection(SelectionError::NoCapacity).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Selection(SelectionError::UnknownTier("x".to_string())).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
