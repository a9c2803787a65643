//! HTTP response building helpers
//!
//! Provides a consistent API for building HTTP responses across all handlers.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::error::LedgerError;

/// Seconds a client should wait before retrying a transient failure
const RETRY_AFTER_SECS: &str = "1";

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a JSON response with 201 Created status
pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

/// Build a 404 Not Found response with message
pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    json_response(StatusCode::NOT_FOUND, &serde_json::json!({ "error": message }))
}

/// Build a 405 Method Not Allowed response
pub fn method_not_allowed() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &serde_json::json!({ "error": "Method not allowed" }),
    )
}

/// Convert a LedgerError to an appropriate HTTP response
pub fn error_response(error: LedgerError) -> Response<Full<Bytes>> {
    let status = match &error {
        LedgerError::InvalidInput(_) | LedgerError::InvalidWeight(_) | LedgerError::Json(_) => {
            StatusCode::BAD_REQUEST
        }
        LedgerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        LedgerError::Forbidden(_) => StatusCode::FORBIDDEN,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Conflict(_) => StatusCode::CONFLICT,
        LedgerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(error = %error, "Request failed");
    }

    let retriable = error.is_retriable();
    let mut response = json_response(status, &serde_json::json!({ "error": error.to_string() }));
    if retriable {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, header::HeaderValue::from_static(RETRY_AFTER_SECS));
    }
    response
}

/// Result type alias for handlers
pub type HandlerResult = Result<Response<Full<Bytes>>, LedgerError>;

/// Wrap a service result into an HTTP response
pub fn from_result<T: Serialize>(result: Result<T, LedgerError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value),
        Err(e) => error_response(e),
    }
}

/// Wrap a create result into an HTTP response with 201 Created
pub fn from_create_result<T: Serialize>(result: Result<T, LedgerError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => created(&value),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response() {
        let resp = ok(&serde_json::json!({"test": true}));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_retry_after_only_on_transient_errors() {
        let busy = error_response(LedgerError::StoreUnavailable("database is locked".into()));
        assert_eq!(busy.headers()[header::RETRY_AFTER], "1");

        let missing = error_response(LedgerError::NotFound("x".into()));
        assert!(missing.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(error_response(LedgerError::NotFound("x".into())).status(), StatusCode::NOT_FOUND);
        assert_eq!(error_response(LedgerError::InvalidInput("x".into())).status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_response(LedgerError::InvalidWeight(0.0)).status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_response(LedgerError::Forbidden("x".into())).status(), StatusCode::FORBIDDEN);
        assert_eq!(error_response(LedgerError::Conflict("x".into())).status(), StatusCode::CONFLICT);
        assert_eq!(
            error_response(LedgerError::StoreUnavailable("busy".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_response(LedgerError::Internal("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
