//! Failures of link creation and how they reach the client.
//!
//! Every variant is reported immediately; nothing is retried. The
//! `X-Link-Error` response header carries a stable code so clients can tell
//! the variants apart even when the store's status is passed through.

use super::LINK_ERROR;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    /// Same source and destination, or a malformed `X-Link-To`. No store call
    /// has been made.
    #[error("invalid link request: {0}")]
    InvalidLinkRequest(String),

    /// The access check on the source failed.
    #[error("the main object {path} does not exist or is not accessible ({status}): {detail}")]
    SourceNotFound {
        path: String,
        status: StatusCode,
        detail: String,
    },

    /// The source is itself a link stub.
    #[error("{path} is already a link{}", pointer_suffix(.pointer))]
    AlreadyLinked {
        path: String,
        pointer: Option<String>,
    },

    /// Copying the payload failed; nothing was written.
    #[error("relocating {path} to {dest} failed ({status}): {detail}")]
    RelocationFailed {
        path: String,
        dest: String,
        status: StatusCode,
        detail: String,
    },

    /// The payload was copied but the stub could not be written.
    #[error(
        "payload copied to {dest} but writing the link stub at {path} failed ({status}): {detail}; \
         {path} still holds the original object"
    )]
    PartialLinkFailure {
        path: String,
        dest: String,
        status: StatusCode,
        detail: String,
    },
}

impl LinkError {
    /// Stable machine-readable code, sent as `X-Link-Error`.
    pub fn code(&self) -> &'static str {
        match self {
            LinkError::InvalidLinkRequest(_) => "invalid-link-request",
            LinkError::SourceNotFound { .. } => "source-not-found",
            LinkError::AlreadyLinked { .. } => "already-linked",
            LinkError::RelocationFailed { .. } => "relocation-failed",
            LinkError::PartialLinkFailure { .. } => "partial-link-failure",
        }
    }

    /// HTTP status reported to the client.
    ///
    /// Store failures keep the store's status when it is an error status so
    /// `404`/`403` survive; a non-error status from a failed step becomes 502.
    pub fn status(&self) -> StatusCode {
        match self {
            LinkError::InvalidLinkRequest(_) => StatusCode::BAD_REQUEST,
            LinkError::SourceNotFound { status, .. } => error_status_or(*status, StatusCode::NOT_FOUND),
            LinkError::AlreadyLinked { .. } => StatusCode::CONFLICT,
            LinkError::RelocationFailed { status, .. } => {
                error_status_or(*status, StatusCode::BAD_GATEWAY)
            }
            LinkError::PartialLinkFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn pointer_suffix(pointer: &Option<String>) -> String {
    pointer
        .as_deref()
        .map(|p| format!(" to {}", p))
        .unwrap_or_default()
}

fn error_status_or(status: StatusCode, fallback: StatusCode) -> StatusCode {
    if status.is_client_error() || status.is_server_error() {
        status
    } else {
        fallback
    }
}

impl IntoResponse for LinkError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
            "code": code,
        }));

        let mut response = (status, body).into_response();
        let headers = response.headers_mut();
        headers.insert(LINK_ERROR, HeaderValue::from_static(code));
        if matches!(
            self,
            LinkError::InvalidLinkRequest(_) | LinkError::SourceNotFound { .. }
        ) {
            headers.insert(header::ETAG, HeaderValue::from_static(""));
        }
        response
    }
}
