//! Per-request context and the sub-requests derived from it.
//!
//! A `RequestContext` is captured once from the client's request and never
//! mutated. Every secondary call against the store is a fresh `Request` built
//! from it, so stripping a header for one hop never affects another.

use super::LINK_TARGET;
use crate::object_path::{decode_object_path, encode_object_path};
use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderValue, Method, Uri, header, uri::InvalidUri},
};

/// Auth token forwarded verbatim to every secondary call.
pub const X_AUTH_TOKEN: &str = "x-auth-token";

/// Headers describing the client's own body or copy framing. They must not
/// leak into secondary calls, which carry no body of their own.
const HOP_ONLY_HEADERS: [&str; 4] = [
    "transfer-encoding",
    "content-length",
    "x-copy-from",
    LINK_TARGET,
];

#[derive(Debug, Clone)]
pub struct RequestContext {
    method: Method,
    account: String,
    container: String,
    object: String,
    headers: HeaderMap,
}

impl RequestContext {
    /// Capture the context of a request addressed to
    /// `/v1/{account}/{container}/{object}`. Any other path, or one that does
    /// not decode to UTF-8, yields `None`.
    pub fn from_request<B>(req: &Request<B>) -> Option<Self> {
        let (account, container, object) = parse_object_path(req.uri().path())?;
        Some(Self {
            method: req.method().clone(),
            account: decode_object_path(account).ok()?,
            container: decode_object_path(container).ok()?,
            object: decode_object_path(object).ok()?,
            headers: req.headers().clone(),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Decoded `<container>/<object>` of the addressed object, the form link
    /// targets are compared in and link pointers are stored in.
    pub fn object_path(&self) -> String {
        format!("{}/{}", self.container, self.object)
    }

    pub fn auth_token(&self) -> Option<&HeaderValue> {
        self.headers.get(X_AUTH_TOKEN)
    }

    /// Request URI of a decoded `<container>/<object>` inside this context's
    /// account.
    pub fn uri_for(&self, object_path: &str) -> Result<Uri, InvalidUri> {
        format!(
            "/v1/{}/{}",
            encode_object_path(&self.account),
            encode_object_path(object_path)
        )
        .parse()
    }

    /// Headers for a sub-request that only carries the caller's credentials.
    pub fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.auth_token() {
            headers.insert(X_AUTH_TOKEN, token.clone());
        }
        headers
    }

    /// The client's headers minus the hop-only ones.
    pub fn forwarded_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        for name in HOP_ONLY_HEADERS {
            headers.remove(name);
        }
        headers.remove(header::HOST);
        headers
    }

    /// Assemble a body-less sub-request.
    pub fn subrequest(&self, method: Method, uri: Uri, headers: HeaderMap) -> Request {
        let mut req = Request::new(Body::empty());
        *req.method_mut() = method;
        *req.uri_mut() = uri;
        *req.headers_mut() = headers;
        req
    }
}

/// Split `/v1/{account}/{container}/{object}` into its three parts. The object
/// part may itself contain `/`.
fn parse_object_path(path: &str) -> Option<(&str, &str, &str)> {
    let rest = path.strip_prefix("/v1/")?;
    let mut parts = rest.splitn(3, '/');
    let account = parts.next().filter(|s| !s.is_empty())?;
    let container = parts.next().filter(|s| !s.is_empty())?;
    let object = parts.next().filter(|s| !s.is_empty())?;
    Some((account, container, object))
}
