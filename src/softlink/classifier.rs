//! Decides whether a request needs soft-link handling.

use super::{LINK_CONTENT_TYPE, LINK_POINTER, LINK_TARGET};
use axum::http::{HeaderMap, HeaderValue, Method, header};

/// How the middleware handles an object request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Read: forward, then resolve if the stored object turns out to be a stub.
    Read,
    /// Write carrying `X-Link-To`; holds the raw header value.
    CreateLink(String),
    /// Anything else goes to the store untouched.
    PassThrough,
}

/// Classify an object request from its method and headers alone.
pub fn classify(method: &Method, headers: &HeaderMap) -> Route {
    match *method {
        Method::GET | Method::HEAD => Route::Read,
        Method::PUT | Method::POST => match headers.get(LINK_TARGET) {
            Some(value) => Route::CreateLink(header_text(value).unwrap_or_default().to_string()),
            None => Route::PassThrough,
        },
        _ => Route::PassThrough,
    }
}

/// The payload path a stored object points to, if it is a link stub.
pub fn link_pointer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LINK_POINTER)
        .and_then(header_text)
        .map(str::to_string)
}

/// Header value as UTF-8. Pointers hold decoded object names, which need not
/// be ASCII.
fn header_text(value: &HeaderValue) -> Option<&str> {
    std::str::from_utf8(value.as_bytes()).ok()
}

/// Whether stored object headers describe a link stub, by pointer or by type.
pub fn is_link_stub(headers: &HeaderMap) -> bool {
    headers.contains_key(LINK_POINTER)
        || headers
            .get(header::CONTENT_TYPE)
            .is_some_and(|v| v.as_bytes() == LINK_CONTENT_TYPE.as_bytes())
}
