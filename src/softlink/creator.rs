//! Link creation: verify the source, copy the payload, install the stub.
//!
//! The steps are separate calls against the store and are not transactional.
//! The copy is ordered before the stub write, so a failure at any point
//! leaves the original object readable at the source path.

use super::{
    LINK_CONTENT_TYPE, LINK_POINTER, LinkError, ORIGINAL_CONTENT_LENGTH, Store,
    classifier::{is_link_stub, link_pointer},
    context::RequestContext,
};
use crate::object_path::{decode_object_path, encode_object_path};
use axum::{
    extract::Request,
    http::{HeaderValue, Method, Uri, header, header::InvalidHeaderValue},
    response::Response,
};
use std::convert::Infallible;
use tower::Service;
use tracing::{debug, error, info};

/// Copy target header understood by the store's `COPY`.
const DESTINATION: &str = "destination";

/// A validated `X-Link-To` value.
#[derive(Debug)]
struct LinkTarget {
    /// Decoded `<container>/<object>`, as stored in the stub's pointer.
    path: String,
    /// `path` as a header value for the stub.
    pointer: HeaderValue,
    /// `path` percent-encoded, for the store's `Destination`.
    destination: HeaderValue,
}

/// Turn the object addressed by `ctx` into a link to `target`.
///
/// On success the store's response to the stub write is returned.
pub(crate) async fn create_link<S>(
    store: &Store<S>,
    ctx: &RequestContext,
    target: &str,
) -> Result<Response, LinkError>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    let link_path = ctx.object_path();
    let target = parse_target(ctx, &link_path, target)?;
    let source_uri = ctx
        .uri_for(&link_path)
        .map_err(|err| LinkError::InvalidLinkRequest(err.to_string()))?;

    debug!("Creating a link from {} to {}", link_path, target.path);

    let original_length = verify_source(store, ctx, &link_path, source_uri.clone()).await?;
    relocate(store, ctx, &link_path, &target, source_uri.clone()).await?;
    install_stub(store, ctx, &link_path, &target, source_uri, original_length).await
}

/// Validate `X-Link-To` before any store call. The value is percent-decoded
/// and compared with the decoded source path.
fn parse_target(ctx: &RequestContext, link_path: &str, raw: &str) -> Result<LinkTarget, LinkError> {
    let decoded = decode_object_path(raw.trim()).map_err(|err| {
        LinkError::InvalidLinkRequest(format!("X-Link-To `{}` is not valid UTF-8: {}", raw, err))
    })?;
    let path = decoded.strip_prefix('/').unwrap_or(&decoded);

    match path.split_once('/') {
        Some((container, object)) if !container.is_empty() && !object.is_empty() => {}
        _ => {
            return Err(LinkError::InvalidLinkRequest(format!(
                "X-Link-To must name <container>/<object>, got `{}`",
                raw
            )));
        }
    }

    if path == link_path {
        return Err(LinkError::InvalidLinkRequest(
            "link path and destination path cannot be the same".into(),
        ));
    }

    ctx.uri_for(path).map_err(|err| {
        LinkError::InvalidLinkRequest(format!("`{}` is not a valid object path: {}", path, err))
    })?;
    let invalid = |err: InvalidHeaderValue| LinkError::InvalidLinkRequest(err.to_string());
    let pointer = HeaderValue::from_str(path).map_err(invalid)?;
    let destination = HeaderValue::from_str(&encode_object_path(path)).map_err(invalid)?;

    Ok(LinkTarget {
        path: path.to_string(),
        pointer,
        destination,
    })
}

/// Step 1 and 2: the source must be readable and must not be a stub.
/// Returns its `Content-Length`.
async fn verify_source<S>(
    store: &Store<S>,
    ctx: &RequestContext,
    link_path: &str,
    source_uri: Uri,
) -> Result<HeaderValue, LinkError>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    debug!("Verifying access to {}", link_path);
    let resp = store
        .send(ctx.subrequest(Method::HEAD, source_uri, ctx.auth_headers()))
        .await;

    if !resp.status().is_success() {
        let (status, detail) = super::store_failure(resp).await;
        return Err(LinkError::SourceNotFound {
            path: link_path.to_string(),
            status,
            detail,
        });
    }

    if is_link_stub(resp.headers()) {
        return Err(LinkError::AlreadyLinked {
            path: link_path.to_string(),
            pointer: link_pointer(resp.headers()),
        });
    }

    Ok(resp
        .headers()
        .get(header::CONTENT_LENGTH)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("0")))
}

/// Step 3: copy the payload to the target. The source stays as it was.
async fn relocate<S>(
    store: &Store<S>,
    ctx: &RequestContext,
    link_path: &str,
    target: &LinkTarget,
    source_uri: Uri,
) -> Result<(), LinkError>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    let copy = Method::from_bytes(b"COPY").map_err(|err| LinkError::RelocationFailed {
        path: link_path.to_string(),
        dest: target.path.clone(),
        status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        detail: err.to_string(),
    })?;

    let mut headers = ctx.forwarded_headers();
    headers.insert(DESTINATION, target.destination.clone());

    let resp = store.send(ctx.subrequest(copy, source_uri, headers)).await;
    if resp.status().is_success() {
        debug!("Relocated {} to {}", link_path, target.path);
        return Ok(());
    }

    let (status, detail) = super::store_failure(resp).await;
    Err(LinkError::RelocationFailed {
        path: link_path.to_string(),
        dest: target.path.clone(),
        status,
        detail,
    })
}

/// Step 4: overwrite the source with an empty `link` object pointing at the
/// target.
async fn install_stub<S>(
    store: &Store<S>,
    ctx: &RequestContext,
    link_path: &str,
    target: &LinkTarget,
    source_uri: Uri,
    original_length: HeaderValue,
) -> Result<Response, LinkError>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    let mut headers = ctx.auth_headers();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(LINK_CONTENT_TYPE),
    );
    headers.insert(ORIGINAL_CONTENT_LENGTH, original_length);
    headers.insert(LINK_POINTER, target.pointer.clone());

    let resp = store
        .send(ctx.subrequest(Method::PUT, source_uri, headers))
        .await;
    if resp.status().is_success() {
        info!("Linked {} to {}", link_path, target.path);
        return Ok(resp);
    }

    let (status, detail) = super::store_failure(resp).await;
    error!(
        "Payload of {} copied to {} but the link stub was not written ({}): {}",
        link_path, target.path, status, detail
    );
    Err(LinkError::PartialLinkFailure {
        path: link_path.to_string(),
        dest: target.path.clone(),
        status,
        detail,
    })
}
