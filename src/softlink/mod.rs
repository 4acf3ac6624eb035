//! Soft links over the object store.
//!
//! A link stub is an empty object of type `link` whose
//! `X-Object-Sysmeta-Link-To` metadata names the `<container>/<object>` that
//! holds the real payload. `SoftLink` wraps the store's handler:
//!
//! - `GET`/`HEAD`: the request goes to the store first; when the stored object
//!   is a stub, the read is re-issued once against the payload and that
//!   response replaces the stub's.
//! - `PUT`/`POST` with `X-Link-To: <container>/<object>`: the existing object
//!   is copied to the target and replaced by a stub pointing at it.
//! - everything else passes through.
//!
//! Links are one level deep: stubs cannot be linked again and resolution
//! never follows a second pointer.

mod classifier;
pub mod context;
mod creator;
pub mod error;
mod resolver;

pub use classifier::{Route, classify, is_link_stub, link_pointer};
pub use context::RequestContext;
pub use error::LinkError;

pub use crate::models::metadata::ORIGINAL_CONTENT_LENGTH;
use crate::models::metadata::SYSMETA_PREFIX;

use crate::capabilities::Capabilities;
use axum::{
    body,
    extract::Request,
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use serde_json::json;
use std::{
    convert::Infallible,
    task::{Context, Poll},
};
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

/// Request header asking for the addressed object to become a link.
pub const LINK_TARGET: &str = "x-link-to";

/// Stored metadata naming a stub's payload.
pub const LINK_POINTER: &str = "x-object-sysmeta-link-to";

/// Content type reserved for link stubs.
pub const LINK_CONTENT_TYPE: &str = "link";

/// Response header identifying which link-creation step failed.
pub const LINK_ERROR: &str = "x-link-error";

/// Name under which the middleware announces itself.
pub const CAPABILITY: &str = "softlink";

/// Largest store error body copied into a link error message.
const MAX_ERROR_BODY: usize = 64 * 1024;

/// Layer producing [`SoftLink`] services.
#[derive(Debug, Clone, Default)]
pub struct SoftLinkLayer;

impl SoftLinkLayer {
    pub fn new() -> Self {
        Self
    }

    /// Announce soft-link support in the capability registry.
    pub fn register_info(&self, capabilities: &mut Capabilities) {
        capabilities.register(
            CAPABILITY,
            json!({
                "link_header": "X-Link-To",
                "pointer_metadata": "X-Object-Sysmeta-Link-To",
                "max_depth": 1,
            }),
        );
    }
}

impl<S> Layer<S> for SoftLinkLayer {
    type Service = SoftLink<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SoftLink { inner }
    }
}

/// Soft-link middleware around an inner store handler.
///
/// Holds nothing but the inner service; every request is handled on its own.
#[derive(Debug, Clone)]
pub struct SoftLink<S> {
    inner: S,
}

impl<S> SoftLink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S> Service<Request> for SoftLink<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // each call drives its own clone of the inner service to readiness
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let store = Store {
            inner: self.inner.clone(),
        };
        Box::pin(async move { Ok(handle(store, req).await) })
    }
}

async fn handle<S>(store: Store<S>, mut req: Request) -> Response
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    strip_reserved_metadata(req.headers_mut());

    let Some(ctx) = RequestContext::from_request(&req) else {
        return store.send(req).await;
    };

    match classify(ctx.method(), ctx.headers()) {
        Route::Read => {
            let resp = store.send(req).await;
            // a stub's own body is empty; it is dropped unread when resolving
            match link_pointer(resp.headers()) {
                Some(pointer) => resolver::resolve(&store, &ctx, &pointer).await,
                None => resp,
            }
        }
        Route::CreateLink(target) => match creator::create_link(&store, &ctx, &target).await {
            Ok(resp) => resp,
            Err(err) => {
                warn!("link request on {} rejected: {}", ctx.object_path(), err);
                err.into_response()
            }
        },
        Route::PassThrough => store.send(req).await,
    }
}

/// Remove client-supplied system metadata. Link pointers and the original
/// length are only ever written by the stub step of link creation.
fn strip_reserved_metadata(headers: &mut HeaderMap) {
    let reserved: Vec<HeaderName> = headers
        .keys()
        .filter(|name| {
            name.as_str().starts_with(SYSMETA_PREFIX) || name.as_str() == ORIGINAL_CONTENT_LENGTH
        })
        .cloned()
        .collect();

    for name in reserved {
        debug!("dropping client-supplied {}", name);
        headers.remove(&name);
    }
}

/// Handle on the wrapped store used for every call the middleware makes.
pub(crate) struct Store<S> {
    inner: S,
}

impl<S> Store<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    pub(crate) async fn send(&self, req: Request) -> Response {
        match self.inner.clone().oneshot(req).await {
            Ok(resp) => resp,
            Err(never) => match never {},
        }
    }
}

/// Status and body text of a failed store response.
async fn store_failure(resp: Response) -> (StatusCode, String) {
    let status = resp.status();
    let detail = match body::to_bytes(resp.into_body(), MAX_ERROR_BODY).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
        Err(err) => format!("unreadable response body: {}", err),
    };
    (status, detail)
}
