//! Transparent reads through link stubs.

use super::{Store, context::RequestContext};
use axum::{
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use tower::Service;
use tracing::{debug, info, warn};

/// Re-issue the client's read against the payload a stub points to and
/// return that response verbatim.
///
/// Exactly one hop: the payload response is not inspected for a pointer of
/// its own. A missing payload comes back as the store's 404.
pub(crate) async fn resolve<S>(store: &Store<S>, ctx: &RequestContext, pointer: &str) -> Response
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    let uri = match ctx.uri_for(pointer) {
        Ok(uri) => uri,
        Err(err) => {
            warn!(
                "link {} has an unusable pointer `{}`: {}",
                ctx.object_path(),
                pointer,
                err
            );
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error: link target `{}` is not a valid object path.\n", pointer),
            )
                .into_response();
        }
    };

    debug!("Resolving {} through link to {}", ctx.object_path(), pointer);
    let resp = store
        .send(ctx.subrequest(ctx.method().clone(), uri, ctx.forwarded_headers()))
        .await;

    if resp.status() == StatusCode::NOT_FOUND {
        info!("dangling link {} -> {}", ctx.object_path(), pointer);
    }
    resp
}
