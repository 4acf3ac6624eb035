//! Defines routes for the Swift-style object store.
//!
//! ## Structure
//! - **Service endpoints**
//!   - `GET    /healthz`, `GET /readyz`: liveness / readiness
//!   - `GET    /info`: registered capabilities
//!
//! - **Container-level endpoints**
//!   - `GET    /v1/{account}/{container}`: list objects (prefix, delimiter, marker, limit)
//!   - `PUT    /v1/{account}/{container}`: create container
//!   - `DELETE /v1/{account}/{container}`: delete empty container
//!
//! - **Object-level endpoints**
//!   - `PUT    /v1/{account}/{container}/{*object}`: upload (or copy with `X-Copy-From`)
//!   - `GET    /v1/{account}/{container}/{*object}`: download object
//!   - `HEAD   /v1/{account}/{container}/{*object}`: retrieve metadata only
//!   - `POST   /v1/{account}/{container}/{*object}`: replace user metadata
//!   - `COPY   /v1/{account}/{container}/{*object}`: copy to `Destination`
//!   - `DELETE /v1/{account}/{container}/{*object}`: delete object
//!
//! The wildcard `*object` allows nested names like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        container_handlers::{create_container, delete_container, list_objects},
        health_handlers::{healthz, info, readyz},
        object_handlers::{
            copy_object, delete_object, get_object, head_object, post_object, put_object,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build the router for all store routes.
///
/// The router carries `AppState`; handlers pick the pieces they need.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/info", get(info))
        .route(
            "/v1/{account}/{container}/{*object}",
            put(put_object)
                .get(get_object)
                .head(head_object)
                .post(post_object)
                .delete(delete_object)
                .fallback(copy_object),
        )
        .route(
            "/v1/{account}/{container}",
            get(list_objects)
                .put(create_container)
                .delete(delete_container),
        )
}
