//! Swift-style object store with transparent soft links.
//!
//! The store itself lives in [`services`], [`handlers`] and [`routes`]; the
//! [`softlink`] middleware wraps the store's router as a `tower` service.

pub mod capabilities;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod object_path;
pub mod routes;
pub mod services;
pub mod softlink;
pub mod state;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use capabilities::Capabilities;
pub use services::storage_service::StorageService;
pub use softlink::{SoftLink, SoftLinkLayer};
pub use state::AppState;

/// The bare store: every route, with request tracing, ready to serve or to
/// be wrapped by [`SoftLinkLayer`].
pub fn store_router(state: AppState) -> Router {
    routes::routes::routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
