//! Shared router state.

use crate::{capabilities::Capabilities, services::storage_service::StorageService};
use axum::extract::FromRef;
use std::sync::Arc;

/// State handed to every handler. Handlers extract the part they need
/// (`State<StorageService>` or `State<Arc<Capabilities>>`) through `FromRef`.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub capabilities: Arc<Capabilities>,
}

impl AppState {
    pub fn new(storage: StorageService, capabilities: Capabilities) -> Self {
        Self {
            storage,
            capabilities: Arc::new(capabilities),
        }
    }
}

impl FromRef<AppState> for StorageService {
    fn from_ref(state: &AppState) -> Self {
        state.storage.clone()
    }
}

impl FromRef<AppState> for Arc<Capabilities> {
    fn from_ref(state: &AppState) -> Self {
        state.capabilities.clone()
    }
}
