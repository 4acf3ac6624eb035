//! HTTP handlers for container operations.

use crate::{
    errors::AppError,
    services::storage_service::{ListObjectsParams, ListObjectsResult, StorageService},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

const DEFAULT_LISTING_LIMIT: usize = 1000;

/// Query params accepted by a container listing.
#[derive(Debug, Deserialize)]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub marker: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ListingEntry {
    pub name: String,
    pub bytes: i64,
    pub content_type: String,
    pub hash: String,
    pub last_modified: String,
}

#[derive(Debug, Serialize)]
pub struct ListingResponse {
    pub container: String,
    pub objects: Vec<ListingEntry>,
    pub subdirs: Vec<String>,
    pub is_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
}

/// PUT `/v1/{account}/{container}`: create container.
pub async fn create_container(
    State(service): State<StorageService>,
    Path((account, container)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    service.create_container(&account, &container).await?;
    tracing::info!("created container {}/{}", account, container);
    Ok(StatusCode::CREATED)
}

/// DELETE `/v1/{account}/{container}`: delete an empty container.
pub async fn delete_container(
    State(service): State<StorageService>,
    Path((account, container)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    service.delete_container(&account, &container).await?;
    tracing::info!("deleted container {}/{}", account, container);
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/v1/{account}/{container}`: list objects, supports
/// ?prefix=&delimiter=&marker=&limit=
pub async fn list_objects(
    State(service): State<StorageService>,
    Path((account, container)): Path<(String, String)>,
    Query(q): Query<ListObjectsQuery>,
) -> Result<Json<ListingResponse>, AppError> {
    let params = ListObjectsParams {
        prefix: q.prefix,
        delimiter: q.delimiter,
        marker: q.marker,
        limit: q.limit.unwrap_or(DEFAULT_LISTING_LIMIT),
    };

    let result = service.list_objects(&account, &container, params).await?;
    Ok(Json(build_listing(container, result)))
}

fn build_listing(container: String, result: ListObjectsResult) -> ListingResponse {
    let objects = result
        .objects
        .into_iter()
        .map(|obj| ListingEntry {
            name: obj.key,
            bytes: obj.size_bytes,
            content_type: obj
                .content_type
                .unwrap_or_else(|| "application/octet-stream".into()),
            hash: obj.etag.unwrap_or_default(),
            last_modified: obj
                .last_modified
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        })
        .collect();

    ListingResponse {
        container,
        objects,
        subdirs: result.common_prefixes,
        is_truncated: result.is_truncated,
        next_marker: result.next_marker,
    }
}
