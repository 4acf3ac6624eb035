//! Represents an object stored in a container.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A single object row. The payload bytes live on disk, not here.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent container.
    pub container_id: Uuid,

    /// Object name within the container (may contain `/`).
    pub key: String,

    /// Content type (MIME type, or `link` for soft-link stubs).
    pub content_type: Option<String>,

    /// Size in bytes of the stored payload.
    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: Option<String>,

    /// Names the payload file of the current write. Each write gets a new one.
    pub version: Uuid,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,

    /// Whether the object is marked as deleted.
    pub is_deleted: bool,
}

/// An object row together with its persisted metadata headers.
///
/// Metadata keys are lowercase header names (`x-object-meta-*`,
/// `x-object-sysmeta-*`, `original-content-length`).
#[derive(Clone, Debug)]
pub struct ObjectRecord {
    pub object: Object,
    pub metadata: BTreeMap<String, String>,
}
