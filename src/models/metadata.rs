//! Metadata entries attached to objects.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Header prefix for client-supplied metadata.
pub const USER_META_PREFIX: &str = "x-object-meta-";

/// Header prefix for metadata owned by middleware (soft links live here).
pub const SYSMETA_PREFIX: &str = "x-object-sysmeta-";

/// Size of the payload a soft-link stub stands in for.
pub const ORIGINAL_CONTENT_LENGTH: &str = "original-content-length";

/// One key-value metadata row.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectMetadata {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Reference to the associated object.
    pub object_id: Uuid,

    /// Lowercase header name, e.g. `x-object-meta-author`.
    pub key: String,

    /// Header value as plain text.
    pub value: String,
}

/// Whether a request header is persisted as object metadata.
pub fn is_persisted_header(name: &str) -> bool {
    name.starts_with(USER_META_PREFIX)
        || name.starts_with(SYSMETA_PREFIX)
        || name == ORIGINAL_CONTENT_LENGTH
}

/// Whether a metadata key belongs to the client (replaced by POST).
pub fn is_user_metadata(name: &str) -> bool {
    name.starts_with(USER_META_PREFIX)
}
