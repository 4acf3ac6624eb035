//! Represents a container: a named namespace for objects inside an account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage container.
///
/// Containers are addressed by `(account, name)` and hold objects. The account
/// is an opaque string taken from the request path; no account record exists.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Container {
    /// Internal identifier used by object rows.
    pub id: Uuid,

    /// Owning account, e.g. `AUTH_test`.
    pub account: String,

    /// Container name, unique within the account.
    pub name: String,

    /// When this container was created.
    pub created_at: DateTime<Utc>,
}
