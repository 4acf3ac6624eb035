//! Persistence models for the object store.
//!
//! These map to the SQLite tables in `migrations/0001_init.sql` via
//! `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod container;
pub mod metadata;
pub mod object;
