//! src/services/storage_service.rs
//!
//! StorageService: Swift-like account/container/object operations backed by
//! SQLite for metadata and local disk for payloads. Payloads are sharded beneath
//! `base_path/{account}/{container}/{shard}/{shard}/{digest}`.

use crate::models::{
    container::Container,
    metadata::is_user_metadata,
    object::{Object, ObjectRecord},
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::{BTreeMap, BTreeSet},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub marker: Option<String>,
    pub limit: usize,
}

#[derive(Debug)]
pub struct ListObjectsResult {
    pub objects: Vec<Object>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("container `{account}/{container}` not found")]
    ContainerNotFound { account: String, container: String },
    #[error("container `{account}/{container}` already exists")]
    ContainerAlreadyExists { account: String, container: String },
    #[error("container `{account}/{container}` is not empty")]
    ContainerNotEmpty { account: String, container: String },
    #[error("{kind} `{name}` invalid: {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: String,
    },
    #[error("object `{key}` not found in container `{container}`")]
    ObjectNotFound { container: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("`{0}` is not a <container>/<object> path")]
    InvalidObjectPath(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the object-store operations the HTTP handlers need:
/// - Upload an object with metadata (payload to disk, rows to SQLite)
/// - Read an object or only its metadata
/// - Copy an object, payload and metadata, to another path
/// - Replace an object's user metadata
/// - List, delete objects; create and delete containers
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MAX_NAME_LEN: usize = 256;
const OBJECT_COLUMNS: &str =
    "id, container_id, key, content_type, size_bytes, etag, version, last_modified, is_deleted";

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate an account or container name.
    ///
    /// Names become directory components, so they must be a single path
    /// segment: non-empty, at most 256 bytes, no `/`, no control characters,
    /// and not `.` or `..`.
    fn ensure_name_safe(&self, kind: &'static str, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidName {
            kind,
            name: name.to_string(),
            reason: reason.into(),
        };

        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(invalid("must be between 1 and 256 bytes"));
        }
        if name.contains('/') {
            return Err(invalid("must not contain `/`"));
        }
        if name == "." || name == ".." {
            return Err(invalid("must not be a relative path component"));
        }
        if name.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(invalid("must not contain control characters or `\\`"));
        }
        Ok(())
    }

    /// Directory holding a container's payloads. Not checked for existence.
    fn container_root(&self, account: &str, container: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(account);
        path.push(container);
        path
    }

    /// Construct a fully-qualified object payload path for one write.
    ///
    /// The file name is MD5(account/container/key) in hex followed by the
    /// write's version; the digest's first two bytes give two shard levels so
    /// keys containing `/` never collide with directories. Parent directories
    /// may not exist yet.
    fn object_path(&self, account: &str, container: &str, key: &str, version: Uuid) -> PathBuf {
        let digest = md5::compute(format!("{}/{}/{}", account, container, key));
        let mut path = self.container_root(account, container);
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(format!("{:x}-{}", digest, version.simple()));
        path
    }

    /// Fetch container metadata from SQLite.
    async fn fetch_container(&self, account: &str, container: &str) -> StorageResult<Container> {
        self.ensure_name_safe("account", account)?;
        self.ensure_name_safe("container", container)?;
        sqlx::query_as::<Sqlite, Container>(
            "SELECT id, account, name, created_at
             FROM containers WHERE account = ? AND name = ?",
        )
        .bind(account)
        .bind(container)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ContainerNotFound {
                account: account.to_string(),
                container: container.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Fetch a non-deleted object row.
    async fn fetch_object(&self, container: &Container, key: &str) -> StorageResult<Object> {
        sqlx::query_as::<_, Object>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
             WHERE key = ? AND container_id = ? AND is_deleted = 0"
        ))
        .bind(key)
        .bind(container.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                container: container.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_metadata(&self, object_id: Uuid) -> StorageResult<BTreeMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM object_metadata WHERE object_id = ?")
                .bind(object_id)
                .fetch_all(&*self.db)
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// Stream-upload an object to disk and update metadata.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Renames it to a payload file of its own, next to the current one.
    /// - Upserts the object row and replaces all of its metadata rows.
    /// - Only after the commit removes the previous payload file.
    ///
    /// A failure at any step leaves the previous version readable and cleans
    /// up the new files.
    pub async fn upload_object_stream<S>(
        &self,
        account: &str,
        container: &str,
        key: &str,
        content_type: Option<String>,
        metadata: BTreeMap<String, String>,
        stream: S,
    ) -> StorageResult<ObjectRecord>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.ensure_key_safe(key)?;
        let container_rec = self.fetch_container(account, container).await?;

        let version = Uuid::new_v4();
        let file_path = self.object_path(account, container, key, version);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        // the version is fresh, so this never replaces a live payload
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let etag = format!("{:x}", digest.compute());
        let written = self
            .write_object_rows(
                &container_rec,
                key,
                content_type,
                size_bytes,
                etag,
                version,
                &metadata,
            )
            .await;

        match written {
            Ok((object, previous)) => {
                debug!(
                    "stored {}/{}/{} ({} bytes)",
                    account, container, key, object.size_bytes
                );
                if let Some(previous) = previous {
                    self.remove_payload(&self.object_path(account, container, key, previous))
                        .await;
                }
                Ok(ObjectRecord { object, metadata })
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(err)
            }
        }
    }

    /// Upsert the object row and swap its metadata rows in one transaction.
    ///
    /// Returns the new row and the version it replaced, if any.
    #[allow(clippy::too_many_arguments)]
    async fn write_object_rows(
        &self,
        container: &Container,
        key: &str,
        content_type: Option<String>,
        size_bytes: i64,
        etag: String,
        version: Uuid,
        metadata: &BTreeMap<String, String>,
    ) -> StorageResult<(Object, Option<Uuid>)> {
        let mut tx = self.db.begin().await?;

        let previous: Option<Uuid> =
            sqlx::query_scalar("SELECT version FROM objects WHERE container_id = ? AND key = ?")
                .bind(container.id)
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;

        let object = sqlx::query_as::<_, Object>(&format!(
            r#"
            INSERT INTO objects (
                id, container_id, key, content_type, size_bytes,
                etag, version, last_modified, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(container_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                version = excluded.version,
                last_modified = excluded.last_modified,
                is_deleted = 0
            RETURNING {OBJECT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(container.id)
        .bind(key)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(version)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        for (name, value) in metadata {
            sqlx::query(
                "INSERT INTO object_metadata (id, object_id, key, value) VALUES (?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(object.id)
            .bind(name)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok((object, previous))
    }

    /// Best-effort removal of a payload file no row refers to any more.
    async fn remove_payload(&self, path: &Path) {
        match fs::remove_file(path).await {
            Ok(_) => debug!("removed physical file {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => debug!("failed to remove {}: {}", path.display(), err),
        }
    }

    /// Fetch an object for reading.
    ///
    /// Returns the record and an opened File handle ready for streaming out.
    /// Returns ObjectNotFound if the row exists but the payload file is missing.
    pub async fn get_object_reader(
        &self,
        account: &str,
        container: &str,
        key: &str,
    ) -> StorageResult<(ObjectRecord, File)> {
        let record = self.get_object_metadata(account, container, key).await?;

        let file_path = self.object_path(account, container, key, record.object.version);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    container: container.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((record, file))
    }

    /// Fetch only the object row and its metadata.
    pub async fn get_object_metadata(
        &self,
        account: &str,
        container: &str,
        key: &str,
    ) -> StorageResult<ObjectRecord> {
        self.ensure_key_safe(key)?;
        let container_rec = self.fetch_container(account, container).await?;
        let object = self.fetch_object(&container_rec, key).await?;
        let metadata = self.fetch_metadata(object.id).await?;
        Ok(ObjectRecord { object, metadata })
    }

    /// Copy an object, content type and every metadata entry included, to
    /// `dest_container/dest_key` in the same account.
    ///
    /// The source is left in place. The destination container must exist.
    pub async fn copy_object(
        &self,
        account: &str,
        container: &str,
        key: &str,
        dest_container: &str,
        dest_key: &str,
    ) -> StorageResult<ObjectRecord> {
        let (source, file) = self.get_object_reader(account, container, key).await?;
        debug!(
            "copying {}/{}/{} to {}/{}/{}",
            account, container, key, account, dest_container, dest_key
        );

        self.upload_object_stream(
            account,
            dest_container,
            dest_key,
            source.object.content_type,
            source.metadata,
            ReaderStream::new(file),
        )
        .await
    }

    /// Replace the user metadata (`x-object-meta-*`) of an object.
    ///
    /// System metadata and `original-content-length` are preserved; entries
    /// in `user_metadata` outside the user prefix are ignored.
    pub async fn update_metadata(
        &self,
        account: &str,
        container: &str,
        key: &str,
        user_metadata: BTreeMap<String, String>,
    ) -> StorageResult<ObjectRecord> {
        self.ensure_key_safe(key)?;
        let container_rec = self.fetch_container(account, container).await?;
        let object = self.fetch_object(&container_rec, key).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM object_metadata WHERE object_id = ? AND key LIKE 'x-object-meta-%'")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        for (name, value) in user_metadata.iter().filter(|(name, _)| is_user_metadata(name)) {
            sqlx::query(
                "INSERT INTO object_metadata (id, object_id, key, value) VALUES (?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(object.id)
            .bind(name)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        let object = sqlx::query_as::<_, Object>(&format!(
            "UPDATE objects SET last_modified = ? WHERE id = ? RETURNING {OBJECT_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(object.id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        let metadata = self.fetch_metadata(object.id).await?;
        Ok(ObjectRecord { object, metadata })
    }

    /// List objects in key order.
    ///
    /// Supports prefix filtering, delimiter grouping, and `marker` paging
    /// (only keys strictly greater than the marker are returned).
    pub async fn list_objects(
        &self,
        account: &str,
        container: &str,
        params: ListObjectsParams,
    ) -> StorageResult<ListObjectsResult> {
        let container_rec = self.fetch_container(account, container).await?;
        let limit = params.limit.clamp(1, 10_000);
        let fetch_limit = limit + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE container_id = "
        ));
        builder.push_bind(container_rec.id);
        builder.push(" AND is_deleted = 0");

        if let Some(prefix) = &params.prefix {
            builder.push(" AND substr(key, 1, length(");
            builder.push_bind(prefix.clone());
            builder.push(")) = ");
            builder.push_bind(prefix.clone());
        }

        if let Some(marker) = &params.marker {
            builder.push(" AND key > ");
            builder.push_bind(marker.clone());
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<Object> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut is_truncated = false;
        let mut next_marker = None;
        if rows.len() == fetch_limit {
            rows.pop();
            next_marker = rows.last().map(|obj| obj.key.clone());
            is_truncated = true;
        }

        let mut contents = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        for obj in rows.into_iter() {
            if let Some(delim) = &params.delimiter {
                if let Some(prefix) =
                    compute_common_prefix(&obj.key, params.prefix.as_deref(), delim)
                {
                    common_prefixes.insert(prefix);
                    continue;
                }
            }
            contents.push(obj);
        }

        Ok(ListObjectsResult {
            objects: contents,
            common_prefixes: common_prefixes.into_iter().collect(),
            is_truncated,
            next_marker,
        })
    }

    /// Soft-delete an object and remove its payload.
    ///
    /// Repeated calls return ObjectNotFound once the object is gone.
    pub async fn delete_object(
        &self,
        account: &str,
        container: &str,
        key: &str,
    ) -> StorageResult<Object> {
        self.ensure_key_safe(key)?;
        let container_rec = self.fetch_container(account, container).await?;
        let object = self.fetch_object(&container_rec, key).await?;

        let result = sqlx::query(
            "UPDATE objects SET is_deleted = 1 WHERE key = ? AND container_id = ? AND is_deleted = 0",
        )
        .bind(key)
        .bind(container_rec.id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ObjectNotFound {
                container: container.to_string(),
                key: key.to_string(),
            });
        }

        let file_path = self.object_path(account, container, key, object.version);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let root = self.container_root(account, container);
            self.prune_empty_dirs(parent, &root).await;
        }

        Ok(object)
    }

    /// Create a container and its payload directory.
    ///
    /// Returns ContainerAlreadyExists if `(account, name)` is taken.
    pub async fn create_container(&self, account: &str, name: &str) -> StorageResult<Container> {
        self.ensure_name_safe("account", account)?;
        self.ensure_name_safe("container", name)?;
        fs::create_dir_all(self.container_root(account, name)).await?;

        let container = Container {
            id: Uuid::new_v4(),
            account: account.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        match sqlx::query(
            "INSERT INTO containers (id, account, name, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(container.id)
        .bind(&container.account)
        .bind(&container.name)
        .bind(container.created_at)
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(container),
            Err(err) if is_unique_violation(&err) => Err(StorageError::ContainerAlreadyExists {
                account: account.to_string(),
                container: name.to_string(),
            }),
            Err(err) => Err(StorageError::Sqlx(err)),
        }
    }

    /// Delete an empty container from metadata and filesystem.
    ///
    /// Returns ContainerNotEmpty while live objects remain.
    pub async fn delete_container(&self, account: &str, name: &str) -> StorageResult<()> {
        let container = self.fetch_container(account, name).await?;

        let live: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM objects WHERE container_id = ? AND is_deleted = 0",
        )
        .bind(container.id)
        .fetch_one(&*self.db)
        .await?;
        if live > 0 {
            return Err(StorageError::ContainerNotEmpty {
                account: account.to_string(),
                container: name.to_string(),
            });
        }

        sqlx::query("DELETE FROM containers WHERE id = ?")
            .bind(container.id)
            .execute(&*self.db)
            .await?;

        let root = self.container_root(account, name);
        if let Err(err) = fs::remove_dir_all(&root).await {
            if err.kind() != io::ErrorKind::NotFound {
                debug!(
                    "failed to remove container directory {} after delete: {}",
                    root.display(),
                    err
                );
            }
        }

        Ok(())
    }

    /// Recursively remove empty directories up to the container root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Split a `<container>/<object>` reference as carried by `Destination` and
/// `X-Copy-From`. A single leading `/` is tolerated.
pub fn split_object_path(path: &str) -> StorageResult<(&str, &str)> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.split_once('/') {
        Some((container, key)) if !container.is_empty() && !key.is_empty() => Ok((container, key)),
        _ => Err(StorageError::InvalidObjectPath(path.to_string())),
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Compute the common prefix a key rolls up into when listing with a
/// delimiter. Returns None when the key is listed on its own.
fn compute_common_prefix(
    key: &str,
    requested_prefix: Option<&str>,
    delimiter: &str,
) -> Option<String> {
    let after_prefix = match requested_prefix {
        Some(prefix) => key.strip_prefix(prefix)?,
        None => key,
    };

    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::new();
    if let Some(prefix) = requested_prefix {
        combined.push_str(prefix);
    }
    combined.push_str(&after_prefix[..pos + delimiter.len()]);
    Some(combined)
}
