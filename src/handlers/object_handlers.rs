//! HTTP handlers for object operations.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to `StorageService`.

use crate::{
    errors::AppError,
    models::{metadata::is_persisted_header, object::ObjectRecord},
    object_path::decode_object_path,
    services::storage_service::{StorageError, StorageService, split_object_path},
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use std::{
    collections::BTreeMap,
    io::{self, SeekFrom},
};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Copy source for `PUT`, as percent-encoded `<container>/<object>`.
pub const X_COPY_FROM: &str = "x-copy-from";

/// Copy target for `COPY`, as percent-encoded `<container>/<object>`.
pub const DESTINATION: &str = "destination";

/// Upload an object to `/v1/{account}/{container}/{*object}`.
///
/// With `X-Copy-From` the body is ignored and the named object is copied here.
pub async fn put_object(
    State(service): State<StorageService>,
    Path((account, container, key)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    if let Some(source) = decoded_path_header(&headers, X_COPY_FROM)? {
        let (src_container, src_key) = split_object_path(&source)?;
        let record = service
            .copy_object(&account, src_container, src_key, &container, &key)
            .await?;
        return Ok(written_response(StatusCode::CREATED, &record));
    }

    let content_type = header_str(&headers, header::CONTENT_TYPE.as_str()).map(str::to_string);
    let metadata = persisted_metadata(&headers);

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let record = service
        .upload_object_stream(&account, &container, &key, content_type, metadata, stream)
        .await?;

    Ok(written_response(StatusCode::CREATED, &record))
}

/// Download an object as a streaming response.
///
/// A single `Range: bytes=` range is honoured with 206; multi-range and
/// malformed headers get the whole object.
pub async fn get_object(
    State(service): State<StorageService>,
    Path((account, container, key)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (record, mut file) = service.get_object_reader(&account, &container, &key).await?;
    let size = record.object.size_bytes.max(0) as u64;
    let range = header_str(&headers, header::RANGE.as_str()).and_then(|r| parse_range(r, size));

    let mut response = match range {
        None => {
            let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
            set_object_headers(response.headers_mut(), &record);
            response
        }
        Some(ByteRange::Unsatisfiable) => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            if let Ok(value) = HeaderValue::from_str(&format_unsatisfied(size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            return Ok(response);
        }
        Some(ByteRange::Satisfiable(start, end)) => {
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(StorageError::from)?;
            let len = end - start + 1;
            let body = Body::from_stream(ReaderStream::new(file.take(len)));
            let mut response = Response::new(body);
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            set_object_headers(response.headers_mut(), &record);
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, size)) {
                headers.insert(header::CONTENT_RANGE, value);
            }
            response
        }
    };
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    Ok(response)
}

/// HEAD: same headers as GET but no body.
pub async fn head_object(
    State(service): State<StorageService>,
    Path((account, container, key)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let record = service
        .get_object_metadata(&account, &container, &key)
        .await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &record);

    Ok(response)
}

/// POST: replace the object's `X-Object-Meta-*` entries.
pub async fn post_object(
    State(service): State<StorageService>,
    Path((account, container, key)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let metadata = persisted_metadata(&headers);
    service
        .update_metadata(&account, &container, &key, metadata)
        .await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::ACCEPTED;
    Ok(response)
}

/// DELETE: remove the object.
pub async fn delete_object(
    State(service): State<StorageService>,
    Path((account, container, key)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    service.delete_object(&account, &container, &key).await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    Ok(response)
}

/// COPY: duplicate the object at the `Destination` path.
///
/// Mounted as the method fallback of the object route because axum has no
/// `COPY` filter; any other unrouted method gets 405.
pub async fn copy_object(
    State(service): State<StorageService>,
    Path((account, container, key)): Path<(String, String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if method.as_str() != "COPY" {
        return Err(AppError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("method {} not allowed on objects", method),
        ));
    }

    let destination = decoded_path_header(&headers, DESTINATION)?
        .ok_or_else(|| AppError::bad_request("COPY requires a Destination header"))?;
    let (dest_container, dest_key) = split_object_path(&destination)?;

    let record = service
        .copy_object(&account, &container, &key, dest_container, dest_key)
        .await?;

    Ok(written_response(StatusCode::CREATED, &record))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// A percent-encoded `<container>/<object>` header, decoded to the stored form.
fn decoded_path_header(headers: &HeaderMap, name: &str) -> Result<Option<String>, AppError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    std::str::from_utf8(value.as_bytes())
        .ok()
        .and_then(|raw| decode_object_path(raw).ok())
        .map(Some)
        .ok_or_else(|| AppError::bad_request(format!("{} is not a valid object path", name)))
}

/// Collect the request headers that are stored as object metadata.
fn persisted_metadata(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| is_persisted_header(name.as_str()))
        .filter_map(|(name, value)| {
            std::str::from_utf8(value.as_bytes())
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// A `Range` header resolved against an object of known size.
#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    /// Inclusive first and last byte.
    Satisfiable(u64, u64),
    Unsatisfiable,
}

/// Parse a single `bytes=` range. Anything else yields `None` and is ignored.
fn parse_range(value: &str, size: u64) -> Option<ByteRange> {
    let ranges = value.trim().strip_prefix("bytes=")?;
    if ranges.contains(',') {
        return None;
    }
    let (first, last) = ranges.split_once('-')?;
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        let suffix: u64 = last.parse().ok()?;
        if suffix == 0 || size == 0 {
            return Some(ByteRange::Unsatisfiable);
        }
        return Some(ByteRange::Satisfiable(size.saturating_sub(suffix), size - 1));
    }

    let start: u64 = first.parse().ok()?;
    let end = if last.is_empty() {
        u64::MAX
    } else {
        last.parse().ok()?
    };
    if end < start {
        return None;
    }
    if start >= size {
        return Some(ByteRange::Unsatisfiable);
    }
    Some(ByteRange::Satisfiable(start, end.min(size - 1)))
}

fn format_unsatisfied(size: u64) -> String {
    format!("bytes */{}", size)
}

fn written_response(status: StatusCode, record: &ObjectRecord) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    if let Some(etag) = record.object.etag.as_deref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            response.headers_mut().insert(header::ETAG, value);
        }
    }
    response
}

fn set_object_headers(headers: &mut HeaderMap, record: &ObjectRecord) {
    let meta = &record.object;
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0) as u64),
    );

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    for (key, value) in &record.metadata {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!("skipping unrepresentable metadata header {}", key),
        }
    }
}
