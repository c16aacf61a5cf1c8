// Static file and directory delivery
//
// Every GET/HEAD path goes through the resolver; files are streamed from a
// handle opened for this request only, directories are listed as JSON.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Version},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use super::{client_ip::client_ip, AppError, AppResult, AppState};
use crate::mime::{content_type_for, DIRECTORY_CONTENT_TYPE};
use crate::range::{parse_range, ByteRange};
use crate::resolve::{EntryKind, Resolved};

/// Fallback handler serving every request path
pub async fn serve_path(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().clone();
    let version = request.version();
    let ip = client_ip(request.headers(), request.extensions());

    let raw_path = request.uri().path();
    let path = match percent_decode_str(raw_path).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => {
            warn!(method = %method, version = ?version, status = 404, path = raw_path, ip = %ip, "Undecodable request path");
            return AppError::not_found().into_response();
        }
    };

    if method != Method::GET && method != Method::HEAD {
        warn!(method = %method, version = ?version, status = 405, path = %path, ip = %ip, "Method not allowed");
        return AppError::method_not_allowed().into_response();
    }

    let Some(resolved) = state.resolver.resolve(&path).await else {
        warn!(method = %method, version = ?version, status = 404, path = %path, ip = %ip, "Not found");
        return AppError::not_found().into_response();
    };

    let ctx = RequestContext {
        method: &method,
        version,
        path: &path,
        ip: &ip,
    };

    let result = match resolved.kind {
        EntryKind::File => serve_file(&state, &ctx, &resolved, request.headers()).await,
        EntryKind::Directory => serve_directory(&ctx, &resolved).await,
    };

    result.unwrap_or_else(|e| {
        warn!(method = %method, version = ?version, status = e.status.as_u16(), path = %path, ip = %ip, "Request failed: {}", e.message);
        e.into_response()
    })
}

struct RequestContext<'a> {
    method: &'a Method,
    version: Version,
    path: &'a str,
    ip: &'a str,
}

impl RequestContext<'_> {
    fn is_head(&self) -> bool {
        *self.method == Method::HEAD
    }
}

async fn serve_file(
    state: &AppState,
    ctx: &RequestContext<'_>,
    resolved: &Resolved,
    headers: &HeaderMap,
) -> AppResult<Response> {
    let content_type = content_type_for(&resolved.path);

    // Closed on drop, whichever way this function returns
    let mut file = tokio::fs::File::open(&resolved.path).await?;
    // Sized from the open handle; the file may have changed since resolution
    let size = file.metadata().await?.len();
    let range = headers
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| parse_range(value, size));

    let (status, ByteRange { start, end }) = match range {
        Some(r) => {
            file.seek(SeekFrom::Start(r.start)).await?;
            let status = if state.partial_content {
                StatusCode::PARTIAL_CONTENT
            } else {
                StatusCode::OK
            };
            (status, r)
        }
        None => (StatusCode::OK, ByteRange { start: 0, end: size }),
    };
    let length = end - start;

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LANGUAGE, "en")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, length);
    if let Some(modified) = resolved.modified {
        builder = builder.header(header::LAST_MODIFIED, http_date(modified));
    }
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            ByteRange { start, end }.content_range(size),
        );
    }

    let body = if ctx.is_head() {
        Body::empty()
    } else {
        Body::from_stream(ReaderStream::new(file.take(length)))
    };

    if range.is_some() {
        info!(
            method = %ctx.method,
            version = ?ctx.version,
            status = status.as_u16(),
            content_type,
            range_start = start,
            range_end = end,
            bytes = length,
            path = %ctx.path,
            ip = %ctx.ip,
            "range"
        );
    } else {
        info!(
            method = %ctx.method,
            version = ?ctx.version,
            status = status.as_u16(),
            content_type,
            bytes = length,
            path = %ctx.path,
            ip = %ctx.ip,
            "full"
        );
    }

    builder
        .body(body)
        .map_err(|e| AppError::internal_server_error(e.to_string()))
}

async fn serve_directory(ctx: &RequestContext<'_>, resolved: &Resolved) -> AppResult<Response> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(&resolved.path).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    let listing: Vec<String> = names
        .iter()
        .map(|name| join_url_path(ctx.path, name))
        .collect();
    let body = serde_json::to_vec(&listing)?;

    info!(
        method = %ctx.method,
        version = ?ctx.version,
        status = 200,
        content_type = "directory/json",
        entries = listing.len(),
        path = %ctx.path,
        ip = %ctx.ip,
        "directory"
    );

    let body = if ctx.is_head() {
        Body::empty()
    } else {
        Body::from(body)
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(DIRECTORY_CONTENT_TYPE)),
            (header::CONTENT_LANGUAGE, HeaderValue::from_static("en")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
        ],
        body,
    )
        .into_response())
}

/// Join a request path and a directory member name with a single slash
fn join_url_path(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

fn http_date(time: std::time::SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
