//! Fixed extension to MIME type table

use std::path::Path;

/// Content type for files whose extension is not in the table
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type for directory listings
pub const DIRECTORY_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Look up the content type for a file by its extension (case-insensitive)
#[must_use]
pub fn content_type_for(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return DEFAULT_CONTENT_TYPE;
    };

    match ext.to_ascii_lowercase().as_str() {
        "html" => "text/html; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        "png" => "image/png",
        "jpg" => "image/jpg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "svg" => "image/svg+xml",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "wasm" => "application/wasm",
        "m3u8" => "application/x-mpegURL",
        "ts" => "video/MP2T",
        "mpd" => "application/dash+xml",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
