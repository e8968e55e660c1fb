//! Streaming file responses with range and conditional semantics.
//!
//! The validator is `"mtime_hex-size_hex"`; conditional headers are checked
//! before any body work. Range parsing honors the first `bytes=` specifier
//! only, which HTTP/1.1 permits for multipart range requests.

use crate::error::{ApiError, ApiResult};
use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, RANGE,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use refract_core::httpdate::{format_http_date, parse_http_date};
use std::path::Path;
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Streaming read chunk size (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

const CACHE_CONTROL_VALUE: &str = "public, max-age=86400";

/// A parsed byte range, inclusive on both ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Parse the first specifier of a `Range` header against a body of `size`
/// bytes.
pub fn parse_range(header: &str, size: u64) -> ApiResult<ByteRange> {
    let spec = header
        .strip_prefix("bytes=")
        .ok_or_else(|| ApiError::BadRequest(format!("malformed range: {header}")))?;

    // Multi-range tolerated but not honored: first specifier only.
    let spec = spec.split(',').next().unwrap_or("").trim();
    let (start_raw, end_raw) = spec
        .split_once('-')
        .ok_or_else(|| ApiError::BadRequest(format!("malformed range: {header}")))?;

    if size == 0 {
        return Err(ApiError::RangeNotSatisfiable);
    }

    match (start_raw.is_empty(), end_raw.is_empty()) {
        // "-suffix": the last `suffix` bytes.
        (true, false) => {
            let suffix: u64 = end_raw
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("malformed range: {header}")))?;
            if suffix == 0 {
                return Err(ApiError::BadRequest(format!("malformed range: {header}")));
            }
            Ok(ByteRange {
                start: size.saturating_sub(suffix),
                end: size - 1,
            })
        }
        // "start-": open-ended.
        (false, true) => {
            let start: u64 = start_raw
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("malformed range: {header}")))?;
            if start >= size {
                return Err(ApiError::RangeNotSatisfiable);
            }
            Ok(ByteRange {
                start,
                end: size - 1,
            })
        }
        // "start-end": both bounded.
        (false, false) => {
            let start: u64 = start_raw
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("malformed range: {header}")))?;
            let end: u64 = end_raw
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("malformed range: {header}")))?;
            if end < start {
                return Err(ApiError::BadRequest(format!("malformed range: {header}")));
            }
            if start >= size {
                return Err(ApiError::RangeNotSatisfiable);
            }
            Ok(ByteRange {
                start,
                end: end.min(size - 1),
            })
        }
        (true, true) => Err(ApiError::BadRequest(format!("malformed range: {header}"))),
    }
}

/// Build the entity validator from mtime and size.
fn etag_for(mtime_unix: i64, size: u64) -> String {
    format!("\"{mtime_unix:x}-{size:x}\"")
}

/// Serve `path` with full HTTP semantics: conditional validation, ranges,
/// cache headers, and optional attachment disposition.
pub async fn serve_file(
    req_headers: &HeaderMap,
    path: &Path,
    mime: &str,
    download: bool,
) -> ApiResult<Response> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound(path.display().to_string())
        } else {
            ApiError::Internal(e.to_string())
        }
    })?;
    let meta = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let size = meta.len();

    let mtime: OffsetDateTime = meta
        .modified()
        .map(Into::into)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let mtime_unix = mtime.unix_timestamp();
    let etag = etag_for(mtime_unix, size);
    let last_modified = format_http_date(mtime);

    // Conditional checks run before any body work.
    let if_none_match = req_headers
        .get(IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    let not_modified = match if_none_match {
        Some(candidate) => candidate == etag,
        None => req_headers
            .get(IF_MODIFIED_SINCE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_http_date(v).ok())
            .is_some_and(|since| mtime_unix <= since.unix_timestamp()),
    };

    if not_modified {
        let response = Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(ETAG, &etag)
            .header(LAST_MODIFIED, &last_modified)
            .header(CACHE_CONTROL, CACHE_CONTROL_VALUE)
            .header(ACCEPT_RANGES, "bytes")
            .body(Body::empty())
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        return Ok(response);
    }

    let range = match req_headers.get(RANGE).and_then(|v| v.to_str().ok()) {
        Some(header) => Some(parse_range(header, size)?),
        None => None,
    };

    let builder = Response::builder()
        .header(CONTENT_TYPE, mime)
        .header(ETAG, &etag)
        .header(LAST_MODIFIED, &last_modified)
        .header(CACHE_CONTROL, CACHE_CONTROL_VALUE)
        .header(ACCEPT_RANGES, "bytes");

    let response = match range {
        Some(ByteRange { start, end }) => {
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            let stream = ReaderStream::with_capacity(file.take(length), STREAM_CHUNK_SIZE);
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(CONTENT_RANGE, format!("bytes {start}-{end}/{size}"))
                .header(CONTENT_LENGTH, length)
                .body(Body::from_stream(stream))
        }
        None => {
            let mut builder = builder
                .status(StatusCode::OK)
                .header(CONTENT_LENGTH, size);
            if download {
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                builder = builder.header(
                    CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{filename}\""),
                );
            }
            let stream = ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE);
            builder.body(Body::from_stream(stream))
        }
    };

    response.map_err(|e| ApiError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_range_clamps_end() {
        let r = parse_range("bytes=1000-1999", 10_000).unwrap();
        assert_eq!(r, ByteRange { start: 1000, end: 1999 });
        let r = parse_range("bytes=9000-20000", 10_000).unwrap();
        assert_eq!(r, ByteRange { start: 9000, end: 9999 });
    }

    #[test]
    fn open_ended_range_runs_to_eof() {
        let r = parse_range("bytes=500-", 1000).unwrap();
        assert_eq!(r, ByteRange { start: 500, end: 999 });
    }

    #[test]
    fn suffix_range_takes_last_bytes() {
        let r = parse_range("bytes=-200", 1000).unwrap();
        assert_eq!(r, ByteRange { start: 800, end: 999 });
        // Suffix larger than the body clamps to the whole file.
        let r = parse_range("bytes=-2000", 1000).unwrap();
        assert_eq!(r, ByteRange { start: 0, end: 999 });
    }

    #[test]
    fn start_past_eof_is_unsatisfiable() {
        assert!(matches!(
            parse_range("bytes=1000-", 1000),
            Err(ApiError::RangeNotSatisfiable)
        ));
        assert!(matches!(
            parse_range("bytes=5000-6000", 1000),
            Err(ApiError::RangeNotSatisfiable)
        ));
    }

    #[test]
    fn malformed_ranges_are_bad_requests() {
        for header in [
            "bytes=-",
            "bytes=abc-def",
            "chunks=0-10",
            "bytes=10-5",
            "bytes=-0",
        ] {
            assert!(
                matches!(parse_range(header, 1000), Err(ApiError::BadRequest(_))),
                "expected BadRequest for {header}"
            );
        }
    }

    #[test]
    fn multi_range_honors_first_specifier() {
        let r = parse_range("bytes=0-99, 200-299", 1000).unwrap();
        assert_eq!(r, ByteRange { start: 0, end: 99 });
    }

    #[test]
    fn successive_ranges_tile_the_body() {
        let size = 1000;
        let mut covered = 0;
        for (h, expected) in [
            ("bytes=0-399", (0, 399)),
            ("bytes=400-799", (400, 799)),
            ("bytes=800-", (800, 999)),
        ] {
            let r = parse_range(h, size).unwrap();
            assert_eq!((r.start, r.end), expected);
            assert_eq!(r.start, covered);
            covered = r.end + 1;
        }
        assert_eq!(covered, size);
    }

    #[test]
    fn etag_is_hex_mtime_and_size() {
        assert_eq!(etag_for(0x5eb63bbb, 0x400), "\"5eb63bbb-400\"");
    }
}
