//! The request pipeline: tenant routing, option parsing, staging,
//! derivation, response.
//!
//! Ordered steps per request: resolve the `Host` header in the tenant table,
//! strip the tenant's path prefix, classify the extension, parse options,
//! stage the source through the storage fallback chain, run the selected
//! processor (or none), then stream the result. `X-Debug: 1` annotates the
//! response with every resolution step.

use crate::error::ApiError;
use crate::metrics::{PROCESSING_DURATION, REQUESTS};
use crate::respond::serve_file;
use crate::staging::{self, StagingError};
use crate::state::{AppState, RuntimeTenant};
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, HOST, LOCATION, PRAGMA};
use axum::http::{HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use refract_core::{MediaType, Options, media_type_for};
use refract_engine::{Job, processor_for};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, max-age=0";

/// Debug annotations accumulated while resolving a request.
#[derive(Default)]
struct DebugTrace {
    enabled: bool,
    headers: Vec<(String, String)>,
}

impl DebugTrace {
    fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.enabled {
            self.headers.push((name.into(), value.into()));
        }
    }

    fn apply(self, response: &mut Response) {
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
    }
}

/// Fallback handler: every path that is not a control endpoint is a media
/// request.
pub async fn serve_media(State(state): State<AppState>, req: Request<Body>) -> Response {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    // Admission waits for the first configuration load; afterwards this is
    // an O(1) check.
    state.await_ready().await;

    let mut debug_trace = DebugTrace {
        enabled: req
            .headers()
            .get("x-debug")
            .and_then(|v| v.to_str().ok())
            == Some("1"),
        ..Default::default()
    };

    let path_for_log = req.uri().path().to_string();
    let (extension, response) = handle(&state, req, &mut debug_trace).await;

    let mut response = match response {
        Ok(response) => response,
        Err(e) => {
            if matches!(e, ApiError::Internal(_) | ApiError::Engine(_)) {
                error!(error = %e, path = path_for_log, "request failed");
            }
            e.into_response()
        }
    };
    debug_trace.apply(&mut response);

    if let Some(extension) = extension {
        let status = response.status();
        let outcome = if status.is_client_error() || status.is_server_error() {
            "error"
        } else {
            "ok"
        };
        REQUESTS
            .with_label_values(&[extension.as_str(), outcome])
            .inc();
    }

    response
}

/// Resolve and serve one request. Returns the extension (for metrics) as
/// soon as it is known, alongside the result.
async fn handle(
    state: &AppState,
    req: Request<Body>,
    debug_trace: &mut DebugTrace,
) -> (Option<String>, Result<Response, ApiError>) {
    let host = match req.headers().get(HOST).and_then(|v| v.to_str().ok()) {
        Some(host) => host
            .rsplit_once(':')
            .map(|(h, _)| h)
            .unwrap_or(host)
            .to_lowercase(),
        None => return (None, Err(ApiError::ForbiddenDomain)),
    };
    debug_trace.push("X-Debug-Host", &host);

    let Some(tenant) = state.lookup_tenant(&host).await else {
        return (None, Err(ApiError::ForbiddenDomain));
    };
    if tenant.config.storages.is_empty() {
        return (
            None,
            Err(ApiError::Internal(
                "no storages configured for this domain".to_string(),
            )),
        );
    }

    let raw_path = percent_encoding::percent_decode_str(req.uri().path())
        .decode_utf8_lossy()
        .into_owned();
    let original_path = raw_path
        .strip_prefix(tenant.config.prefix_path.as_str())
        .unwrap_or(&raw_path)
        .trim_matches('/')
        .to_string();

    let Some(extension) = extract_extension(&original_path) else {
        return (None, Err(ApiError::UnsupportedMedia));
    };
    debug_trace.push("X-Debug-Extension", &extension);

    let Some(media) = media_type_for(&extension) else {
        debug_trace.push("X-Debug-Error", "unsupported media type");
        return (Some(extension), Err(ApiError::UnsupportedMedia));
    };
    debug_trace.push(
        "X-Debug-MediaType",
        serde_json::to_string(media).unwrap_or_default(),
    );

    let result = serve_resolved(state, &tenant, req, media, &original_path, debug_trace).await;
    (Some(extension), result)
}

async fn serve_resolved(
    state: &AppState,
    tenant: &Arc<RuntimeTenant>,
    req: Request<Body>,
    media: &'static MediaType,
    original_path: &str,
    debug_trace: &mut DebugTrace,
) -> Result<Response, ApiError> {
    let params = query_params(req.uri().query().unwrap_or(""));
    let options = Options::parse(&params, media).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    debug_trace.push(
        "X-Debug-Options",
        serde_json::to_string(&options).unwrap_or_default(),
    );

    let video_profile = if options.profile.is_empty() {
        None
    } else {
        match state.lookup_profile(&options.profile).await {
            Some(profile) => Some(profile),
            None => {
                return Err(ApiError::BadRequest(format!(
                    "unknown video profile: {}",
                    options.profile
                )));
            }
        }
    };

    // Stage the source through the fallback chain.
    let outcome = match staging::stage(tenant, original_path).await {
        Ok(outcome) => outcome,
        Err(StagingError::InProgress) => {
            return Ok(staging_redirect(&req));
        }
        Err(StagingError::InvalidPath(e)) => {
            return Err(ApiError::BadRequest(e));
        }
        Err(e) => {
            debug_trace.push("X-Debug-Storage-Final-Error", e.to_string());
            return Err(ApiError::NotFound(e.to_string()));
        }
    };

    for attempt in &outcome.attempts {
        let n = attempt.index;
        debug_trace.push(format!("X-Debug-Storage-{n}-Type"), attempt.kind);
        debug_trace.push(format!("X-Debug-Storage-{n}-BasePath"), &attempt.base_path);
        if let Some(error) = &attempt.error {
            debug_trace.push(format!("X-Debug-Storage-{n}-Error"), error);
        }
    }
    if let Some(n) = outcome.success_index {
        debug_trace.push("X-Debug-Storage-Success", format!("storage-{n}"));
    }
    debug_trace.push(
        "X-Debug-Staged-Path",
        outcome.staged_path.display().to_string(),
    );

    let processor = processor_for(media.kind, media.extension, &options);
    let download = options.download;

    let Some(processor) = processor else {
        // Pass-through: staged bytes, source mime.
        return serve_file(req.headers(), &outcome.staged_path, media.mime, download).await;
    };

    let mut job = Job::new(
        original_path.to_string(),
        outcome.staged_path.clone(),
        tenant.config.cache_root.clone(),
        media.kind,
        options,
        video_profile,
    );

    let started = Instant::now();
    let processed = processor.process(&mut job).await;
    PROCESSING_DURATION
        .with_label_values(&[media.extension])
        .observe(started.elapsed().as_secs_f64());
    processed?;

    if let Some(probe) = &job.cache_probe {
        debug_trace.push("X-Debug-Cache-Status", probe.status);
        debug_trace.push("X-Debug-Cache-Key", &probe.key);
        debug_trace.push("X-Debug-Cache-Path", probe.path.display().to_string());
    }

    // Metadata maps short-circuit into a JSON body.
    if job.options.detail {
        if let Some(metadata) = &job.metadata {
            let body = serde_json::to_vec(metadata)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            return Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .map_err(|e| ApiError::Internal(e.to_string()));
        }
    }

    let (serve_path, mime) = match (&job.derived_path, &job.derived_mime) {
        (Some(path), Some(mime)) => (path.clone(), mime.clone()),
        (Some(path), None) => (path.clone(), media.mime.to_string()),
        // Processor ran but produced nothing: fall back to the staged file.
        (None, _) => (outcome.staged_path.clone(), media.mime.to_string()),
    };
    debug!(path = %serve_path.display(), mime = %mime, "serving derivation");

    serve_file(req.headers(), &serve_path, &mime, download).await
}

/// 307 self-redirect while another fetcher stages the file; clients retry.
fn staging_redirect(req: &Request<Body>) -> Response {
    let location = match req.uri().query() {
        Some(query) => format!("{}?{}", req.uri().path(), query),
        None => req.uri().path().to_string(),
    };

    let mut builder = Response::builder()
        .status(StatusCode::TEMPORARY_REDIRECT)
        .header(CACHE_CONTROL, NO_CACHE)
        .header(EXPIRES, "0")
        .header(PRAGMA, "no-cache");
    if let Ok(value) = HeaderValue::from_str(&location) {
        builder = builder.header(LOCATION, value);
    }
    builder.body(Body::empty()).unwrap_or_else(|_| {
        StatusCode::TEMPORARY_REDIRECT.into_response()
    })
}

/// Lowercased extension of the request path's last segment.
fn extract_extension(path: &str) -> Option<String> {
    let base = path.rsplit('/').next()?;
    let (_, ext) = base.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// First-value-wins query parameter map.
fn query_params(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        params.entry(k.into_owned()).or_insert_with(|| v.into_owned());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_extraction() {
        assert_eq!(extract_extension("a/b/photo.JPG"), Some("jpg".to_string()));
        assert_eq!(extract_extension("noext"), None);
        assert_eq!(extract_extension("trailing."), None);
        assert_eq!(extract_extension("dir.d/file.webm"), Some("webm".to_string()));
    }

    #[test]
    fn query_params_keep_first_value() {
        let params = query_params("width=800&width=600&crop");
        assert_eq!(params.get("width").unwrap(), "800");
        assert!(params.contains_key("crop"));
    }
}
