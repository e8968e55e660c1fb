//! Common test utilities.

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use refract_metadata::MetadataStore;
use refract_server::{AppState, create_router};
use refract_core::config::AppConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Test domain registered by default.
pub const TEST_DOMAIN: &str = "example.com";

/// A test server with a local storage root and cache directory.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    pub storage_root: PathBuf,
    pub cache_root: PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a server with one tenant backed by a local storage driver.
    pub async fn new() -> Self {
        Self::with_budget("").await
    }

    /// Same, with a cache budget for eviction tests.
    pub async fn with_budget(cache_size: &str) -> Self {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let storage_root = temp_dir.path().join("storage");
        let cache_root = temp_dir.path().join("cache");
        std::fs::create_dir_all(&storage_root).unwrap();
        std::fs::create_dir_all(&cache_root).unwrap();

        let db_path = temp_dir.path().join("config.db");
        let metadata = Arc::new(MetadataStore::new(&db_path).await.unwrap());

        let project = metadata
            .create_project("test", cache_root.to_str().unwrap(), cache_size)
            .await
            .unwrap();
        metadata
            .create_storage(
                project,
                "local",
                "",
                &format!("local://{}", storage_root.display()),
                1,
            )
            .await
            .unwrap();
        metadata
            .create_origin(project, TEST_DOMAIN, "")
            .await
            .unwrap();

        let state = AppState::new(AppConfig::for_testing(), metadata);
        state.reload().await.unwrap();
        refract_server::metrics::register_metrics();

        let router = create_router(state.clone());
        Self {
            router,
            state,
            storage_root,
            cache_root,
            _temp_dir: temp_dir,
        }
    }

    /// Write a file into the backing storage.
    pub fn write_source(&self, rel_path: &str, bytes: &[u8]) {
        let path = self.storage_root.join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, bytes).unwrap();
    }

    /// Issue a GET with optional extra headers, returning status, headers,
    /// and body.
    pub async fn get(
        &self,
        host: &str,
        path_and_query: &str,
        extra_headers: &[(&str, &str)],
    ) -> (StatusCode, HeaderMap, Vec<u8>) {
        let mut builder = Request::builder()
            .method("GET")
            .uri(path_and_query)
            .header("host", host);
        for (name, value) in extra_headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty()).unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        (status, headers, body)
    }
}

/// Header value as &str, or "".
#[allow(dead_code)]
pub fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

#[allow(dead_code)]
pub fn exists_under(root: &Path, rel: &str) -> bool {
    root.join(rel).exists()
}
