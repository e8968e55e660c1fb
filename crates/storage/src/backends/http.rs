//! HTTP origin storage driver.
//!
//! Fetches objects from an upstream HTTP server. Extra headers and query
//! parameters come from the DSN (`header[Name]=v`, `query[key]=v`) and are
//! attached to every request.

use crate::driver::{RemoteMeta, StorageDriver};
use crate::dsn::Dsn;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use refract_core::httpdate::parse_http_date;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use url::Url;

/// Per-request timeout for origin downloads. Kept under the staging lock
/// staleness window so a hung origin cannot outlive the lock.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Driver fetching over HTTP(S) from an origin server.
pub struct HttpDriver {
    client: reqwest::Client,
    base: Url,
    query: Vec<(String, String)>,
}

impl HttpDriver {
    pub fn new(dsn: &Dsn) -> StorageResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in dsn.bracket_params("header") {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StorageError::InvalidDsn(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| StorageError::InvalidDsn(format!("header value: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let base = Url::parse(&format!(
            "{}://{}/{}",
            dsn.scheme, dsn.host, dsn.path
        ))
        .map_err(|e| StorageError::InvalidDsn(e.to_string()))?;

        Ok(Self {
            client,
            base,
            query: dsn.bracket_params("query"),
        })
    }

    fn object_url(&self, key: &str) -> StorageResult<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::InvalidKey(key.to_string()))?;
            segments.pop_if_empty();
            for segment in key.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
        }
        for (k, v) in &self.query {
            url.query_pairs_mut().append_pair(k, v);
        }
        Ok(url)
    }
}

#[async_trait]
impl StorageDriver for HttpDriver {
    #[instrument(skip(self), fields(driver = "http_origin"))]
    async fn fetch_to_disk(&self, remote_key: &str, local_path: &Path) -> StorageResult<()> {
        let url = self.object_url(remote_key)?;
        let mut resp = self.client.get(url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(remote_key.to_string()));
        }
        if !resp.status().is_success() {
            return Err(StorageError::Http(format!(
                "origin returned {} for {remote_key}",
                resp.status()
            )));
        }

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(local_path).await?;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn exists(&self, remote_key: &str) -> StorageResult<bool> {
        let url = self.object_url(remote_key)?;
        let resp = self.client.head(url).send().await?;
        Ok(resp.status().is_success())
    }

    async fn stat(&self, remote_key: &str) -> StorageResult<RemoteMeta> {
        let url = self.object_url(remote_key)?;
        let resp = self.client.head(url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(remote_key.to_string()));
        }
        if !resp.status().is_success() {
            return Err(StorageError::Http(format!(
                "origin returned {} for {remote_key}",
                resp.status()
            )));
        }

        let size = resp.content_length().unwrap_or(0);
        let last_modified = resp
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_http_date(v).ok());
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(RemoteMeta {
            size,
            last_modified,
            content_type,
        })
    }

    fn driver_name(&self) -> &'static str {
        "http_origin"
    }
}
