//! Storage driver trait and factory.

use crate::backends::{http::HttpDriver, local::LocalDriver, s3::S3Driver};
use crate::dsn::Dsn;
use crate::error::StorageResult;
use async_trait::async_trait;
use refract_core::StorageKind;
use std::path::Path;
use std::sync::Arc;

/// Metadata about a remote object.
#[derive(Clone, Debug)]
pub struct RemoteMeta {
    pub size: u64,
    pub last_modified: Option<time::OffsetDateTime>,
    pub content_type: Option<String>,
}

/// A storage backend the proxy can fetch source assets from.
///
/// `fetch_to_disk` is the only operation the request path requires; the rest
/// exist for diagnostics. Keys are slash-separated relative paths, already
/// prefixed with the binding's base path by the caller.
#[async_trait]
pub trait StorageDriver: Send + Sync + 'static {
    /// Download `remote_key` into `local_path`, creating parent directories.
    async fn fetch_to_disk(&self, remote_key: &str, local_path: &Path) -> StorageResult<()>;

    /// Check whether an object exists.
    async fn exists(&self, remote_key: &str) -> StorageResult<bool>;

    /// Object metadata without fetching content.
    async fn stat(&self, remote_key: &str) -> StorageResult<RemoteMeta>;

    /// Static identifier for logging and debug headers.
    fn driver_name(&self) -> &'static str;
}

/// Construct a driver for a storage binding.
pub fn connect(kind: StorageKind, dsn: &str) -> StorageResult<Arc<dyn StorageDriver>> {
    let parsed = Dsn::parse(dsn)?;
    Ok(match kind {
        StorageKind::Local => Arc::new(LocalDriver::new(&parsed)),
        StorageKind::ObjectStore => Arc::new(S3Driver::new(&parsed)?),
        StorageKind::HttpOrigin => Arc::new(HttpDriver::new(&parsed)?),
    })
}
