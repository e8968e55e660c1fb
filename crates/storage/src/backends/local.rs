//! Local filesystem storage driver.

use crate::driver::{RemoteMeta, StorageDriver};
use crate::dsn::Dsn;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use refract_core::pathsafe::join_under;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::instrument;

/// Driver reading from a directory on the local machine.
pub struct LocalDriver {
    root: PathBuf,
}

impl LocalDriver {
    pub fn new(dsn: &Dsn) -> Self {
        Self {
            root: PathBuf::from(dsn.local_root()),
        }
    }

    /// Resolve a key under the root, rejecting traversal.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        Ok(join_under(&self.root, key)?)
    }
}

#[async_trait]
impl StorageDriver for LocalDriver {
    #[instrument(skip(self), fields(driver = "local"))]
    async fn fetch_to_disk(&self, remote_key: &str, local_path: &Path) -> StorageResult<()> {
        let src = self.key_path(remote_key)?;
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src, local_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(remote_key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(())
    }

    async fn exists(&self, remote_key: &str) -> StorageResult<bool> {
        let path = self.key_path(remote_key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn stat(&self, remote_key: &str) -> StorageResult<RemoteMeta> {
        let path = self.key_path(remote_key)?;
        let meta = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(remote_key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(RemoteMeta {
            size: meta.len(),
            last_modified: meta.modified().ok().map(Into::into),
            content_type: None,
        })
    }

    fn driver_name(&self) -> &'static str {
        "local"
    }
}
