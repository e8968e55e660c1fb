//! S3-compatible object store driver using the AWS SDK.

use crate::driver::{RemoteMeta, StorageDriver};
use crate::dsn::Dsn;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use std::path::Path;
use tokio::fs;
use tracing::instrument;

/// Driver fetching from an S3-compatible object store.
pub struct S3Driver {
    client: Client,
    bucket: String,
}

impl S3Driver {
    pub fn new(dsn: &Dsn) -> StorageResult<Self> {
        if dsn.host.is_empty() {
            return Err(StorageError::InvalidDsn("missing endpoint".to_string()));
        }
        let bucket = dsn.path.clone();
        if bucket.is_empty() {
            return Err(StorageError::InvalidDsn("missing bucket".to_string()));
        }

        let region = dsn
            .params
            .get("region")
            .cloned()
            .unwrap_or_else(|| "us-east-1".to_string());

        // Endpoints without a scheme get https, or http when insecure=true.
        let endpoint = if dsn.host.contains("://") {
            dsn.host.clone()
        } else if dsn.flag("insecure") {
            format!("http://{}", dsn.host)
        } else {
            format!("https://{}", dsn.host)
        };

        let credentials = Credentials::new(
            dsn.username.clone(),
            dsn.password.clone(),
            None,
            None,
            "refract-dsn",
        );

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(region))
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .force_path_style(dsn.flag("path_style"))
            .build();

        Ok(Self {
            client: Client::from_conf(config),
            bucket,
        })
    }
}

#[async_trait]
impl StorageDriver for S3Driver {
    #[instrument(skip(self), fields(driver = "object_store"))]
    async fn fetch_to_disk(&self, remote_key: &str, local_path: &Path) -> StorageResult<()> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(remote_key)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    StorageError::NotFound(remote_key.to_string())
                } else {
                    StorageError::S3(service_err.to_string())
                }
            })?;

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(local_path).await?;
        let mut body = resp.body.into_async_read();
        tokio::io::copy(&mut body, &mut file).await?;
        Ok(())
    }

    async fn exists(&self, remote_key: &str) -> StorageResult<bool> {
        match self.stat(remote_key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn stat(&self, remote_key: &str) -> StorageResult<RemoteMeta> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(remote_key)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    StorageError::NotFound(remote_key.to_string())
                } else {
                    StorageError::S3(service_err.to_string())
                }
            })?;

        let last_modified = resp.last_modified().and_then(|t| {
            time::OffsetDateTime::from_unix_timestamp(t.secs()).ok()
        });

        Ok(RemoteMeta {
            size: resp.content_length().unwrap_or(0).max(0) as u64,
            last_modified,
            content_type: resp.content_type().map(str::to_string),
        })
    }

    fn driver_name(&self) -> &'static str {
        "object_store"
    }
}
