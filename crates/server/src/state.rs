//! Application state: configuration snapshots and readiness.
//!
//! The tenant and profile tables are process-wide snapshots rebuilt from the
//! metadata store at startup and on explicit reload. The snapshot is built
//! off-lock and swapped in atomically, so readers observe either the old or
//! the new table, never a partial one. A watch channel flips to `true`
//! exactly once after the first successful build; requests arriving earlier
//! block on it.

use crate::error::ApiResult;
use refract_core::config::AppConfig;
use refract_core::{StorageBinding, StorageKind, Tenant, VideoProfile};
use refract_metadata::MetadataStore;
use refract_storage::StorageDriver;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{error, info};

/// A tenant with its storage drivers constructed.
pub struct RuntimeTenant {
    pub config: Tenant,
    /// Parallel to `config.storages`.
    pub drivers: Vec<Arc<dyn StorageDriver>>,
}

/// One complete configuration snapshot.
#[derive(Default)]
pub struct Tables {
    /// Keyed by lowercase hostname.
    pub tenants: HashMap<String, Arc<RuntimeTenant>>,
    /// Keyed by profile name.
    pub profiles: HashMap<String, VideoProfile>,
}

struct StateInner {
    tables: RwLock<Arc<Tables>>,
    /// Serializes concurrent reloads.
    reload_lock: Mutex<()>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metadata: Arc<MetadataStore>,
    inner: Arc<StateInner>,
}

impl AppState {
    pub fn new(config: AppConfig, metadata: Arc<MetadataStore>) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            config: Arc::new(config),
            metadata,
            inner: Arc::new(StateInner {
                tables: RwLock::new(Arc::new(Tables::default())),
                reload_lock: Mutex::new(()),
                ready_tx,
                ready_rx,
            }),
        }
    }

    /// Rebuild the tenant and profile tables from the metadata store and
    /// swap them in. Signals readiness after the first successful build.
    pub async fn reload(&self) -> ApiResult<()> {
        let _guard = self.inner.reload_lock.lock().await;

        let tables = self.build_tables().await?;
        let tenant_count = tables.tenants.len();
        let profile_count = tables.profiles.len();

        *self.inner.tables.write().await = Arc::new(tables);
        self.inner.ready_tx.send_replace(true);

        info!(tenants = tenant_count, profiles = profile_count, "configuration tables loaded");
        Ok(())
    }

    async fn build_tables(&self) -> ApiResult<Tables> {
        let projects = self.metadata.load_projects().await?;
        let storages = self.metadata.load_storages().await?;
        let origins = self.metadata.load_origins().await?;
        let profiles = self.metadata.load_video_profiles().await?;

        let projects: HashMap<i64, _> =
            projects.into_iter().map(|p| (p.project_id, p)).collect();

        let mut tenants = HashMap::new();
        for origin in origins {
            let Some(project) = projects.get(&origin.project_id) else {
                continue;
            };

            let mut bindings = Vec::new();
            let mut drivers = Vec::new();
            // `storages` is priority-ordered from the store.
            for row in storages.iter().filter(|s| s.project_id == origin.project_id) {
                let Some(kind) = StorageKind::parse(&row.kind) else {
                    error!(storage_id = row.storage_id, kind = %row.kind, "unknown storage kind, skipping");
                    continue;
                };
                match refract_storage::connect(kind, &row.dsn) {
                    Ok(driver) => {
                        bindings.push(StorageBinding {
                            kind,
                            base_path: row.base_path.trim_matches('/').to_string(),
                            dsn: row.dsn.clone(),
                            priority: row.priority,
                        });
                        drivers.push(driver);
                    }
                    Err(e) => {
                        error!(storage_id = row.storage_id, error = %e, "storage driver init failed, skipping");
                    }
                }
            }

            let tenant = Tenant {
                domain: origin.domain.to_lowercase(),
                prefix_path: origin.prefix_path.clone(),
                project: project.name.clone(),
                cache_root: PathBuf::from(&project.cache_dir),
                cache_budget: project.cache_size.clone(),
                storages: bindings,
            };

            tenants.insert(
                tenant.domain.clone(),
                Arc::new(RuntimeTenant {
                    config: tenant,
                    drivers,
                }),
            );
        }

        let profiles = profiles
            .into_iter()
            .map(|p| {
                (
                    p.profile.clone(),
                    VideoProfile {
                        profile: p.profile,
                        width: p.width.max(0) as u32,
                        height: p.height.max(0) as u32,
                        quality: p.quality.max(0) as u32,
                        codec: p.codec,
                    },
                )
            })
            .collect();

        Ok(Tables { tenants, profiles })
    }

    /// Current snapshot. The read lock is held only for the Arc clone.
    pub async fn tables(&self) -> Arc<Tables> {
        self.inner.tables.read().await.clone()
    }

    /// Look up a tenant by lowercase hostname.
    pub async fn lookup_tenant(&self, host: &str) -> Option<Arc<RuntimeTenant>> {
        self.tables().await.tenants.get(host).cloned()
    }

    /// Look up a video profile by name.
    pub async fn lookup_profile(&self, name: &str) -> Option<VideoProfile> {
        self.tables().await.profiles.get(name).cloned()
    }

    /// Block until the first successful table build. A no-op afterwards.
    pub async fn await_ready(&self) {
        if *self.inner.ready_rx.borrow() {
            return;
        }
        let mut rx = self.inner.ready_rx.clone();
        // The sender lives in StateInner, so this cannot fail while the
        // state is alive.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}
