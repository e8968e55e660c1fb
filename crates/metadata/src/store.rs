//! SQLite store implementation.

use crate::error::MetadataResult;
use crate::models::{OriginRow, ProjectRow, StorageRow, VideoProfileRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

/// Schema applied on open. Soft deletes follow the admin subsystem's
/// convention: a non-NULL deleted_at hides the row from loads.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS project (
    project_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    cache_dir   TEXT NOT NULL DEFAULT '',
    cache_size  TEXT NOT NULL DEFAULT '',
    cache_ttl   TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at  TEXT
);

CREATE TABLE IF NOT EXISTS storage (
    storage_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id  INTEGER NOT NULL REFERENCES project(project_id),
    type        TEXT NOT NULL,
    base_path   TEXT NOT NULL DEFAULT '',
    dsn         TEXT NOT NULL,
    priority    INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at  TEXT
);

CREATE TABLE IF NOT EXISTS origin (
    origin_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id  INTEGER NOT NULL REFERENCES project(project_id),
    domain      TEXT NOT NULL UNIQUE,
    prefix_path TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at  TEXT
);

CREATE TABLE IF NOT EXISTS video_profile (
    profile     TEXT PRIMARY KEY,
    width       INTEGER NOT NULL,
    height      INTEGER NOT NULL,
    quality     INTEGER NOT NULL,
    codec       TEXT NOT NULL DEFAULT ''
);
"#;

/// SQLite-backed configuration store.
pub struct MetadataStore {
    pool: Pool<Sqlite>,
}

impl MetadataStore {
    /// Open (creating if missing) the database at `path` and apply the schema.
    pub async fn new(path: &Path) -> MetadataResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// All live projects.
    pub async fn load_projects(&self) -> MetadataResult<Vec<ProjectRow>> {
        let rows = sqlx::query(
            "SELECT project_id, name, cache_dir, cache_size
             FROM project WHERE deleted_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ProjectRow {
                project_id: r.get("project_id"),
                name: r.get("name"),
                cache_dir: r.get("cache_dir"),
                cache_size: r.get("cache_size"),
            })
            .collect())
    }

    /// All live storages, ordered by ascending priority.
    pub async fn load_storages(&self) -> MetadataResult<Vec<StorageRow>> {
        let rows = sqlx::query(
            "SELECT storage_id, project_id, type, base_path, dsn, priority
             FROM storage WHERE deleted_at IS NULL ORDER BY priority ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StorageRow {
                storage_id: r.get("storage_id"),
                project_id: r.get("project_id"),
                kind: r.get("type"),
                base_path: r.get("base_path"),
                dsn: r.get("dsn"),
                priority: r.get("priority"),
            })
            .collect())
    }

    /// All live origins.
    pub async fn load_origins(&self) -> MetadataResult<Vec<OriginRow>> {
        let rows = sqlx::query(
            "SELECT origin_id, project_id, domain, prefix_path
             FROM origin WHERE deleted_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| OriginRow {
                origin_id: r.get("origin_id"),
                project_id: r.get("project_id"),
                domain: r.get("domain"),
                prefix_path: r.get("prefix_path"),
            })
            .collect())
    }

    /// All video profiles.
    pub async fn load_video_profiles(&self) -> MetadataResult<Vec<VideoProfileRow>> {
        let rows = sqlx::query("SELECT profile, width, height, quality, codec FROM video_profile")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| VideoProfileRow {
                profile: r.get("profile"),
                width: r.get("width"),
                height: r.get("height"),
                quality: r.get("quality"),
                codec: r.get("codec"),
            })
            .collect())
    }

    /// Insert a project, returning its id.
    pub async fn create_project(
        &self,
        name: &str,
        cache_dir: &str,
        cache_size: &str,
    ) -> MetadataResult<i64> {
        let result = sqlx::query(
            "INSERT INTO project (name, cache_dir, cache_size) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(cache_dir)
        .bind(cache_size)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Insert a storage binding, returning its id.
    pub async fn create_storage(
        &self,
        project_id: i64,
        kind: &str,
        base_path: &str,
        dsn: &str,
        priority: i64,
    ) -> MetadataResult<i64> {
        let result = sqlx::query(
            "INSERT INTO storage (project_id, type, base_path, dsn, priority)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(project_id)
        .bind(kind)
        .bind(base_path)
        .bind(dsn)
        .bind(priority)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Insert an origin, returning its id.
    pub async fn create_origin(
        &self,
        project_id: i64,
        domain: &str,
        prefix_path: &str,
    ) -> MetadataResult<i64> {
        let result = sqlx::query(
            "INSERT INTO origin (project_id, domain, prefix_path) VALUES (?, ?, ?)",
        )
        .bind(project_id)
        .bind(domain)
        .bind(prefix_path)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Insert or replace a video profile.
    pub async fn upsert_video_profile(&self, profile: &VideoProfileRow) -> MetadataResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO video_profile (profile, width, height, quality, codec)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&profile.profile)
        .bind(profile.width)
        .bind(profile.height)
        .bind(profile.quality)
        .bind(&profile.codec)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn open_store(dir: &tempfile::TempDir) -> MetadataStore {
        MetadataStore::new(&dir.path().join("config.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn round_trips_configuration() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        let project = store.create_project("demo", "/var/cache/demo", "10GB").await.unwrap();
        store
            .create_storage(project, "local", "media", "local:///srv/media", 1)
            .await
            .unwrap();
        store
            .create_storage(project, "http_origin", "", "https://origin.example.com/m", 2)
            .await
            .unwrap();
        store
            .create_origin(project, "cdn.example.com", "/static")
            .await
            .unwrap();

        let origins = store.load_origins().await.unwrap();
        assert_eq!(origins.len(), 1);
        assert_eq!(origins[0].domain, "cdn.example.com");

        let storages = store.load_storages().await.unwrap();
        assert_eq!(storages.len(), 2);
        assert_eq!(storages[0].kind, "local");
        assert!(storages[0].priority < storages[1].priority);
    }

    #[tokio::test]
    async fn video_profiles_upsert() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        let profile = VideoProfileRow {
            profile: "mobile".to_string(),
            width: 854,
            height: 480,
            quality: 60,
            codec: "libx264".to_string(),
        };
        store.upsert_video_profile(&profile).await.unwrap();
        store.upsert_video_profile(&profile).await.unwrap();

        let profiles = store.load_video_profiles().await.unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].width, 854);
    }
}
