//! Row types for the configuration tables.

/// A project: cache settings shared by one or more origins.
#[derive(Clone, Debug)]
pub struct ProjectRow {
    pub project_id: i64,
    pub name: String,
    pub cache_dir: String,
    /// Human-readable budget ("10GB"); empty or "0" means unlimited.
    pub cache_size: String,
}

/// A storage binding of a project.
#[derive(Clone, Debug)]
pub struct StorageRow {
    pub storage_id: i64,
    pub project_id: i64,
    /// Driver kind: local | object_store | http_origin.
    pub kind: String,
    /// Prefix joined in front of request paths before the driver fetch.
    pub base_path: String,
    /// Driver DSN.
    pub dsn: String,
    pub priority: i64,
}

/// A registered hostname routing to a project.
#[derive(Clone, Debug)]
pub struct OriginRow {
    pub origin_id: i64,
    pub project_id: i64,
    pub domain: String,
    pub prefix_path: String,
}

/// A named video transcode profile.
#[derive(Clone, Debug)]
pub struct VideoProfileRow {
    pub profile: String,
    pub width: i64,
    pub height: i64,
    pub quality: i64,
    pub codec: String,
}
