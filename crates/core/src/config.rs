//! Configuration types shared across crates.
//!
//! Loaded by the server binary through figment (TOML file plus `REFRACT_`
//! environment overrides). Tenants, storages, and profiles live in the
//! relational store, not here; this file covers process-level settings only.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /prometheus/metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Configuration store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Path to the SQLite database holding projects/storages/origins/profiles.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

/// Cache eviction settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Seconds between eviction passes (default: 300).
    #[serde(default = "default_eviction_interval_secs")]
    pub interval_secs: u64,
}

/// Top-level application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub eviction: EvictionConfig,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_db_path() -> PathBuf {
    PathBuf::from("refract.db")
}

fn default_eviction_interval_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_eviction_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            metadata: MetadataConfig::default(),
            eviction: EvictionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Create a test configuration bound to an ephemeral port.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
                metrics_enabled: true,
            },
            metadata: MetadataConfig {
                path: PathBuf::from("refract-test.db"),
            },
            eviction: EvictionConfig::default(),
        }
    }
}
