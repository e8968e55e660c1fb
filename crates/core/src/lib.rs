//! Core domain types and shared logic for the refract media proxy.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Tenant, storage binding, and video profile models
//! - The media-type table (extension → mime / kind / allowed outputs)
//! - Request options: parsing, ladder snapping, canonical fragments
//! - Cache budget parsing and path-traversal guards
//! - HTTP date formatting and parsing

pub mod bytesize;
pub mod config;
pub mod error;
pub mod httpdate;
pub mod mediatype;
pub mod model;
pub mod options;
pub mod pathsafe;

pub use bytesize::parse_cache_size;
pub use error::{Error, Result};
pub use mediatype::{MediaKind, MediaType, media_type_for};
pub use model::{StorageBinding, StorageKind, Tenant, VideoProfile, aspect_ratio_name};
pub use options::{CropAnchor, Options, snap_to_ladder};
pub use pathsafe::join_under;

/// Descending ladder of allowed image dimensions.
pub const IMAGE_SIZES: &[u32] = &[
    3840, 2560, 1920, 1600, 1280, 1024, 960, 854, 800, 720, 640, 512, 480, 360, 320, 240, 160,
    128, 96, 64, 32,
];

/// Descending ladder of allowed quality values.
pub const IMAGE_QUALITY: &[u32] = &[100, 90, 85, 80, 75, 60, 50];
