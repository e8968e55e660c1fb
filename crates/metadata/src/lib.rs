//! SQLite-backed configuration store for refract.
//!
//! Holds the durable records behind the in-memory tenant and profile tables:
//! projects (cache settings), storages (driver bindings), origins (domain →
//! project), and video profiles. The server rebuilds its snapshots from this
//! store at startup and on `/admin/reload`; the admin CRUD surface that
//! writes these tables lives outside this crate.

pub mod error;
pub mod models;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{OriginRow, ProjectRow, StorageRow, VideoProfileRow};
pub use store::MetadataStore;
