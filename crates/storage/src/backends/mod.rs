//! Storage backend implementations.

pub mod http;
pub mod local;
pub mod s3;
