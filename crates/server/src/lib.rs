//! HTTP gateway for the refract media proxy.
//!
//! This crate wires the core subsystems into an axum application:
//! - Tenant routing and the request pipeline
//! - The staging cache with single-flight fetch locks
//! - The streaming responder (ranges, conditional requests)
//! - The eviction loop and Prometheus metrics

pub mod error;
pub mod eviction;
pub mod metrics;
pub mod pipeline;
pub mod respond;
pub mod routes;
pub mod staging;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::{AppState, RuntimeTenant, Tables};
