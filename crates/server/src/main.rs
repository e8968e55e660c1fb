//! Refract server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use refract_core::config::AppConfig;
use refract_metadata::MetadataStore;
use refract_server::eviction::spawn_eviction_loop;
use refract_server::{AppState, create_router};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Refract - a self-hosted media transformation proxy
#[derive(Parser, Debug)]
#[command(name = "refractd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "REFRACT_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "refract_server=info,refract_engine=info,refract_storage=info,tower_http=warn".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config: AppConfig = Figment::new()
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("REFRACT_").split("__"))
        .extract()
        .with_context(|| format!("failed to load configuration from {}", args.config))?;

    refract_server::metrics::register_metrics();

    let metadata = Arc::new(
        MetadataStore::new(&config.metadata.path)
            .await
            .with_context(|| {
                format!(
                    "failed to open metadata store at {}",
                    config.metadata.path.display()
                )
            })?,
    );

    let state = AppState::new(config, metadata);

    // The first build signals readiness; requests queue until it lands.
    state
        .reload()
        .await
        .context("initial configuration load failed")?;

    // One pass immediately, then the periodic sweep.
    let _eviction = spawn_eviction_loop(state.clone());

    let bind = state.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %bind, "refractd listening");

    let router = create_router(state);
    axum::serve(listener, router)
        .await
        .context("server error")?;

    Ok(())
}
