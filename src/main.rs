use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use livestock_diagnosis::{
    bootstrap::ensure_artifacts, create_router, AppState, Config, InferenceService,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "livestock_diagnosis=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Config::from_env()?;
    ensure_artifacts(&config).await?;

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create upload directory {}",
                config.upload_dir.display()
            )
        })?;

    let service = InferenceService::load(&config)?;
    let state = Arc::new(AppState {
        service,
        upload_dir: config.upload_dir.clone(),
    });
    let app = create_router(state, config.body_limit_bytes, config.cors_permissive);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(
        address = %addr,
        workers = config.inference_workers,
        body_limit_mb = config.body_limit_bytes / 1024 / 1024,
        cors_permissive = config.cors_permissive,
        "Listening on http://{}",
        addr
    );

    axum::Server::try_bind(&addr)?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
