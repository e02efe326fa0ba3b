use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use pressroom_api::app::{build_app, build_services};
use pressroom_api::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pressroom_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(build_services(&config).await?);

    let recovered = services
        .pipeline
        .recover_pending()
        .await
        .context("failed to re-dispatch pending jobs")?;
    let sweeper = services.spawn_sweeper(&config);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, recovered, "listening");

    axum::serve(listener, build_app(services))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.shutdown().await;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}
