use anyhow::Context;

use dirbatch_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dirbatch_observability::init();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    let (app, services) = dirbatch_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        workers = config.workers,
        max_concurrent = config.max_concurrent,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    services.shutdown().await;
    Ok(())
}
