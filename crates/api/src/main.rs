use std::sync::Arc;

use anyhow::Context;

use gradeflow_api::app::{self, services, AppServices, AuthSettings};
use gradeflow_infra::{Pipeline, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    gradeflow_observability::init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;

    let (store, results) = services::build_stores(&config)
        .await
        .context("failed to initialise stores")?;
    let generator = services::build_generator(&config);

    let pipeline = Pipeline::start(config.pipeline.clone(), store, results, generator);
    let app = app::build_app(
        Arc::new(AppServices::from_pipeline(&pipeline)),
        AuthSettings::from_config(&config),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await
        .context("server error")?;

    pipeline.shutdown().await;
    Ok(())
}
