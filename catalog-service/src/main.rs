use catalog_service::services::init_metrics;
use catalog_service::startup::bootstrap;
use service_core::observability::init_logging;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_logging("info");

    // Must be installed before anything records a metric.
    init_metrics().map_err(|e| std::io::Error::other(e.to_string()))?;

    let app = bootstrap().await.map_err(|e| {
        tracing::error!("Failed to start catalog service: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    app.run_until_stopped().await;

    Ok(())
}
