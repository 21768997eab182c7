use hemp_image_queue::{
    app_state::AppState,
    config::AppConfig,
    db,
    services::worker::{BatchRequest, Worker},
    telemetry,
};
use std::time::Duration;
use tokio::time::sleep;

/// Pause after a batch that hit a store error.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    tracing::info!("Starting image generation worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, db::CLI_POOL_SIZE)
        .await
        .expect("Failed to connect to database");

    let state = AppState::from_config(&config, db_pool)
        .await
        .expect("Failed to initialize services");

    tracing::info!(
        batch_size = config.worker_batch_size,
        poll_interval_secs = config.worker_poll_interval_secs,
        "Worker ready, starting job processing loop"
    );

    tokio::select! {
        _ = run_loop(&state.worker, &config) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping worker");
        }
    }
}

async fn run_loop(worker: &Worker, config: &AppConfig) {
    loop {
        let request = BatchRequest {
            batch_size: config.worker_batch_size,
            provider: None,
            test: false,
        };

        match worker.run_batch(request).await {
            Ok(report) if report.processed > 0 => {
                // Queue may have more work, continue immediately
                tracing::debug!(processed = report.processed, "Batch processed, claiming next");
            }
            Ok(_) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(config.poll_interval()).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Batch failed, will retry");
                sleep(ERROR_BACKOFF.max(config.poll_interval())).await;
            }
        }
    }
}
