use axum::{routing::get, routing::post, Router};
use hemp_image_queue::{app_state::AppState, config::AppConfig, db, routes, telemetry};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing hemp-image-queue server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    telemetry::describe_metrics();

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url, db::SERVER_POOL_SIZE)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let state = AppState::from_config(&config, db_pool)
        .await
        .expect("Failed to initialize application state");

    let api = Router::new()
        .route(
            "/api/v1/image-queue/enqueue",
            post(routes::queue::enqueue_missing),
        )
        .route("/api/v1/image-queue/jobs", post(routes::queue::create_job))
        .route("/api/v1/image-queue/jobs/{id}", get(routes::queue::get_job))
        .route(
            "/api/v1/image-queue/jobs/{id}/retry",
            post(routes::queue::retry_job),
        )
        .route(
            "/api/v1/image-queue/process",
            post(routes::queue::process_batch),
        )
        .route("/api/v1/image-queue/status", get(routes::queue::queue_status));

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .merge(api)
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");
}
