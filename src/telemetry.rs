use tracing_subscriber::EnvFilter;

/// Initialize structured JSON logging. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Register descriptions for the metrics the queue emits.
pub fn describe_metrics() {
    metrics::describe_histogram!(
        "image_generation_seconds",
        "Time to generate, store and write back one image"
    );
    metrics::describe_counter!(
        "image_jobs_enqueued_total",
        "Total image jobs enqueued by the producer"
    );
    metrics::describe_counter!(
        "image_jobs_completed_total",
        "Total image jobs completed"
    );
    metrics::describe_counter!(
        "image_jobs_failed_total",
        "Total image jobs that failed"
    );
    metrics::describe_gauge!(
        "image_queue_depth",
        "Current number of pending image jobs"
    );
}
