use hemp_image_queue::{app_state::AppState, config::AppConfig, db, telemetry};

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let db_pool = db::init_pool(&config.database_url, db::CLI_POOL_SIZE)
        .await
        .expect("Failed to connect to database");

    let state = AppState::from_config(&config, db_pool)
        .await
        .expect("Failed to initialize services");

    let report = state
        .status
        .report()
        .await
        .expect("Failed to read queue status");

    println!(
        "{}",
        serde_json::to_string_pretty(&report).expect("Failed to encode report")
    );
}
