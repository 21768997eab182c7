use clap::Parser;
use hemp_image_queue::{
    db::{self, queries::PgJobStore, target_queries::PgTargetRepository},
    models::target::TargetKind,
    services::producer::Producer,
    telemetry,
};
use std::sync::Arc;
use std::time::Duration;

/// Enqueue image jobs for catalog entities that are missing an image.
#[derive(Parser, Debug)]
#[command(name = "populate_queue", about = "Enqueue image jobs for entities without images")]
struct Args {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Entity kinds to scan (comma-separated). Scans every kind when omitted.
    /// Example: --kinds plant_type,product
    #[arg(long, value_delimiter = ',')]
    kinds: Vec<TargetKind>,

    /// Maximum number of jobs to enqueue in this run
    #[arg(long)]
    limit: Option<u32>,

    /// Seconds after which a processing claim counts as stale
    #[arg(long, default_value_t = 300, env = "CLAIM_TIMEOUT_SECS")]
    claim_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();
    let args = Args::parse();

    let db_pool = db::init_pool(&args.database_url, db::CLI_POOL_SIZE)
        .await
        .expect("Failed to connect to database");

    let producer = Producer::new(
        Arc::new(PgJobStore::new(
            db_pool.clone(),
            Duration::from_secs(args.claim_timeout_secs),
        )),
        Arc::new(PgTargetRepository::new(db_pool)),
    );

    let report = producer
        .run(&args.kinds, args.limit)
        .await
        .expect("Producer run failed");

    println!(
        "{}",
        serde_json::to_string_pretty(&report).expect("Failed to encode report")
    );
}
