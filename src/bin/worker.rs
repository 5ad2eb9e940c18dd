use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use lifted::{
    auth::jwt::JwtService, config::AppConfig, db, render::TextDeckRenderer, s3::build_client,
    state::AppState, storage::S3Storage, Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 2,
        s3_bucket = %config.s3_bucket,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 2)?;
    let s3_client = build_client(&config).await?;
    let storage = Arc::new(S3Storage::new(s3_client, config.s3_bucket.clone()));
    let renderer = Arc::new(TextDeckRenderer::new());
    let jwt = JwtService::from_config(&config)?;
    let poll_interval = Duration::from_secs(config.worker_poll_seconds);

    let state = Arc::new(AppState::new(pool, config, storage, renderer, jwt));
    let worker = Worker::new(state, poll_interval);

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
