use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metamorph::config::Settings;
use metamorph::service;

#[tokio::main]
async fn main() -> metamorph::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metamorph=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    service::validate(&settings)?;

    tracing::info!(
        workers = settings.worker_count,
        cache_version = settings.cache_version,
        "metamorph starting"
    );

    service::run(settings).await
}
