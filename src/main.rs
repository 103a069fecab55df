mod bootstrap;
mod config;
mod engine;
mod error;
mod events;
mod horizon;
mod monitor;
mod provisioning;
mod store;
mod submitter;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,submitter=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("🚀 Starting transaction submission service");

    // Load configuration
    dotenv::dotenv().ok();
    let app_config = config::Config::from_env()?;
    app_config.validate()?;

    let app = bootstrap::initialize_app(app_config).await?;
    info!("🌐 Submission service started successfully");

    tokio::signal::ctrl_c().await?;
    info!("↩️ Shutdown signal received, draining workers");

    let _ = app.shutdown.send(true);
    app.scheduler.await?;
    app.dispatcher.await?;

    info!("✓ Shutdown complete");
    Ok(())
}
