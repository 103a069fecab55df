use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::engine::{
    AdmissionLimiter, HorizonLedgerTracker, LedgerNumberTracker, RetryPolicy, SeedEncrypter,
    SignatureService, StellarSignatureService,
};
use crate::error::AppResult;
use crate::events::dispatcher::EventDispatcher;
use crate::events::LoggingEventProducer;
use crate::horizon::{HorizonClient, ReqwestHorizonClient};
use crate::monitor::{TracingCrashTracker, TracingMonitorService};
use crate::provisioning::ChannelAccountService;
use crate::store::bundles::BundleRepository;
use crate::store::channel_accounts::ChannelAccountRepository;
use crate::store::outbox::OutboxRepository;
use crate::store::{Store, SubmitterStore};
use crate::submitter::{EnvelopeBuilder, HandlerRegistry, SubmissionScheduler, TransactionWorker};

/// Handles to the running background loops plus the switch that stops them.
pub struct App {
    pub shutdown: watch::Sender<bool>,
    pub scheduler: JoinHandle<()>,
    pub dispatcher: JoinHandle<()>,
}

pub async fn initialize_app(config: Config) -> AppResult<App> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url).await?;

    // Horizon and ledger tracking
    let horizon: Arc<dyn HorizonClient> = Arc::new(ReqwestHorizonClient::new(&config.horizon_url)?);
    info!("✅ Horizon client ready: {}", config.horizon_url);

    let ledger_tracker: Arc<dyn LedgerNumberTracker> = Arc::new(HorizonLedgerTracker::new(
        horizon.clone(),
        Duration::from_secs(config.max_ledger_age_secs),
        config.ledger_bounds_increment,
    ));

    // Signing
    let encrypter = SeedEncrypter::new(&config.channel_encryption_passphrase);
    let signer: Arc<dyn SignatureService> = Arc::new(StellarSignatureService::new(
        &config.distribution_seed,
        ChannelAccountRepository::new(pool.clone()),
        encrypter.clone(),
    )?);
    info!(
        "✅ Signature service ready: {}",
        signer.distribution_public_key()
    );

    // Channel account pool
    let provisioner = ChannelAccountService::new(
        ChannelAccountRepository::new(pool.clone()),
        horizon.clone(),
        ledger_tracker.clone(),
        signer.clone(),
        encrypter,
        &config.network_passphrase,
        config.max_base_fee,
    );
    provisioner.ensure_count(config.num_channel_accounts).await?;
    info!(
        "✅ Channel account pool at {} accounts",
        config.num_channel_accounts
    );

    // Submission pipeline
    let limiter = Arc::new(AdmissionLimiter::new(
        config.num_channel_accounts,
        config.bundles_selection_limit_floor,
        config.indeterminate_responses_tolerance,
        chrono::Duration::minutes(config.response_window_minutes),
    ));

    let store: Arc<dyn SubmitterStore> = Arc::new(Store::new(pool.clone()));
    let worker = Arc::new(TransactionWorker::new(
        store,
        horizon,
        ledger_tracker.clone(),
        signer,
        EnvelopeBuilder::new(&config.network_passphrase, config.max_base_fee),
        HandlerRegistry::with_defaults(),
        limiter.clone(),
        RetryPolicy,
        Arc::new(TracingMonitorService),
        Arc::new(TracingCrashTracker),
    ));
    info!("✅ Transaction worker ready");

    // Background loops
    let (shutdown, shutdown_rx) = watch::channel(false);

    let dispatcher = EventDispatcher::new(
        OutboxRepository::new(pool.clone()),
        Arc::new(LoggingEventProducer),
        Duration::from_secs(config.queue_polling_interval_secs),
        shutdown_rx.clone(),
    )
    .start();

    let scheduler = SubmissionScheduler::new(
        BundleRepository::new(pool),
        ledger_tracker,
        limiter,
        worker,
        Duration::from_secs(config.queue_polling_interval_secs),
        shutdown_rx,
    )
    .start();

    Ok(App {
        shutdown,
        scheduler,
        dispatcher,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(300)
        .min_connections(30)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 300 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
