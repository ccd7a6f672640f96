//! Orchestrator process entrypoint.
//!
//! Reads config from the environment, connects to the external SQL
//! store, and runs the connector-agnostic periodic jobs — orphan
//! cleanup, cooldown reenqueue, and indexer-health polling — each on
//! its own timer.
//!
//! Per-connector work (enqueue, dequeue-and-dispatch, notification
//! batch-flush) needs a connector id and a resolved client/credential
//! per call; connector discovery and management are external
//! collaborators this crate doesn't model, so that wiring belongs to
//! the embedding service, driving `queue::enqueue_pending_items`,
//! `queue::dequeue_priority_items`, `dispatcher::dispatch_batch`, and
//! `notification_dispatcher::flush_channel_batch` per known connector.
//!
//! Exit codes: `0` on a clean shutdown, `1` on a fatal startup error
//! (for example a missing or malformed `SECRET_KEY`).

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use search_orchestrator::config::OrchestratorConfig;
use search_orchestrator::crypto::CredentialCipher;
use search_orchestrator::logging::init_tracing;

#[cfg(feature = "database")]
use search_orchestrator::db::{
    PgApiKeyThrottleRepository, PgContentMetadataLookup, PgIndexerHealthRepository, PgNotificationRepository, PgQueueRepository,
    PgSearchRegistryRepository, PgThrottleRepository,
};
#[cfg(feature = "database")]
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match OrchestratorConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "fatal configuration error, exiting");
            return ExitCode::FAILURE;
        }
    };

    let cipher = match CredentialCipher::new(&config.secret_key) {
        Ok(cipher) => cipher,
        Err(error) => {
            tracing::error!(%error, "SECRET_KEY rejected by credential cipher, exiting");
            return ExitCode::FAILURE;
        }
    };

    #[cfg(not(feature = "database"))]
    {
        let _ = cipher;
        tracing::error!("this build has no storage backend wired in (build with --features database), exiting");
        return ExitCode::FAILURE;
    }

    #[cfg(feature = "database")]
    {
        run(config, cipher).await
    }
}

#[cfg(feature = "database")]
async fn run(config: OrchestratorConfig, cipher: CredentialCipher) -> ExitCode {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            tracing::error!("DATABASE_URL must be set");
            return ExitCode::FAILURE;
        }
    };

    let pool = match PgPoolOptions::new().max_connections(10).connect(&database_url).await {
        Ok(pool) => pool,
        Err(error) => {
            tracing::error!(%error, "failed to connect to database, exiting");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("connected to database");

    let registry_repo = Arc::new(PgSearchRegistryRepository::new(pool.clone()));
    let queue_repo = Arc::new(PgQueueRepository::new(pool.clone()));
    let throttle_repo = Arc::new(PgThrottleRepository::new(pool.clone()));
    let api_key_throttle_repo = Arc::new(PgApiKeyThrottleRepository::new(pool.clone()));
    let indexer_health_repo = Arc::new(PgIndexerHealthRepository::new(pool.clone()));
    let notification_repo = Arc::new(PgNotificationRepository::new(pool.clone()));
    let content_lookup = Arc::new(PgContentMetadataLookup::new(pool.clone()));
    let _ = &api_key_throttle_repo; // wired for inbound API metering middleware, not the periodic jobs below
    let _ = &notification_repo; // consumed by the event emitters that call search_orchestrator::notification_dispatcher::dispatch

    let cipher = Arc::new(cipher);
    let config = Arc::new(config);

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(orphan_cleanup_loop(registry_repo.clone(), config.clone())));
    tasks.push(tokio::spawn(reenqueue_loop(registry_repo.clone(), config.clone())));
    tasks.push(tokio::spawn(indexer_health_loop(indexer_health_repo.clone(), config.clone())));

    tracing::info!("orchestrator started, periodic jobs running");
    let _ = (registry_repo, queue_repo, throttle_repo, content_lookup, cipher);

    let mut shutdown = Box::pin(tokio::signal::ctrl_c());
    tokio::select! {
        _ = &mut shutdown => {
            tracing::info!("shutdown signal received, draining");
        }
    }

    for task in tasks {
        task.abort();
    }
    ExitCode::SUCCESS
}

#[cfg(feature = "database")]
async fn orphan_cleanup_loop(
    registry_repo: Arc<search_orchestrator::db::PgSearchRegistryRepository>,
    config: Arc<OrchestratorConfig>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(5 * 60));
    loop {
        ticker.tick().await;
        let now = Utc::now();
        match search_orchestrator::registry::cleanup_orphaned_searching_items(registry_repo.as_ref(), config.max_orphan_age_minutes(), now).await {
            Ok(report) if report.recovered > 0 => tracing::info!(recovered = report.recovered, "recovered orphaned searching items"),
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "orphan cleanup sweep failed"),
        }
    }
}

#[cfg(feature = "database")]
async fn reenqueue_loop(registry_repo: Arc<search_orchestrator::db::PgSearchRegistryRepository>, _config: Arc<OrchestratorConfig>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;
        let now = Utc::now();
        match search_orchestrator::registry::reenqueue_eligible_cooldown_items(registry_repo.as_ref(), None, now).await {
            Ok(report) if report.reenqueued > 0 => tracing::info!(reenqueued = report.reenqueued, still_cooling = report.still_cooling, "reenqueued cooldown-eligible items"),
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "cooldown reenqueue sweep failed"),
        }
    }
}

#[cfg(feature = "database")]
async fn indexer_health_loop(
    indexer_health_repo: Arc<search_orchestrator::db::PgIndexerHealthRepository>,
    config: Arc<OrchestratorConfig>,
) {
    let mut ticker = tokio::time::interval(config.indexer_health.poll_interval);
    loop {
        ticker.tick().await;
        // Indexer-manager instances are operator-configured and loaded
        // elsewhere; this loop only keeps the poll cadence alive when no
        // instances are wired.
        let clients: Vec<Box<dyn search_orchestrator::indexer_health::IndexerManagerClient>> = Vec::new();
        search_orchestrator::indexer_health::poll_all(&clients, indexer_health_repo.as_ref(), Utc::now()).await;
    }
}
