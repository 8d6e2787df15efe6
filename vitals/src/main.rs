use std::sync::Arc;

use vitals::api::{ApiServer, ApiServerConfig, AppState};
use vitals::config::MonitorConfig;
use vitals::database;
use vitals::database::models::HostMetricsFactory;
use vitals::database::repositories::{MetricsStore, SqlxMetricsStore};
use vitals::sampler::{ResourceSampler, RestartDetector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging; the guard must outlive the server loop
    let _guard = vitals::logging::init_logging(&vitals::config::log_dir())?;

    // Configuration errors fail fast here, before anything is running
    let monitor_config = MonitorConfig::from_env()?;
    let api_config = ApiServerConfig::from_env_or_default();

    // Initialize database
    let database_url = vitals::config::database_url();
    let pool = database::init_pool(&database_url).await?;
    database::run_migrations(&pool).await?;

    let store: Arc<dyn MetricsStore> = Arc::new(SqlxMetricsStore::new(pool.clone()));
    let host = monitor_config.host.clone();

    let sampler = Arc::new(ResourceSampler::new(
        monitor_config.clone(),
        Arc::new(HostMetricsFactory::new(host.clone())),
        Arc::new(RestartDetector::new()),
        store.clone(),
    ));

    if monitor_config.enabled {
        sampler.start()?;
    } else {
        tracing::info!("Resource sampler disabled by configuration");
    }

    let state = AppState::new(store, pool, host);
    let server = ApiServer::with_state(api_config, state);

    // Ctrl-C stops the sampling schedule and drains the server; persistence
    // tasks already dispatched run to completion in the background.
    let cancel = server.cancel_token();
    let shutdown_sampler = sampler.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown_sampler.stop();
            cancel.cancel();
        }
    });

    tracing::info!("vitals initialized successfully");
    server.run().await?;

    Ok(())
}
