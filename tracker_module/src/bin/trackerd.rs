//! Thread tracker daemon: one ingestion/reminder schedule per configured
//! account, plus the health monitor, running until Ctrl-C.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use tracker_module::composer::ComposerStack;
use tracker_module::config::TrackerConfig;
use tracker_module::gateway::KeywordClassifier;
use tracker_module::monitor::HealthMonitor;
use tracker_module::store::SqliteEngineStore;
use tracker_module::transport::HttpTransport;
use tracker_module::{EngineContext, Scheduler};

fn resolve_config_path() -> String {
    env::args()
        .nth(1)
        .or_else(|| env::var("TRACKER_CONFIG").ok())
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "tracker.toml".to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();
    dotenvy::dotenv().ok();

    let config_path = resolve_config_path();
    let config = TrackerConfig::load(&config_path)?;
    info!(
        "tracker config path={}, accounts={}",
        config_path,
        config.accounts.len()
    );

    let store = Arc::new(SqliteEngineStore::new(&config.database_path)?);
    let transport = Arc::new(HttpTransport::from_env()?);
    let ctx = Arc::new(EngineContext {
        store: store.clone(),
        transport: transport.clone(),
        classifier: Arc::new(KeywordClassifier),
        composer: Arc::new(ComposerStack::from_env()),
        policy: config.policy.clone(),
    });

    let scheduler = Scheduler::new(ctx);
    let started = scheduler.start_all(&config.accounts);
    info!("started {started} account schedule(s)");

    let monitor_stop = Arc::new(AtomicBool::new(false));
    let monitor_handle = {
        let stop = monitor_stop.clone();
        let mut monitor = HealthMonitor::new(
            store,
            transport,
            config.accounts.clone(),
            config.monitor.clone(),
            config.policy.clone(),
        );
        std::thread::spawn(move || monitor.run_loop(&stop))
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining workers");

    monitor_stop.store(true, Ordering::Relaxed);
    scheduler.stop_all();
    if monitor_handle.join().is_err() {
        tracing::warn!("health monitor thread panicked during shutdown");
    }
    info!("tracker stopped");
    Ok(())
}
