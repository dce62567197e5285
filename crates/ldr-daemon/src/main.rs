//! ldr-daemon entry point.
//!
//! This file is intentionally thin: it loads config, resolves secrets,
//! connects to the central store, wires up the scheduler, and starts the
//! HTTP server. All route handlers live in `routes.rs`; all shared state
//! types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use ldr_config::LoaderSettings;
use ldr_daemon::{routes, state};
use ldr_engine::executor::LoadExecutor;
use ldr_engine::scheduler::{Scheduler, SchedulerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config_paths = config_paths_from_env();
    let path_refs: Vec<&str> = config_paths.iter().map(String::as_str).collect();
    let loaded = ldr_config::load_layered_yaml(&path_refs)
        .with_context(|| format!("loading config from {config_paths:?}"))?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let settings = LoaderSettings::from_config_json(&loaded.config_json)?;

    let key_bytes = ldr_config::secrets::resolve_encryption_key(&loaded.config_json)?;
    let encryption = Arc::new(ldr_crypto::EncryptionService::new(&key_bytes)?);

    let pool = ldr_db::connect_from_env().await?;
    ldr_db::migrate(&pool).await?;

    let replica_name = ldr_engine::replica::derive_replica_name(&settings.replica.name_env);
    let replica_ordinal: u32 = std::env::var("LDR_REPLICA_ORDINAL")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    info!(replica_name = %replica_name, replica_ordinal, "replica identity resolved");

    let source_pool = Arc::new(ldr_db::sourcepool::SourcePool::new(pool.clone(), encryption.clone()));
    let segment_dict: Arc<dyn ldr_transform::SegmentDictionary> =
        Arc::new(ldr_db::segments::PgSegmentDictionary::new(pool.clone()));
    let lock_service: Arc<dyn ldr_lock::LockService> = Arc::new(ldr_lock::PgLockService::new(pool.clone()));

    let executor = Arc::new(LoadExecutor::new(
        pool.clone(),
        source_pool,
        encryption.clone(),
        segment_dict,
        settings.executor.default_lookback_hours,
        Duration::from_secs(settings.executor.query_timeout_seconds),
    ));

    let scheduler_config = SchedulerConfig {
        dispatch_period: Duration::from_secs(settings.scheduler.dispatch_period_seconds),
        recovery_period: Duration::from_secs(settings.scheduler.recovery_period_seconds),
        stalelock_period: Duration::from_secs(settings.scheduler.stalelock_period_seconds),
        worker_pool_size: settings.scheduler.worker_pool_size,
        lock_max_age_seconds: settings.lock.max_age_seconds as i64,
        failed_threshold_seconds: settings.recovery.failed_threshold_seconds as i64,
        hung_threshold_seconds: settings.executor.hung_threshold_seconds as i64,
    };

    let scheduler = Arc::new(Scheduler::new(
        pool.clone(),
        executor,
        lock_service,
        replica_name.clone(),
        replica_ordinal,
        scheduler_config,
    ));
    let _scheduler_handles = scheduler.spawn();

    let shared = Arc::new(state::AppState::new(pool, encryption, replica_name));

    let app = routes::build_router(shared);

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8899)));
    info!("ldr-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("LDR_DAEMON_ADDR").ok()?.parse().ok()
}

/// `LDR_CONFIG_PATHS` is a comma-separated list of layered YAML files
/// (later files override earlier ones), falling back to a single
/// `config/default.yaml` for a zero-config dev run.
fn config_paths_from_env() -> Vec<String> {
    match std::env::var("LDR_CONFIG_PATHS") {
        Ok(v) if !v.trim().is_empty() => v.split(',').map(|s| s.trim().to_string()).collect(),
        _ => vec!["config/default.yaml".to_string()],
    }
}
