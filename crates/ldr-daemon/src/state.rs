//! Shared runtime state for ldr-daemon.
//!
//! All types here are `Clone`-able (via `Arc`). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::Arc;

use ldr_crypto::EncryptionService;
use sqlx::PgPool;

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, serde::Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// Used to encrypt `loaderSql` received in plaintext on `PATCH
    /// /v1/loaders/:code` before it is persisted (spec §6.1: encrypted
    /// columns are stored as base64 text).
    pub encryption: Arc<EncryptionService>,
    pub build: BuildInfo,
    pub replica_name: String,
    pub started_at: std::time::Instant,
}

impl AppState {
    pub fn new(pool: PgPool, encryption: Arc<EncryptionService>, replica_name: String) -> Self {
        Self {
            pool,
            encryption,
            build: BuildInfo {
                service: "ldr-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            replica_name,
            started_at: std::time::Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
