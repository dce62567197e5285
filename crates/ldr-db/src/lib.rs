//! Persistence layer for the signal-loader execution engine.
//!
//! Every table in the `loader` schema (spec §6.1) is owned by exactly one
//! module here: [`entities`] for `loader`/`source_database`, [`history`] for
//! `load_history`, [`lock`] for `loader_execution_lock`, [`segments`] for
//! `segment_dictionary`, [`signals`] for `signals_history`. [`sourcepool`]
//! is the only module that talks to a *source* database rather than the
//! central Postgres store.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub mod entities;
pub mod history;
pub mod lock;
pub mod segments;
pub mod signals;
pub mod sourcedb;
pub mod sourcepool;

pub use entities::Loader;
pub use history::LoadHistoryRow;
pub use sourcedb::SourceDatabase;

pub const ENV_DB_URL: &str = "LDR_DATABASE_URL";

/// Connect to the central Postgres store using `LDR_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations against the central store.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Test helper: connect via env and ensure migrations are applied.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_loader_table: bool,
}

/// Simple status query (connectivity + schema presence), used by `ldr-cli db status`.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'loader' and table_name = 'loader'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_loader_table: exists,
    })
}

/// Detect a Postgres unique constraint violation by name. Shared by
/// [`signals`] (signal duplicate key) and [`segments`] (segment tuple key).
pub(crate) fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}
