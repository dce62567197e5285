use predicates::prelude::*;

/// DB-backed: skipped if LDR_DATABASE_URL is not set (local + CI friendly).
#[tokio::test]
async fn cli_pause_then_resume_round_trips_status() -> anyhow::Result<()> {
    let url = match std::env::var(ldr_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: LDR_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(2).connect(&url).await?;
    ldr_db::migrate(&pool).await?;

    let loader_code = format!("CLI_TEST_{}", std::process::id());
    seed_loader(&pool, &loader_code).await?;

    assert_cmd::Command::cargo_bin("ldr-cli")?
        .env(ldr_db::ENV_DB_URL, &url)
        .args(["loader", "pause", &loader_code])
        .assert()
        .success()
        .stdout(predicate::str::contains("load_status=PAUSED"));

    assert_cmd::Command::cargo_bin("ldr-cli")?
        .env(ldr_db::ENV_DB_URL, &url)
        .args(["loader", "resume", &loader_code])
        .assert()
        .success()
        .stdout(predicate::str::contains("load_status=IDLE"));

    Ok(())
}

async fn seed_loader(pool: &sqlx::PgPool, loader_code: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        insert into loader.source_database (db_code, db_type, ip, port, db_name, user_name, pass_word)
        values ($1, 'POSTGRES', '127.0.0.1', 5432, 'src', 'u', 'p')
        on conflict (db_code) do nothing
        "#,
    )
    .bind("CLI_TEST_DB")
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        insert into loader.loader
            (loader_code, loader_sql, source_database_code, enabled, approval_status,
             min_interval_seconds, max_interval_seconds, max_query_period_seconds)
        values ($1, 'select 1', 'CLI_TEST_DB', true, 'APPROVED', 10, 3600, 3600)
        on conflict (loader_code) do nothing
        "#,
    )
    .bind(loader_code)
    .execute(pool)
    .await?;

    Ok(())
}
