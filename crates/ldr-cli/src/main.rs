use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use ldr_schemas::HistoryStatus;

#[derive(Parser)]
#[command(name = "ldr")]
#[command(about = "Signal loader operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> deployment...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Loader admin commands (spec §6.4)
    Loader {
        #[command(subcommand)]
        cmd: LoaderCmd,
    },

    /// Query load history (spec §6.4 queryHistory)
    History {
        #[arg(long)]
        loader_code: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum LoaderCmd {
    /// Print a loader's current row (loaderSql omitted — it's sensitive).
    Show {
        loader_code: String,
    },
    Pause {
        loader_code: String,
    },
    Resume {
        loader_code: String,
    },
    /// Move (or clear, with no value) a loader's watermark.
    AdjustTimestamp {
        loader_code: String,
        /// RFC3339 timestamp; omit to clear the watermark.
        timestamp: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = ldr_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = ldr_db::status(&pool).await?;
                    println!("db_ok={} has_loader_table={}", s.ok, s.has_loader_table);
                }
                DbCmd::Migrate => {
                    ldr_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = ldr_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Loader { cmd } => {
            let pool = ldr_db::connect_from_env().await?;
            match cmd {
                LoaderCmd::Show { loader_code } => {
                    let loader = ldr_db::entities::fetch_by_code(&pool, &loader_code)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("loader not found: {loader_code}"))?;
                    println!("loader_code={}", loader.loader_code);
                    println!("source_database_code={}", loader.source_database_code);
                    println!("load_status={}", loader.load_status.as_str());
                    println!("enabled={}", loader.enabled);
                    println!("approval_status={}", loader.approval_status.as_str());
                    println!("min_interval_seconds={}", loader.min_interval_seconds);
                    println!("max_interval_seconds={}", loader.max_interval_seconds);
                    println!("last_load_timestamp={:?}", loader.last_load_timestamp);
                    println!("purge_strategy={}", loader.purge_strategy.as_str());
                    println!("consecutive_zero_record_runs={}", loader.consecutive_zero_record_runs);
                }
                LoaderCmd::Pause { loader_code } => {
                    ldr_db::entities::pause(&pool, &loader_code).await?;
                    println!("loader_code={loader_code} load_status=PAUSED");
                }
                LoaderCmd::Resume { loader_code } => {
                    ldr_db::entities::resume(&pool, &loader_code).await?;
                    println!("loader_code={loader_code} load_status=IDLE");
                }
                LoaderCmd::AdjustTimestamp { loader_code, timestamp } => {
                    ldr_db::entities::adjust_timestamp(&pool, &loader_code, timestamp).await?;
                    println!("loader_code={loader_code} last_load_timestamp={timestamp:?}");
                }
            }
        }

        Commands::History { loader_code, status, limit } => {
            let pool = ldr_db::connect_from_env().await?;
            let status = status
                .map(|s| HistoryStatus::parse(&s).ok_or_else(|| anyhow::anyhow!("invalid status: {s}")))
                .transpose()?;

            let query = ldr_db::history::HistoryQuery {
                loader_code,
                status,
                from_time: None,
                to_time: None,
                limit: limit.unwrap_or(50),
            };
            let rows = ldr_db::history::query_history(&pool, &query).await?;
            for row in rows {
                println!(
                    "id={} loader_code={} status={} start_time={} records_loaded={:?}",
                    row.id,
                    row.loader_code,
                    row.status.as_str(),
                    row.start_time,
                    row.records_loaded,
                );
            }
        }
    }

    Ok(())
}
