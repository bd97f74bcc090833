use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use ibx_schemas::{BackfillJob, QUEUE_BACKFILL};

#[derive(Parser)]
#[command(name = "ibx")]
#[command(about = "Inbox sync operations CLI", long_about = None)]
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
        /// Paths in merge order (base -> env -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Enqueue a historical backfill for one inbox configuration
    Backfill {
        #[arg(long)]
        inbox_id: Uuid,
        #[arg(long)]
        config_id: Uuid,
        #[arg(long)]
        grant_id: String,
        /// Inclusive window start, RFC 3339 (e.g. 2024-01-01T00:00:00Z)
        #[arg(long)]
        start: DateTime<Utc>,
        /// Inclusive window end, RFC 3339
        #[arg(long)]
        end: DateTime<Utc>,
    },

    /// Print configuration status and sync counters
    Status {
        #[arg(long)]
        config_id: Uuid,
    },

    /// Publish work rows that were inserted but never queued
    Sweep,
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply embedded migrations. Refuses while syncs are active unless --yes.
    Migrate {
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = ibx_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = ibx_db::status(&pool).await?;
                    println!("db_ok={} has_sync_schema={}", s.ok, s.has_sync_schema);
                }
                DbCmd::Migrate { yes } => {
                    let active = ibx_db::count_active_syncs(&pool).await?;
                    if active > 0 && !yes {
                        bail!(
                            "{active} configuration(s) are mid-sync; \
                             pass --yes to migrate anyway"
                        );
                    }
                    ibx_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = ibx_config::load_layered_yaml(&path_refs).await?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Backfill {
            inbox_id,
            config_id,
            grant_id,
            start,
            end,
        } => {
            if grant_id.is_empty() {
                bail!("--grant-id must not be empty");
            }
            if start > end {
                bail!("--start must not be after --end");
            }

            let pool = ibx_db::connect_from_env().await?;
            ibx_db::ensure_configuration(&pool, config_id).await?;

            let job = BackfillJob {
                inbox_id,
                config_id,
                grant_id,
                start_date: start,
                end_date: end,
            };
            let msg_id = ibx_db::enqueue(&pool, QUEUE_BACKFILL, &job).await?;
            println!("enqueued=true msg_id={msg_id} config_id={config_id}");
        }

        Commands::Status { config_id } => {
            let pool = ibx_db::connect_from_env().await?;
            match ibx_db::fetch_configuration(&pool, config_id).await? {
                Some(cfg) => {
                    println!("config_id={config_id}");
                    println!("status={}", cfg.status.as_str());
                    if let Some(cp) = &cfg.checkpoint {
                        println!("checkpoint={cp}");
                    }
                }
                None => {
                    bail!("unknown configuration {config_id}");
                }
            }

            if let Some(stats) = ibx_db::fetch_stats(&pool, config_id).await? {
                println!(
                    "threads_queued={} threads_processing={} threads_completed={} \
                     threads_failed={} messages_synced={}",
                    stats.threads_queued,
                    stats.threads_processing,
                    stats.threads_completed,
                    stats.threads_failed,
                    stats.messages_synced,
                );
            }
        }

        Commands::Sweep => {
            let pool = ibx_db::connect_from_env().await?;
            let settings = ibx_config::SyncSettings::default();
            let total = ibx_sync::sweep_unpublished(&pool, &settings).await?;
            println!("swept={total}");
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}
