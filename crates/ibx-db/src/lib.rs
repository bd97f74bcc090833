// crates/ibx-db/src/lib.rs
use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const ENV_DB_URL: &str = "IBX_DATABASE_URL";

pub mod audit;
pub mod extraction;
pub mod mail;
pub mod queue;
pub mod stats;
pub mod sync;

pub use audit::{mark_notification_error, mark_notification_processed, record_notification};
pub use extraction::{
    has_extraction, insert_extraction, insert_extraction_entities, list_extraction_candidates,
    tracking_active, tracking_enqueue, tracking_mark_completed, tracking_mark_failed,
    tracking_mark_processing, tracking_mark_retrying, CandidateThread, NewExtraction,
};
pub use mail::{
    fetch_inbox, fetch_thread_messages, insert_inbox, insert_message_deduped,
    mark_inbox_auth_expired, mark_thread_messages_extracted, mark_thread_spam, message_exists,
    resolve_grant, thread_local_id, upsert_thread, InboxRow, NewInbox, NewMessage, NewThread,
    StoredMessage,
};
pub use queue::{delete_message, enqueue, purge, queue_length, read_batch, QueueMessage};
pub use stats::{
    add_threads_queued, fetch_stats, init_stats, list_active_config_ids,
    list_premature_completions, mark_thread_completed, mark_thread_failed,
    mark_thread_processing, stamp_stats_completed, tally_work_rows, write_derived_stats,
    SyncStatsRow, WorkRowTally,
};
pub use sync::{
    begin_backfill, claim_work_row, complete_configuration, complete_work_row,
    ensure_configuration, fail_work_row, fetch_configuration, fetch_work_row,
    list_queued_for_config, list_unpublished_work_rows, mark_config_failed,
    mark_work_row_published, revert_premature_completion, save_checkpoint,
    transition_to_thread_sync, upsert_work_row, ConfigurationRow, WorkRow,
};

/// Connect to Postgres using IBX_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper used by integration tests:
/// - Connect using IBX_DATABASE_URL
/// - Ensure migrations are applied
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
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
            where table_schema='public' and table_name='sync_configurations'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_sync_schema: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_sync_schema: bool,
}

/// Count configurations that are mid-sync (backfill or thread_sync).
/// Used by CLI guardrails to prevent migrating a database with live syncs.
pub async fn count_active_syncs(pool: &PgPool) -> Result<i64> {
    // If schema doesn't exist yet, treat as 0 (safe) rather than failing.
    let st = status(pool).await?;
    if !st.has_sync_schema {
        return Ok(0);
    }

    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select count(*)::bigint
        from sync_configurations
        where status in ('backfill','thread_sync')
        "#,
    )
    .fetch_one(pool)
    .await
    .context("count_active_syncs failed")?;

    Ok(n)
}

/// Convenience boolean.
pub async fn has_active_syncs(pool: &PgPool) -> Result<bool> {
    Ok(count_active_syncs(pool).await? > 0)
}
