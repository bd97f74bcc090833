// Crash recovery: the orchestrator dies after inserting work rows but before
// publishing them. The startup sweep finds every row with a null
// pgmq_queued_at, publishes all of them, workers drain, and the
// configuration closes normally.
//
// DB-backed test, skipped if IBX_DATABASE_URL is not set.

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use ibx_provider::EmailProvider;
use ibx_runtime::shutdown_pair;
use ibx_schemas::{ConfigStatus, QUEUE_THREAD_SYNC};
use ibx_sync::{BackfillOrchestrator, CompletionMonitor, ThreadSyncWorker};
use ibx_testkit::MockProvider;

const ROWS: usize = 50;

#[tokio::test]
async fn sweep_publishes_orphaned_rows_and_sync_completes() -> Result<()> {
    let url = match std::env::var(ibx_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: IBX_DATABASE_URL not set");
            return Ok(());
        }
    };
    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
    {
        Ok(p) => p,
        Err(e) => {
            eprintln!("SKIP: cannot connect to DB: {e}");
            return Ok(());
        }
    };
    ibx_db::migrate(&pool).await?;
    ibx_db::purge(&pool, QUEUE_THREAD_SYNC).await?;

    let config_id = Uuid::new_v4();
    let inbox_id = Uuid::new_v4();
    ibx_db::insert_inbox(
        &pool,
        &ibx_db::NewInbox {
            inbox_id,
            tenant_id: Uuid::new_v4(),
            config_id,
            grant_id: "grant-sweep".to_string(),
            email_address: None,
        },
    )
    .await?;

    // Simulate the crash site: rows inserted, queue publication never ran,
    // configuration already moved past backfill.
    ibx_db::ensure_configuration(&pool, config_id).await?;
    ibx_db::begin_backfill(&pool, config_id).await?;
    ibx_db::init_stats(&pool, config_id).await?;
    for i in 0..ROWS {
        ibx_db::upsert_work_row(
            &pool,
            config_id,
            &format!("sweep-thr-{config_id}-{i}"),
            inbox_id,
            "grant-sweep",
        )
        .await?;
    }
    ibx_db::transition_to_thread_sync(&pool, config_id).await?;

    let (unpublished,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from sync_thread_jobs \
         where config_id = $1 and pgmq_queued_at is null",
    )
    .bind(config_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(unpublished, ROWS as i64);

    // None of the swept threads exist on the provider anymore; each closes
    // as an empty thread.
    let provider: Arc<dyn EmailProvider> = Arc::new(MockProvider::new());
    let settings = ibx_config::SyncSettings::default();
    let orchestrator = BackfillOrchestrator::new(pool.clone(), Arc::clone(&provider), settings.clone());

    let swept = orchestrator.sweep_unpublished().await?;
    assert!(swept >= ROWS, "sweep published at least our rows, got {swept}");

    let (still_unpublished,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from sync_thread_jobs \
         where config_id = $1 and pgmq_queued_at is null",
    )
    .bind(config_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(still_unpublished, 0, "every row stamped pgmq_queued_at");

    // Workers drain the queue; the monitor closes the configuration.
    let (_ctl, shutdown) = shutdown_pair();
    let worker = ThreadSyncWorker::new(pool.clone(), Arc::clone(&provider), settings.clone(), 0);
    for _ in 0..(ROWS * 2) {
        if ibx_db::queue_length(&pool, QUEUE_THREAD_SYNC).await? == 0 {
            break;
        }
        worker.poll_once(&shutdown).await?;
    }
    assert_eq!(ibx_db::queue_length(&pool, QUEUE_THREAD_SYNC).await?, 0);

    let monitor = CompletionMonitor::new(pool.clone(), settings);
    monitor.derive_and_close().await?;

    let config = ibx_db::fetch_configuration(&pool, config_id).await?.unwrap();
    assert_eq!(config.status, ConfigStatus::Completed);

    let stats = ibx_db::fetch_stats(&pool, config_id).await?.unwrap();
    assert_eq!(stats.threads_completed, ROWS as i32);
    assert_eq!(stats.threads_failed, 0);
    // Vanished threads close empty.
    assert_eq!(stats.messages_synced, 0);

    Ok(())
}
