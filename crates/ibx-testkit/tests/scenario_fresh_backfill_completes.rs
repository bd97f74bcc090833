// Fresh backfill end to end: one orchestration job over two remote threads
// (three messages total) runs through work rows, the thread-sync queue, the
// workers, and the monitor, ending in a completed configuration.
//
// DB-backed test, skipped if IBX_DATABASE_URL is not set.
// Uses the mock provider (no real HTTP / network required).

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use ibx_provider::EmailProvider;
use ibx_runtime::shutdown_pair;
use ibx_schemas::{BackfillJob, ConfigStatus, WorkStatus, QUEUE_BACKFILL, QUEUE_THREAD_SYNC};
use ibx_sync::{BackfillOrchestrator, CompletionMonitor, ThreadSyncWorker};
use ibx_testkit::MockProvider;

#[tokio::test]
async fn fresh_backfill_two_threads_three_messages_completes() -> Result<()> {
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

    ibx_db::purge(&pool, QUEUE_BACKFILL).await?;
    ibx_db::purge(&pool, QUEUE_THREAD_SYNC).await?;

    let config_id = Uuid::new_v4();
    let inbox_id = Uuid::new_v4();
    // Unique remote ids so reruns against the same database stay disjoint.
    let t1 = format!("bf-t1-{config_id}");
    let t2 = format!("bf-t2-{config_id}");

    ibx_db::insert_inbox(
        &pool,
        &ibx_db::NewInbox {
            inbox_id,
            tenant_id: Uuid::new_v4(),
            config_id,
            grant_id: "grant-backfill".to_string(),
            email_address: Some("support@example.com".to_string()),
        },
    )
    .await?;

    // 2024-01-01T12:00:00Z — inside the requested window.
    let ts = 1_704_110_400;
    let provider: Arc<dyn EmailProvider> = Arc::new(
        MockProvider::new()
            .with_thread(
                MockProvider::thread(&t1, "Refund for order 1431", ts),
                vec![
                    MockProvider::message(&format!("{t1}-m1"), &t1, "Please refund order 1431.", ts),
                    MockProvider::message(&format!("{t1}-m2"), &t1, "Bumping this thread.", ts + 60),
                ],
            )
            .with_thread(
                MockProvider::thread(&t2, "Invoice question", ts),
                vec![MockProvider::message(
                    &format!("{t2}-m3"),
                    &t2,
                    "Is the invoice due?",
                    ts,
                )],
            ),
    );

    let settings = ibx_config::SyncSettings::default();
    let (_ctl, shutdown) = shutdown_pair();

    // 1. Enqueue the orchestration job and run the orchestrator once.
    let job = BackfillJob {
        inbox_id,
        config_id,
        grant_id: "grant-backfill".to_string(),
        start_date: "2024-01-01T00:00:00Z".parse()?,
        end_date: "2024-01-02T00:00:00Z".parse()?,
    };
    ibx_db::enqueue(&pool, QUEUE_BACKFILL, &job).await?;

    let orchestrator = BackfillOrchestrator::new(pool.clone(), Arc::clone(&provider), settings.clone());
    let processed = orchestrator.poll_once(&shutdown).await?;
    assert_eq!(processed, 1, "orchestrator should consume the job");

    // Work rows exist, are queued, and were published.
    for tid in [&t1, &t2] {
        let row = ibx_db::fetch_work_row(&pool, config_id, tid)
            .await?
            .expect("work row exists");
        assert_eq!(row.status, WorkStatus::Queued);
        assert_eq!(row.grant_id, "grant-backfill");
        assert!(row.pgmq_queued_at.is_some(), "row published to queue");
    }
    let config = ibx_db::fetch_configuration(&pool, config_id).await?.unwrap();
    assert_eq!(config.status, ConfigStatus::ThreadSync);

    // 2. Thread-sync workers drain the queue.
    let worker = ThreadSyncWorker::new(pool.clone(), Arc::clone(&provider), settings.clone(), 0);
    for _ in 0..20 {
        if ibx_db::queue_length(&pool, QUEUE_THREAD_SYNC).await? == 0 {
            break;
        }
        worker.poll_once(&shutdown).await?;
    }
    assert_eq!(
        ibx_db::queue_length(&pool, QUEUE_THREAD_SYNC).await?,
        0,
        "no rows left on thread_sync_jobs"
    );

    // 3. Monitor derives stats and closes the configuration.
    let monitor = CompletionMonitor::new(pool.clone(), settings);
    monitor.derive_and_close().await?;

    let config = ibx_db::fetch_configuration(&pool, config_id).await?.unwrap();
    assert_eq!(config.status, ConfigStatus::Completed);
    assert!(config.sync_completed_at.is_some());
    assert!(config.checkpoint.is_none(), "checkpoint cleared on completion");

    let stats = ibx_db::fetch_stats(&pool, config_id).await?.unwrap();
    assert_eq!(stats.threads_total, 0, "total stays 0 when unknown");
    assert_eq!(stats.threads_queued, 2);
    assert_eq!(stats.threads_completed, 2);
    assert_eq!(stats.threads_failed, 0);
    assert_eq!(stats.threads_processing, 0);
    assert_eq!(stats.messages_synced, 3);

    // One thread row and one message row per remote id.
    for tid in [&t1, &t2] {
        let (n,): (i64,) =
            sqlx::query_as("select count(*)::bigint from threads where remote_thread_id = $1")
                .bind(tid)
                .fetch_one(&pool)
                .await?;
        assert_eq!(n, 1, "exactly one thread row for {tid}");
    }
    let (messages,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from messages where remote_thread_id in ($1, $2)",
    )
    .bind(&t1)
    .bind(&t2)
    .fetch_one(&pool)
    .await?;
    assert_eq!(messages, 3);

    Ok(())
}
