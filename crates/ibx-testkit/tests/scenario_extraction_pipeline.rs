// Extraction pipeline end to end: the enqueuer discovers a synced thread,
// passes the spam gate, publishes a job; the worker extracts with the mock
// LLM and persists the versioned record, entities, and message marks.
//
// DB-backed test, skipped if IBX_DATABASE_URL is not set. Wipes the mail and
// extraction tables so candidate discovery is deterministic.

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use ibx_extraction::{ExtractionEnqueuer, ExtractionWorker};
use ibx_llm::LlmClient;
use ibx_runtime::shutdown_pair;
use ibx_schemas::QUEUE_EXTRACTION;
use ibx_testkit::MockLlm;

async fn wipe_mail_tables(pool: &sqlx::PgPool) -> Result<()> {
    for table in [
        "extraction_entities",
        "extractions",
        "extraction_queue",
        "messages",
        "threads",
    ] {
        sqlx::query(&format!("delete from {table}")).execute(pool).await?;
    }
    Ok(())
}

#[tokio::test]
async fn enqueuer_and_worker_extract_a_synced_thread() -> Result<()> {
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
    ibx_db::purge(&pool, QUEUE_EXTRACTION).await?;
    wipe_mail_tables(&pool).await?;

    let inbox_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();
    ibx_db::insert_inbox(
        &pool,
        &ibx_db::NewInbox {
            inbox_id,
            tenant_id,
            config_id: Uuid::new_v4(),
            grant_id: "grant-extract".to_string(),
            email_address: None,
        },
    )
    .await?;

    let thread_id = ibx_db::upsert_thread(
        &pool,
        &ibx_db::NewThread {
            remote_thread_id: format!("ext-thr-{inbox_id}"),
            inbox_id: Some(inbox_id),
            subject: Some("Order 1431 refund".to_string()),
            participants: serde_json::json!([]),
            latest_message_at: None,
            unread: false,
            starred: false,
        },
    )
    .await?;
    ibx_db::insert_message_deduped(
        &pool,
        thread_id,
        &ibx_db::NewMessage {
            remote_message_id: format!("ext-msg-{inbox_id}"),
            remote_thread_id: format!("ext-thr-{inbox_id}"),
            from_addr: serde_json::json!({ "email": "sender@example.com" }),
            to_addrs: serde_json::json!([]),
            snippet: Some("Please refund order 1431".to_string()),
            body: Some("Please refund order 1431, it arrived damaged.".to_string()),
            sent_at: Some("2024-01-01T12:00:00Z".parse()?),
        },
    )
    .await?;

    let llm: Arc<dyn LlmClient> = Arc::new(MockLlm::new());
    let settings = ibx_config::SyncSettings::default();
    let (_ctl, shutdown) = shutdown_pair();

    // 1. Discovery + enqueue.
    let enqueuer = ExtractionEnqueuer::new(pool.clone(), Arc::clone(&llm), settings.clone());
    let enqueued = enqueuer.poll_once(&shutdown).await?;
    assert_eq!(enqueued, 1);
    assert_eq!(ibx_db::queue_length(&pool, QUEUE_EXTRACTION).await?, 1);
    assert!(ibx_db::tracking_active(&pool, thread_id).await?);

    // A second discovery pass must not enqueue the thread again.
    let enqueued_again = enqueuer.poll_once(&shutdown).await?;
    assert_eq!(enqueued_again, 0);
    assert_eq!(ibx_db::queue_length(&pool, QUEUE_EXTRACTION).await?, 1);

    // 2. Extraction.
    let worker = ExtractionWorker::new(pool.clone(), Arc::clone(&llm), settings.clone(), 0);
    worker.poll_once(&shutdown).await?;

    assert!(ibx_db::has_extraction(&pool, thread_id, settings.extraction_version).await?);
    assert_eq!(ibx_db::queue_length(&pool, QUEUE_EXTRACTION).await?, 0);

    let (summary, model): (String, String) = sqlx::query_as(
        "select summary, model from extractions \
         where thread_id = $1 and extraction_version = $2",
    )
    .bind(thread_id)
    .bind(settings.extraction_version)
    .fetch_one(&pool)
    .await?;
    assert!(!summary.is_empty());
    assert_eq!(model, settings.llm_model);

    let (entities,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from extraction_entities e \
         join extractions x on x.extraction_id = e.extraction_id \
         where x.thread_id = $1",
    )
    .bind(thread_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(entities, 1);

    let (pending,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from messages \
         where thread_id = $1 and extraction_status <> 'completed'",
    )
    .bind(thread_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(pending, 0, "every message marked extracted");

    let (tracking_status,): (String,) =
        sqlx::query_as("select status from extraction_queue where thread_id = $1")
            .bind(thread_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(tracking_status, "completed");

    // 3. With the record persisted, the thread is no longer a candidate.
    let enqueued_after = enqueuer.poll_once(&shutdown).await?;
    assert_eq!(enqueued_after, 0);

    Ok(())
}
