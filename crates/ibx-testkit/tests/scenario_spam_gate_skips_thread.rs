// Spam gate: a thread the classifier flags as promotional is stamped with
// the verdict and never reaches the extraction queue.
//
// DB-backed test, skipped if IBX_DATABASE_URL is not set. Wipes the mail and
// extraction tables so candidate discovery is deterministic.

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use ibx_extraction::ExtractionEnqueuer;
use ibx_llm::LlmClient;
use ibx_runtime::shutdown_pair;
use ibx_schemas::QUEUE_EXTRACTION;
use ibx_testkit::MockLlm;

#[tokio::test]
async fn promotional_thread_is_stamped_and_skipped() -> Result<()> {
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
    for table in [
        "extraction_entities",
        "extractions",
        "extraction_queue",
        "messages",
        "threads",
    ] {
        sqlx::query(&format!("delete from {table}")).execute(&pool).await?;
    }

    let inbox_id = Uuid::new_v4();
    ibx_db::insert_inbox(
        &pool,
        &ibx_db::NewInbox {
            inbox_id,
            tenant_id: Uuid::new_v4(),
            config_id: Uuid::new_v4(),
            grant_id: "grant-spam".to_string(),
            email_address: None,
        },
    )
    .await?;

    let thread_id = ibx_db::upsert_thread(
        &pool,
        &ibx_db::NewThread {
            remote_thread_id: format!("spam-thr-{inbox_id}"),
            inbox_id: Some(inbox_id),
            subject: Some("MEGA SALE — 80% off everything".to_string()),
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
            remote_message_id: format!("spam-msg-{inbox_id}"),
            remote_thread_id: format!("spam-thr-{inbox_id}"),
            from_addr: serde_json::json!({ "email": "deals@shop.example" }),
            to_addrs: serde_json::json!([]),
            snippet: Some("Unsubscribe at any time".to_string()),
            body: Some("MEGA SALE! Click now. Unsubscribe at any time.".to_string()),
            sent_at: None,
        },
    )
    .await?;

    let llm: Arc<dyn LlmClient> = Arc::new(MockLlm::new().with_spam_verdict(serde_json::json!({
        "is_spam": false,
        "is_promotional": true,
        "confidence": 0.97,
        "reasoning": "bulk promotional blast with unsubscribe footer",
    })));

    let settings = ibx_config::SyncSettings::default();
    let enqueuer = ExtractionEnqueuer::new(pool.clone(), Arc::clone(&llm), settings);
    let (_ctl, shutdown) = shutdown_pair();

    let enqueued = enqueuer.poll_once(&shutdown).await?;
    assert_eq!(enqueued, 0, "flagged thread must not be enqueued");
    assert_eq!(ibx_db::queue_length(&pool, QUEUE_EXTRACTION).await?, 0);

    let (is_spam, is_promotional, reasoning): (bool, bool, Option<String>) = sqlx::query_as(
        "select is_spam, is_promotional, spam_reasoning from threads where thread_id = $1",
    )
    .bind(thread_id)
    .fetch_one(&pool)
    .await?;
    assert!(!is_spam);
    assert!(is_promotional);
    assert!(reasoning.unwrap_or_default().contains("promotional"));

    let (tracking,): (i64,) =
        sqlx::query_as("select count(*)::bigint from extraction_queue where thread_id = $1")
            .bind(thread_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(tracking, 0, "no tracking row for a gated thread");

    // The flagged thread is excluded from later discovery passes entirely.
    let enqueued_after = enqueuer.poll_once(&shutdown).await?;
    assert_eq!(enqueued_after, 0);

    Ok(())
}
