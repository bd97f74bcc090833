// Queue substrate contract: enqueue → read (invisible for vt) → delete, with
// read_ct incrementing on redelivery after the visibility timeout.
//
// DB-backed test, skipped if IBX_DATABASE_URL is not set. Uses a dedicated
// probe queue so the role queues stay untouched.

use anyhow::Result;
use serde::{Deserialize, Serialize};

// One probe queue per test: tests in this binary run in parallel.
const PROBE_QUEUE: &str = "ibx_probe_vt";
const DECODE_QUEUE: &str = "ibx_probe_decode";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Probe {
    label: String,
    n: i64,
}

#[tokio::test]
async fn visibility_timeout_and_read_ct_behave() -> Result<()> {
    let url = match std::env::var(ibx_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: IBX_DATABASE_URL not set");
            return Ok(());
        }
    };
    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
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

    sqlx::query("select pgmq.create($1)")
        .bind(PROBE_QUEUE)
        .execute(&pool)
        .await?;
    ibx_db::purge(&pool, PROBE_QUEUE).await?;

    let payload = Probe {
        label: "probe".to_string(),
        n: 7,
    };
    let msg_id = ibx_db::enqueue(&pool, PROBE_QUEUE, &payload).await?;
    assert!(msg_id > 0);
    assert_eq!(ibx_db::queue_length(&pool, PROBE_QUEUE).await?, 1);

    // First read hides the message for 1s and reports read_ct = 1.
    let batch = ibx_db::read_batch(&pool, PROBE_QUEUE, 1, 10).await?;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].msg_id, msg_id);
    assert_eq!(batch[0].read_ct, 1);
    assert_eq!(batch[0].decode::<Probe>()?, payload);

    // While invisible, a second read sees nothing.
    let hidden = ibx_db::read_batch(&pool, PROBE_QUEUE, 1, 10).await?;
    assert!(hidden.is_empty());

    // After the timeout it reappears with read_ct incremented.
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    let redelivered = ibx_db::read_batch(&pool, PROBE_QUEUE, 1, 10).await?;
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].read_ct, 2);

    // Exhaustion is strictly-greater-than max_retries.
    assert!(!redelivered[0].exhausted(2));
    assert!(redelivered[0].exhausted(1));

    // Delete is terminal and idempotent.
    assert!(ibx_db::delete_message(&pool, PROBE_QUEUE, msg_id).await?);
    assert!(!ibx_db::delete_message(&pool, PROBE_QUEUE, msg_id).await?);
    assert_eq!(ibx_db::queue_length(&pool, PROBE_QUEUE).await?, 0);

    Ok(())
}

#[tokio::test]
async fn undecodable_payload_surfaces_as_decode_error() -> Result<()> {
    let url = match std::env::var(ibx_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: IBX_DATABASE_URL not set");
            return Ok(());
        }
    };
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;
    ibx_db::migrate(&pool).await?;

    sqlx::query("select pgmq.create($1)")
        .bind(DECODE_QUEUE)
        .execute(&pool)
        .await?;
    ibx_db::purge(&pool, DECODE_QUEUE).await?;

    let msg_id = ibx_db::enqueue(&pool, DECODE_QUEUE, &serde_json::json!({ "label": 42 })).await?;
    let batch = ibx_db::read_batch(&pool, DECODE_QUEUE, 1, 10).await?;
    assert_eq!(batch.len(), 1);
    assert!(batch[0].decode::<Probe>().is_err());

    ibx_db::delete_message(&pool, DECODE_QUEUE, msg_id).await?;
    Ok(())
}
