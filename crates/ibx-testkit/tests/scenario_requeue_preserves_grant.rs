// Grant-preserving re-queue: re-queueing a work row is a status reset on the
// same row, a non-empty incoming grant replaces the stored one, and an empty
// incoming grant never nulls out the credential.
//
// DB-backed test, skipped if IBX_DATABASE_URL is not set.

use anyhow::Result;
use uuid::Uuid;

use ibx_schemas::WorkStatus;

#[tokio::test]
async fn requeue_resets_status_and_preserves_grant() -> Result<()> {
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

    let config_id = Uuid::new_v4();
    let inbox_id = Uuid::new_v4();
    let thread = format!("grant-thr-{config_id}");

    // Initial insert with G1.
    ibx_db::upsert_work_row(&pool, config_id, &thread, inbox_id, "G1").await?;
    let row = ibx_db::fetch_work_row(&pool, config_id, &thread).await?.unwrap();
    assert_eq!(row.status, WorkStatus::Queued);
    assert_eq!(row.grant_id, "G1");

    // Row runs to completion.
    ibx_db::claim_work_row(&pool, config_id, &thread).await?;
    ibx_db::complete_work_row(&pool, config_id, &thread, 5).await?;
    let row = ibx_db::fetch_work_row(&pool, config_id, &thread).await?.unwrap();
    assert_eq!(row.status, WorkStatus::Completed);
    assert!(row.processed_at.is_some());

    // Re-queue with G2: same row, status reset, credential replaced.
    ibx_db::upsert_work_row(&pool, config_id, &thread, inbox_id, "G2").await?;
    let row = ibx_db::fetch_work_row(&pool, config_id, &thread).await?.unwrap();
    assert_eq!(row.status, WorkStatus::Queued);
    assert_eq!(row.grant_id, "G2");
    assert!(row.started_at.is_none());
    assert!(row.processed_at.is_none());
    assert!(row.pgmq_queued_at.is_none());
    assert_eq!(row.messages_synced, 0);

    // Re-queue with an empty grant: the stored credential survives.
    ibx_db::upsert_work_row(&pool, config_id, &thread, inbox_id, "").await?;
    let row = ibx_db::fetch_work_row(&pool, config_id, &thread).await?.unwrap();
    assert_eq!(row.grant_id, "G2", "empty payload grant must not null the credential");

    // Still exactly one row for the key.
    let (n,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from sync_thread_jobs \
         where config_id = $1 and remote_thread_id = $2",
    )
    .bind(config_id)
    .bind(&thread)
    .fetch_one(&pool)
    .await?;
    assert_eq!(n, 1);

    // Terminalize so the row cannot leak into global sweep scans.
    ibx_db::claim_work_row(&pool, config_id, &thread).await?;
    ibx_db::complete_work_row(&pool, config_id, &thread, 0).await?;

    Ok(())
}
