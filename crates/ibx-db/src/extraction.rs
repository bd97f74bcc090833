//! Extraction tracking rows and persisted extraction records.
//!
//! The durable queue is authoritative for extraction work; the tracking table
//! exists for visibility and enqueue idempotency only. Records are versioned
//! per thread on `(thread_id, extraction_version)`.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Candidate discovery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CandidateThread {
    pub thread_id: Uuid,
    pub inbox_id: Uuid,
    pub tenant_id: Uuid,
    pub subject: Option<String>,
}

/// Threads that have messages but no extraction record for `version`, are not
/// spam-flagged, and are not active in the tracking table. Bounded batch.
pub async fn list_extraction_candidates(
    pool: &PgPool,
    version: i32,
    limit: i64,
) -> Result<Vec<CandidateThread>> {
    let rows = sqlx::query(
        r#"
        select t.thread_id, t.inbox_id, i.tenant_id, t.subject
        from threads t
        join inboxes i on i.inbox_id = t.inbox_id
        where t.inbox_id is not null
          and t.is_spam = false
          and t.is_promotional = false
          and exists (select 1 from messages m where m.thread_id = t.thread_id)
          and not exists (
              select 1 from extractions e
              where e.thread_id = t.thread_id and e.extraction_version = $1
          )
          and not exists (
              select 1 from extraction_queue q
              where q.thread_id = t.thread_id
                and q.status in ('queued','processing','retrying')
          )
        order by t.updated_at asc
        limit $2
        "#,
    )
    .bind(version)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("list_extraction_candidates failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(CandidateThread {
            thread_id: row.try_get("thread_id")?,
            inbox_id: row.try_get("inbox_id")?,
            tenant_id: row.try_get("tenant_id")?,
            subject: row.try_get("subject")?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tracking rows
// ---------------------------------------------------------------------------

/// True while a tracking row blocks re-enqueue (queued/processing/retrying).
pub async fn tracking_active(pool: &PgPool, thread_id: Uuid) -> Result<bool> {
    let (active,): (bool,) = sqlx::query_as(
        r#"
        select exists(
            select 1 from extraction_queue
            where thread_id = $1
              and status in ('queued','processing','retrying')
        )
        "#,
    )
    .bind(thread_id)
    .fetch_one(pool)
    .await
    .context("tracking_active failed")?;

    Ok(active)
}

/// Insert-or-reset the tracking row for a thread.
///
/// Idempotent behavior:
/// - No row yet: insert `queued`, returns Ok(true).
/// - Terminal row (completed/failed): reset to `queued`, returns Ok(true).
/// - Active row: untouched, returns Ok(false) — a duplicate enqueue attempt
///   is a successful skip, not an error.
pub async fn tracking_enqueue(
    pool: &PgPool,
    thread_id: Uuid,
    inbox_id: Uuid,
    tenant_id: Uuid,
    priority: i32,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into extraction_queue
            (thread_id, inbox_id, tenant_id, priority, status, enqueued_at)
        values ($1, $2, $3, $4, 'queued', now())
        on conflict (thread_id) do update
            set status       = 'queued',
                priority     = excluded.priority,
                attempts     = 0,
                last_error   = null,
                enqueued_at  = now(),
                started_at   = null,
                completed_at = null
            where extraction_queue.status in ('completed','failed')
        returning queue_id
        "#,
    )
    .bind(thread_id)
    .bind(inbox_id)
    .bind(tenant_id)
    .bind(priority)
    .fetch_optional(pool)
    .await
    .context("tracking_enqueue failed")?;

    Ok(row.is_some())
}

/// queued/retrying → processing, bumping the attempt counter.
pub async fn tracking_mark_processing(pool: &PgPool, thread_id: Uuid) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update extraction_queue
           set status     = 'processing',
               attempts   = attempts + 1,
               started_at = now()
         where thread_id = $1
           and status in ('queued','retrying')
        returning queue_id
        "#,
    )
    .bind(thread_id)
    .fetch_optional(pool)
    .await
    .context("tracking_mark_processing failed")?;

    Ok(row.is_some())
}

/// Transient failure: the queue message stays for redelivery, the tracking
/// row records the error and waits in `retrying`.
pub async fn tracking_mark_retrying(pool: &PgPool, thread_id: Uuid, error: &str) -> Result<()> {
    sqlx::query(
        r#"
        update extraction_queue
           set status = 'retrying', last_error = $2
         where thread_id = $1
        "#,
    )
    .bind(thread_id)
    .bind(error)
    .execute(pool)
    .await
    .context("tracking_mark_retrying failed")?;
    Ok(())
}

pub async fn tracking_mark_completed(pool: &PgPool, thread_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        update extraction_queue
           set status = 'completed', completed_at = now(), last_error = null
         where thread_id = $1
        "#,
    )
    .bind(thread_id)
    .execute(pool)
    .await
    .context("tracking_mark_completed failed")?;
    Ok(())
}

pub async fn tracking_mark_failed(pool: &PgPool, thread_id: Uuid, error: &str) -> Result<()> {
    sqlx::query(
        r#"
        update extraction_queue
           set status = 'failed', completed_at = now(), last_error = $2
         where thread_id = $1
        "#,
    )
    .bind(thread_id)
    .bind(error)
    .execute(pool)
    .await
    .context("tracking_mark_failed failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Extraction records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewExtraction {
    pub thread_id: Uuid,
    pub extraction_version: i32,
    pub summary: String,
    pub intent: String,
    pub urgency: String,
    pub sentiment: String,
    pub needs_reply: bool,
    pub actionability: String,
    pub scores: Value,
    pub tags: Value,
    pub tasks: Value,
    pub risks: Value,
    pub keywords: Value,
    pub participants: Value,
    pub project: Option<String>,
    pub message_type: String,
    pub is_reply: bool,
    pub is_forward: bool,
    pub reading_time_seconds: i32,
    pub model: String,
    pub usage: Value,
}

/// Persist an extraction record keyed `(thread_id, extraction_version)`.
///
/// Returns Ok(None) when a record for this version already exists — a
/// redelivered extraction job is a no-op, not an error.
pub async fn insert_extraction(pool: &PgPool, rec: &NewExtraction) -> Result<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        insert into extractions
            (thread_id, extraction_version, summary, intent, urgency, sentiment,
             needs_reply, actionability, scores, tags, tasks, risks, keywords,
             participants, project, message_type, is_reply, is_forward,
             reading_time_seconds, model, usage)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21)
        on conflict (thread_id, extraction_version) do nothing
        returning extraction_id
        "#,
    )
    .bind(rec.thread_id)
    .bind(rec.extraction_version)
    .bind(&rec.summary)
    .bind(&rec.intent)
    .bind(&rec.urgency)
    .bind(&rec.sentiment)
    .bind(rec.needs_reply)
    .bind(&rec.actionability)
    .bind(&rec.scores)
    .bind(&rec.tags)
    .bind(&rec.tasks)
    .bind(&rec.risks)
    .bind(&rec.keywords)
    .bind(&rec.participants)
    .bind(&rec.project)
    .bind(&rec.message_type)
    .bind(rec.is_reply)
    .bind(rec.is_forward)
    .bind(rec.reading_time_seconds)
    .bind(&rec.model)
    .bind(&rec.usage)
    .fetch_optional(pool)
    .await
    .context("insert_extraction failed")?;

    Ok(row.map(|(id,)| id))
}

/// Entity rows attached to one extraction record.
pub async fn insert_extraction_entities(
    pool: &PgPool,
    extraction_id: Uuid,
    entities: &[(String, String)],
) -> Result<()> {
    for (kind, value) in entities {
        sqlx::query(
            r#"
            insert into extraction_entities (extraction_id, kind, value)
            values ($1, $2, $3)
            "#,
        )
        .bind(extraction_id)
        .bind(kind)
        .bind(value)
        .execute(pool)
        .await
        .context("insert_extraction_entities failed")?;
    }
    Ok(())
}

pub async fn has_extraction(pool: &PgPool, thread_id: Uuid, version: i32) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists(
            select 1 from extractions
            where thread_id = $1 and extraction_version = $2
        )
        "#,
    )
    .bind(thread_id)
    .bind(version)
    .fetch_one(pool)
    .await
    .context("has_extraction failed")?;

    Ok(exists)
}
