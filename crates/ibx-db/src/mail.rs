//! Persisted threads, messages, and inbox bindings.
//!
//! Threads and messages are identified by their remote IDs; the uuid primary
//! keys are incidental. Every write here is an idempotent upsert or a
//! dedupe-on-conflict insert so webhook-triggered and backfill-triggered
//! syncs can interleave safely.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Inboxes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct InboxRow {
    pub inbox_id: Uuid,
    pub tenant_id: Uuid,
    pub config_id: Uuid,
    pub grant_id: String,
    pub email_address: Option<String>,
    pub auth_expired: bool,
}

#[derive(Debug, Clone)]
pub struct NewInbox {
    pub inbox_id: Uuid,
    pub tenant_id: Uuid,
    pub config_id: Uuid,
    pub grant_id: String,
    pub email_address: Option<String>,
}

pub async fn insert_inbox(pool: &PgPool, inbox: &NewInbox) -> Result<()> {
    sqlx::query(
        r#"
        insert into inboxes (inbox_id, tenant_id, config_id, grant_id, email_address)
        values ($1, $2, $3, $4, $5)
        on conflict (inbox_id) do update
            set grant_id      = excluded.grant_id,
                email_address = excluded.email_address,
                auth_expired  = false
        "#,
    )
    .bind(inbox.inbox_id)
    .bind(inbox.tenant_id)
    .bind(inbox.config_id)
    .bind(&inbox.grant_id)
    .bind(&inbox.email_address)
    .execute(pool)
    .await
    .context("insert_inbox failed")?;
    Ok(())
}

pub async fn fetch_inbox(pool: &PgPool, inbox_id: Uuid) -> Result<Option<InboxRow>> {
    let row = sqlx::query(
        r#"
        select inbox_id, tenant_id, config_id, grant_id, email_address, auth_expired
        from inboxes
        where inbox_id = $1
        "#,
    )
    .bind(inbox_id)
    .fetch_optional(pool)
    .await
    .context("fetch_inbox failed")?;

    let Some(row) = row else { return Ok(None) };

    Ok(Some(InboxRow {
        inbox_id: row.try_get("inbox_id")?,
        tenant_id: row.try_get("tenant_id")?,
        config_id: row.try_get("config_id")?,
        grant_id: row.try_get("grant_id")?,
        email_address: row.try_get("email_address")?,
        auth_expired: row.try_get("auth_expired")?,
    }))
}

/// The inbox row is authoritative for the grant; work rows only denormalize it.
pub async fn resolve_grant(pool: &PgPool, inbox_id: Uuid) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        select grant_id from inboxes where inbox_id = $1
        "#,
    )
    .bind(inbox_id)
    .fetch_optional(pool)
    .await
    .context("resolve_grant failed")?;

    Ok(row.map(|(g,)| g).filter(|g| !g.is_empty()))
}

/// `grant.expired` webhook: flag every inbox bound to the grant.
/// Returns the number of inboxes flagged.
pub async fn mark_inbox_auth_expired(pool: &PgPool, grant_id: &str) -> Result<u64> {
    let res = sqlx::query(
        r#"
        update inboxes
           set auth_expired = true
         where grant_id = $1
        "#,
    )
    .bind(grant_id)
    .execute(pool)
    .await
    .context("mark_inbox_auth_expired failed")?;

    Ok(res.rows_affected())
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewThread {
    pub remote_thread_id: String,
    pub inbox_id: Option<Uuid>,
    pub subject: Option<String>,
    pub participants: Value,
    pub latest_message_at: Option<DateTime<Utc>>,
    pub unread: bool,
    pub starred: bool,
}

/// Insert-or-refresh a thread keyed on its remote id; returns the local key.
pub async fn upsert_thread(pool: &PgPool, thread: &NewThread) -> Result<Uuid> {
    let (thread_id,): (Uuid,) = sqlx::query_as(
        r#"
        insert into threads
            (remote_thread_id, inbox_id, subject, participants, latest_message_at,
             unread, starred)
        values ($1, $2, $3, $4, $5, $6, $7)
        on conflict (remote_thread_id) do update
            set subject           = excluded.subject,
                participants      = excluded.participants,
                latest_message_at = excluded.latest_message_at,
                unread            = excluded.unread,
                starred           = excluded.starred,
                inbox_id          = coalesce(excluded.inbox_id, threads.inbox_id),
                updated_at        = now()
        returning thread_id
        "#,
    )
    .bind(&thread.remote_thread_id)
    .bind(thread.inbox_id)
    .bind(&thread.subject)
    .bind(&thread.participants)
    .bind(thread.latest_message_at)
    .bind(thread.unread)
    .bind(thread.starred)
    .fetch_one(pool)
    .await
    .context("upsert_thread failed")?;

    Ok(thread_id)
}

/// Local key for a remote thread id, if the thread has been persisted.
pub async fn thread_local_id(pool: &PgPool, remote_thread_id: &str) -> Result<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        select thread_id from threads where remote_thread_id = $1
        "#,
    )
    .bind(remote_thread_id)
    .fetch_optional(pool)
    .await
    .context("thread_local_id failed")?;

    Ok(row.map(|(id,)| id))
}

/// Stamp a spam/promotional verdict on a thread.
pub async fn mark_thread_spam(
    pool: &PgPool,
    thread_id: Uuid,
    is_spam: bool,
    is_promotional: bool,
    confidence: f32,
    reasoning: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        update threads
           set is_spam         = $2,
               is_promotional  = $3,
               spam_confidence = $4,
               spam_reasoning  = $5,
               updated_at      = now()
         where thread_id = $1
        "#,
    )
    .bind(thread_id)
    .bind(is_spam)
    .bind(is_promotional)
    .bind(confidence)
    .bind(reasoning)
    .execute(pool)
    .await
    .context("mark_thread_spam failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub remote_message_id: String,
    pub remote_thread_id: String,
    pub from_addr: Value,
    pub to_addrs: Value,
    pub snippet: Option<String>,
    pub body: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Insert a message with dedupe on `remote_message_id`.
///
/// Idempotent behavior:
/// - If remote_message_id already exists, returns Ok(false) and does NOT create a second row.
/// - If inserted, returns Ok(true).
pub async fn insert_message_deduped(
    pool: &PgPool,
    thread_id: Uuid,
    msg: &NewMessage,
) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        insert into messages
            (remote_message_id, thread_id, remote_thread_id, from_addr, to_addrs,
             snippet, body, sent_at)
        values ($1, $2, $3, $4, $5, $6, $7, $8)
        on conflict (remote_message_id) do nothing
        returning message_id
        "#,
    )
    .bind(&msg.remote_message_id)
    .bind(thread_id)
    .bind(&msg.remote_thread_id)
    .bind(&msg.from_addr)
    .bind(&msg.to_addrs)
    .bind(&msg.snippet)
    .bind(&msg.body)
    .bind(msg.sent_at)
    .fetch_optional(pool)
    .await
    .context("insert_message_deduped failed")?;

    Ok(row.is_some())
}

pub async fn message_exists(pool: &PgPool, remote_message_id: &str) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists(select 1 from messages where remote_message_id = $1)
        "#,
    )
    .bind(remote_message_id)
    .fetch_one(pool)
    .await
    .context("message_exists failed")?;

    Ok(exists)
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: Uuid,
    pub remote_message_id: String,
    pub from_addr: Value,
    pub to_addrs: Value,
    pub snippet: Option<String>,
    pub body: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// All messages of a thread in chronological order (nulls last, then
/// insertion order as the tiebreak) — the transcript order for extraction.
pub async fn fetch_thread_messages(pool: &PgPool, thread_id: Uuid) -> Result<Vec<StoredMessage>> {
    let rows = sqlx::query(
        r#"
        select message_id, remote_message_id, from_addr, to_addrs, snippet, body, sent_at
        from messages
        where thread_id = $1
        order by sent_at asc nulls last, created_at asc
        "#,
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await
    .context("fetch_thread_messages failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(StoredMessage {
            message_id: row.try_get("message_id")?,
            remote_message_id: row.try_get("remote_message_id")?,
            from_addr: row.try_get("from_addr")?,
            to_addrs: row.try_get("to_addrs")?,
            snippet: row.try_get("snippet")?,
            body: row.try_get("body")?,
            sent_at: row.try_get("sent_at")?,
        });
    }
    Ok(out)
}

/// Mark every message of a thread as extracted.
pub async fn mark_thread_messages_extracted(pool: &PgPool, thread_id: Uuid) -> Result<u64> {
    let res = sqlx::query(
        r#"
        update messages
           set extraction_status = 'completed'
         where thread_id = $1
        "#,
    )
    .bind(thread_id)
    .execute(pool)
    .await
    .context("mark_thread_messages_extracted failed")?;

    Ok(res.rows_affected())
}
