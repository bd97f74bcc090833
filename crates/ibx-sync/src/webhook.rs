//! Webhook notification consumer.
//!
//! Drains `webhook_notifications` and routes by notification type onto the
//! same ingest path the thread-sync worker uses. Every consumed notification
//! is stamped on its audit row. Singleton per installation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use sqlx::PgPool;
use tracing::{info, warn};

use ibx_config::SyncSettings;
use ibx_db::queue::{self, QueueMessage};
use ibx_provider::EmailProvider;
use ibx_runtime::Shutdown;
use ibx_schemas::{
    extract_remote_message_id, NotificationType, WebhookNotification, QUEUE_WEBHOOKS,
};

use crate::ingest::{new_thread_from_remote, sync_remote_message};

pub struct WebhookConsumer {
    pool: PgPool,
    provider: Arc<dyn EmailProvider>,
    settings: SyncSettings,
}

impl WebhookConsumer {
    pub fn new(pool: PgPool, provider: Arc<dyn EmailProvider>, settings: SyncSettings) -> Self {
        Self {
            pool,
            provider,
            settings,
        }
    }

    pub async fn run(self, mut shutdown: Shutdown) -> Result<()> {
        loop {
            if shutdown.is_triggered() {
                break;
            }
            if let Err(e) = self.poll_once(&shutdown).await {
                warn!(component = "webhook", error = %format!("{e:#}"), "poll failed");
            }
            if shutdown
                .sleep(Duration::from_millis(self.settings.webhook_poll_ms))
                .await
            {
                break;
            }
        }
        Ok(())
    }

    pub async fn poll_once(&self, shutdown: &Shutdown) -> Result<usize> {
        let messages = queue::read_batch(
            &self.pool,
            QUEUE_WEBHOOKS,
            self.settings.webhook_visibility,
            self.settings.webhook_batch,
        )
        .await?;

        let n = messages.len();
        for msg in messages {
            if shutdown.is_triggered() {
                break;
            }
            self.handle_message(msg).await;
        }
        Ok(n)
    }

    pub async fn handle_message(&self, msg: QueueMessage) {
        let notification: WebhookNotification = match msg.decode() {
            Ok(n) => n,
            Err(e) => {
                warn!(component = "webhook", msg_id = msg.msg_id, error = %format!("{e:#}"), "undecodable notification dropped");
                self.ack(msg.msg_id).await;
                return;
            }
        };

        if let Err(e) = ibx_db::record_notification(
            &self.pool,
            notification.notification_id,
            &notification.webhook_id,
            Some(notification.inbox_id),
            &notification.notification_type,
            &notification.grant_id,
            &notification.payload,
        )
        .await
        {
            warn!(component = "webhook", error = %format!("{e:#}"), "audit write failed");
            return; // transient; redelivery
        }

        if msg.exhausted(self.settings.webhook_max_retries) {
            let reason = format!("retry limit exceeded after {} reads", msg.read_ct);
            warn!(
                component = "webhook",
                notification_id = %notification.notification_id,
                notification_type = %notification.notification_type,
                "{reason}"
            );
            if let Err(e) =
                ibx_db::mark_notification_error(&self.pool, notification.notification_id, &reason)
                    .await
            {
                warn!(component = "webhook", error = %format!("{e:#}"), "audit write failed");
            }
            self.ack(msg.msg_id).await;
            return;
        }

        // A permanent payload error is handled inside `route` (audit row set
        // to error, Ok returned); an Err here is transient and leaves the
        // message for redelivery.
        match self.route(&notification).await {
            Ok(()) => {
                self.ack(msg.msg_id).await;
            }
            Err(e) => {
                warn!(
                    component = "webhook",
                    notification_id = %notification.notification_id,
                    notification_type = %notification.notification_type,
                    error = %format!("{e:#}"),
                    "notification handling failed; will retry"
                );
            }
        }
    }

    async fn route(&self, notification: &WebhookNotification) -> Result<()> {
        match NotificationType::parse(&notification.notification_type) {
            NotificationType::MessageCreated | NotificationType::MessageUpdated => {
                self.handle_message_event(notification).await
            }
            NotificationType::ThreadReplied => self.handle_thread_replied(notification).await,
            NotificationType::GrantExpired => {
                let flagged =
                    ibx_db::mark_inbox_auth_expired(&self.pool, &notification.grant_id).await?;
                info!(
                    component = "webhook",
                    grant_id = %notification.grant_id,
                    flagged,
                    "grant expired; inboxes flagged"
                );
                ibx_db::mark_notification_processed(&self.pool, notification.notification_id)
                    .await?;
                Ok(())
            }
            NotificationType::Unknown(other) => {
                info!(component = "webhook", notification_type = %other, "unknown notification type acknowledged");
                ibx_db::mark_notification_processed(&self.pool, notification.notification_id)
                    .await?;
                Ok(())
            }
        }
    }

    async fn handle_message_event(
        &self,
        notification: &WebhookNotification,
    ) -> Result<()> {
        let Some(remote_message_id) = extract_remote_message_id(&notification.payload) else {
            // Permanent payload error: no id to ever act on.
            let reason = "no message id in webhook payload";
            warn!(
                component = "webhook",
                notification_id = %notification.notification_id,
                "{reason}"
            );
            ibx_db::mark_notification_error(&self.pool, notification.notification_id, reason)
                .await?;
            return Ok(());
        };

        let grant_id = self.resolve_grant(notification).await?;
        let outcome = sync_remote_message(
            &self.pool,
            self.provider.as_ref(),
            &grant_id,
            Some(notification.inbox_id),
            &remote_message_id,
        )
        .await?;

        info!(
            component = "webhook",
            notification_id = %notification.notification_id,
            message_id = %remote_message_id,
            outcome = ?outcome,
            "message notification handled"
        );
        ibx_db::mark_notification_processed(&self.pool, notification.notification_id).await?;
        Ok(())
    }

    async fn handle_thread_replied(
        &self,
        notification: &WebhookNotification,
    ) -> Result<()> {
        // The same payload probe applies: thread events carry the thread id
        // in the object position.
        let Some(remote_thread_id) = extract_remote_message_id(&notification.payload) else {
            let reason = "no thread id in webhook payload";
            warn!(
                component = "webhook",
                notification_id = %notification.notification_id,
                "{reason}"
            );
            ibx_db::mark_notification_error(&self.pool, notification.notification_id, reason)
                .await?;
            return Ok(());
        };

        let grant_id = self.resolve_grant(notification).await?;
        let remote_thread = self
            .provider
            .find_thread(&grant_id, &remote_thread_id)
            .await
            .map_err(|e| anyhow!("thread fetch failed: {e}"))?;

        match remote_thread {
            Some(thread) => {
                ibx_db::upsert_thread(
                    &self.pool,
                    &new_thread_from_remote(&thread, Some(notification.inbox_id)),
                )
                .await?;
                info!(
                    component = "webhook",
                    thread_id = %remote_thread_id,
                    "thread metadata refreshed"
                );
            }
            None => {
                info!(
                    component = "webhook",
                    thread_id = %remote_thread_id,
                    "thread not found on provider; acknowledged"
                );
            }
        }

        ibx_db::mark_notification_processed(&self.pool, notification.notification_id).await?;
        Ok(())
    }

    async fn resolve_grant(&self, notification: &WebhookNotification) -> Result<String> {
        if !notification.grant_id.is_empty() {
            return Ok(notification.grant_id.clone());
        }
        ibx_db::resolve_grant(&self.pool, notification.inbox_id)
            .await?
            .ok_or_else(|| anyhow!("no grant id on notification or inbox binding"))
    }

    /// Acknowledge unless testing mode keeps messages for redelivery.
    async fn ack(&self, msg_id: i64) {
        if self.settings.testing_mode {
            info!(component = "webhook", msg_id, "testing mode: delete skipped, message will redeliver");
            return;
        }
        if let Err(e) = queue::delete_message(&self.pool, QUEUE_WEBHOOKS, msg_id).await {
            warn!(component = "webhook", msg_id, error = %format!("{e:#}"), "queue delete failed");
        }
    }
}
