//! Notification sink: the single out-edge for triggered alerts.
//!
//! Delivery channels (push, email, webhook) live outside this system;
//! the core only hands a draft to whatever sink it was wired with.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use screener_data::models::NotificationDraft;
use screener_data::repositories::NotificationRepository;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn emit(&self, draft: &NotificationDraft) -> Result<()>;
}

/// Persists notifications to the `notifications` table, where delivery
/// workers pick them up.
pub struct DatabaseSink {
    notifications: NotificationRepository,
}

impl DatabaseSink {
    #[must_use]
    pub fn new(notifications: NotificationRepository) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl NotificationSink for DatabaseSink {
    async fn emit(&self, draft: &NotificationDraft) -> Result<()> {
        let id = self.notifications.insert(draft).await?;
        info!(
            notification_id = id,
            alert_id = draft.alert_id,
            user_id = draft.user_id,
            "Notification stored"
        );
        Ok(())
    }
}

/// Log-only sink for one-shot CLI evaluation runs.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn emit(&self, draft: &NotificationDraft) -> Result<()> {
        info!(
            alert_id = draft.alert_id,
            user_id = draft.user_id,
            ticker = draft.ticker.as_deref().unwrap_or("-"),
            message = %draft.message,
            "Alert triggered"
        );
        Ok(())
    }
}
