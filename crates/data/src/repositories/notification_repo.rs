//! Notification repository: the database leg of the notification sink.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::NotificationDraft;

#[derive(Debug, Clone)]
pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts one notification row and returns its id.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert(&self, draft: &NotificationDraft) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r"
            INSERT INTO notifications
                (user_id, alert_id, ticker, notification_type, title, message, data_json, is_read, triggered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, now())
            RETURNING id
            ",
        )
        .bind(draft.user_id)
        .bind(draft.alert_id)
        .bind(&draft.ticker)
        .bind(&draft.kind)
        .bind(&draft.title)
        .bind(&draft.message)
        .bind(&draft.payload)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert notification")?;

        Ok(row.0)
    }
}
