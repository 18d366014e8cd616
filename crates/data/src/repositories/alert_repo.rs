//! Alert subscription repository.
//!
//! Owns the `alert_subscriptions` working set, the per-evaluation status
//! stamps, and the `alert_execution_log` audit trail. The scheduler is
//! the only writer of the trigger/evaluate stamps; CRUD comes from the
//! API.

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::models::{AlertRecord, AlertUpdate, NewAlert};

const ALERT_COLUMNS: &str = r"
    id, user_id, ticker, kind, name, condition, frequency,
    active, last_triggered, last_evaluated, trigger_count
";

#[derive(Debug, Clone)]
pub struct AlertRepository {
    pool: PgPool,
}

impl AlertRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads the working set for one scheduler cycle: active
    /// subscriptions outside their rate-limit window.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn load_due(&self, rate_limit_window_hours: i64) -> Result<Vec<AlertRecord>> {
        let records = sqlx::query_as::<_, AlertRecord>(&format!(
            r"
            SELECT {ALERT_COLUMNS}
            FROM alert_subscriptions
            WHERE active = TRUE
              AND (last_triggered IS NULL
                   OR last_triggered < now() - ($1 * interval '1 hour'))
            ORDER BY id
            "
        ))
        .bind(rate_limit_window_hours)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load due alerts")?;

        Ok(records)
    }

    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: i64) -> Result<Option<AlertRecord>> {
        let record = sqlx::query_as::<_, AlertRecord>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alert_subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch alert")?;

        Ok(record)
    }

    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<AlertRecord>> {
        let records = sqlx::query_as::<_, AlertRecord>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alert_subscriptions WHERE user_id = $1 ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list alerts")?;

        Ok(records)
    }

    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn create(&self, alert: &NewAlert) -> Result<AlertRecord> {
        let record = sqlx::query_as::<_, AlertRecord>(&format!(
            r"
            INSERT INTO alert_subscriptions (user_id, ticker, kind, name, condition, frequency, active, trigger_count)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, 0)
            RETURNING {ALERT_COLUMNS}
            "
        ))
        .bind(alert.user_id)
        .bind(&alert.ticker)
        .bind(&alert.kind)
        .bind(&alert.name)
        .bind(&alert.condition)
        .bind(&alert.frequency)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create alert")?;

        Ok(record)
    }

    /// Applies a partial update; absent fields keep their stored value.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn update(&self, id: i64, update: &AlertUpdate) -> Result<Option<AlertRecord>> {
        let record = sqlx::query_as::<_, AlertRecord>(&format!(
            r"
            UPDATE alert_subscriptions
            SET name = COALESCE($2, name),
                condition = COALESCE($3, condition),
                frequency = COALESCE($4, frequency),
                active = COALESCE($5, active)
            WHERE id = $1
            RETURNING {ALERT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(&update.name)
        .bind(&update.condition)
        .bind(&update.frequency)
        .bind(update.active)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update alert")?;

        Ok(record)
    }

    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM alert_subscriptions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete alert")?;

        Ok(result.rows_affected() > 0)
    }

    /// Stamps a triggered evaluation: trigger and evaluation time move
    /// together so a notification is never emitted without its stamp.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn mark_triggered(&self, id: i64) -> Result<()> {
        sqlx::query(
            r"
            UPDATE alert_subscriptions
            SET last_triggered = now(),
                last_evaluated = now(),
                trigger_count = trigger_count + 1
            WHERE id = $1
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark alert triggered")?;

        Ok(())
    }

    /// # Errors
    /// Returns an error if the update fails.
    pub async fn mark_evaluated(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE alert_subscriptions SET last_evaluated = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to mark alert evaluated")?;

        Ok(())
    }

    /// Appends one row to the evaluation audit trail.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn log_execution(
        &self,
        alert_id: i64,
        triggered: bool,
        error_message: Option<&str>,
        result: Option<&JsonValue>,
    ) -> Result<()> {
        let status = if error_message.is_some() {
            "error"
        } else {
            "success"
        };
        sqlx::query(
            r"
            INSERT INTO alert_execution_log (alert_id, executed_at, status, triggered, error_message, evaluation_result)
            VALUES ($1, now(), $2, $3, $4, $5)
            ",
        )
        .bind(alert_id)
        .bind(status)
        .bind(triggered)
        .bind(error_message)
        .bind(result)
        .execute(&self.pool)
        .await
        .context("Failed to log alert execution")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_columns_cover_the_record_fields() {
        // Keep the shared column list in sync with AlertRecord.
        for field in [
            "id",
            "user_id",
            "ticker",
            "kind",
            "name",
            "condition",
            "frequency",
            "active",
            "last_triggered",
            "last_evaluated",
            "trigger_count",
        ] {
            assert!(ALERT_COLUMNS.contains(field), "missing column {field}");
        }
    }

    // Integration tests require a live database; the pure working-set
    // window logic is covered in the alert engine's scheduler tests.
}
