//! Delivery outbox
//!
//! Jobs are written inside the transaction that produced the activity and
//! claimed later by the delivery worker.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection};

use super::models::*;
use crate::error::AppError;

/// Queue `activity` for each inbox
pub async fn enqueue(
    conn: &mut SqliteConnection,
    inboxes: &[String],
    activity: &serde_json::Value,
) -> Result<usize, AppError> {
    if inboxes.is_empty() {
        return Ok(0);
    }

    let payload = serde_json::to_string(activity)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to serialize activity: {e}")))?;
    let now = Utc::now();

    for inbox in inboxes {
        sqlx::query(
            "INSERT INTO delivery_jobs (id, inbox_url, activity, attempts, claimed_at, created_at) \
             VALUES (?, ?, ?, 0, NULL, ?)",
        )
        .bind(EntityId::new().0)
        .bind(inbox)
        .bind(&payload)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }

    Ok(inboxes.len())
}

/// Claim up to `limit` unclaimed jobs, oldest first
///
/// Jobs claimed longer than `stale_after` ago are handed out again.
pub async fn claim_delivery_jobs<'e, E>(
    executor: E,
    limit: i64,
    stale_after: Duration,
) -> Result<Vec<DeliveryJob>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = Utc::now();
    let stale_before: DateTime<Utc> = now - stale_after;

    let jobs = sqlx::query_as::<_, DeliveryJob>(
        r#"
        UPDATE delivery_jobs SET claimed_at = ?1
        WHERE id IN (
            SELECT id FROM delivery_jobs
            WHERE claimed_at IS NULL OR claimed_at < ?2
            ORDER BY created_at ASC, id ASC
            LIMIT ?3
        )
        RETURNING *
        "#,
    )
    .bind(now)
    .bind(stale_before)
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(jobs)
}

/// Drop a delivered job
pub async fn complete_delivery_job<'e, E>(executor: E, id: &str) -> Result<(), AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM delivery_jobs WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Release a failed job for another attempt, or drop it after `max_attempts`
///
/// Returns true if the job was dropped.
pub async fn fail_delivery_job(
    conn: &mut SqliteConnection,
    id: &str,
    max_attempts: i64,
) -> Result<bool, AppError> {
    let attempts = sqlx::query_scalar::<_, i64>(
        "UPDATE delivery_jobs SET attempts = attempts + 1, claimed_at = NULL WHERE id = ? RETURNING attempts",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(attempts) = attempts else {
        return Ok(false);
    };

    if attempts >= max_attempts {
        complete_delivery_job(&mut *conn, id).await?;
        return Ok(true);
    }
    Ok(false)
}

/// Jobs waiting for `inbox_url`
pub async fn pending_jobs_for_inbox<'e, E>(
    executor: E,
    inbox_url: &str,
) -> Result<Vec<DeliveryJob>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let jobs = sqlx::query_as::<_, DeliveryJob>(
        "SELECT * FROM delivery_jobs WHERE inbox_url = ? ORDER BY created_at ASC, id ASC",
    )
    .bind(inbox_url)
    .fetch_all(executor)
    .await?;
    Ok(jobs)
}

pub async fn count_pending<'e, E>(executor: E) -> Result<i64, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM delivery_jobs")
        .fetch_one(executor)
        .await?;
    Ok(count)
}
