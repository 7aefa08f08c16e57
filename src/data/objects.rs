//! Rates, shares and cache files
//!
//! Records created by remote activities and destroyed by their Undo. Each is
//! keyed by the URL of the activity (or object) that created it.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection};

use super::models::*;
use crate::error::AppError;

// =========================================================================
// Rates
// =========================================================================

/// Record `rate_type` of `account_id` on a video, replacing a previous rate
pub async fn upsert_rate<'e, E>(
    executor: E,
    account_id: &str,
    video_id: &str,
    rate_type: RateType,
    url: &str,
) -> Result<AccountVideoRate, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rate = sqlx::query_as::<_, AccountVideoRate>(
        r#"
        INSERT INTO account_video_rates (id, account_id, video_id, rate_type, url, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (account_id, video_id) DO UPDATE SET
            rate_type = excluded.rate_type,
            url = excluded.url
        RETURNING *
        "#,
    )
    .bind(EntityId::new().0)
    .bind(account_id)
    .bind(video_id)
    .bind(rate_type)
    .bind(url)
    .bind(Utc::now())
    .fetch_one(executor)
    .await?;
    Ok(rate)
}

pub async fn load_rate<'e, E>(
    executor: E,
    account_id: &str,
    video_id: &str,
) -> Result<Option<AccountVideoRate>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rate = sqlx::query_as::<_, AccountVideoRate>(
        "SELECT * FROM account_video_rates WHERE account_id = ? AND video_id = ?",
    )
    .bind(account_id)
    .bind(video_id)
    .fetch_optional(executor)
    .await?;
    Ok(rate)
}

pub async fn load_rate_by_url<'e, E>(
    executor: E,
    url: &str,
) -> Result<Option<AccountVideoRate>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rate = sqlx::query_as::<_, AccountVideoRate>(
        "SELECT * FROM account_video_rates WHERE url = ?",
    )
    .bind(url)
    .fetch_optional(executor)
    .await?;
    Ok(rate)
}

pub async fn delete_rate<'e, E>(executor: E, id: &str) -> Result<bool, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM account_video_rates WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Recompute `likes`/`dislikes` of a video from its rate rows
pub async fn refresh_video_rates(
    conn: &mut SqliteConnection,
    video_id: &str,
) -> Result<Video, AppError> {
    let video = sqlx::query_as::<_, Video>(
        r#"
        UPDATE videos SET
            likes = (SELECT COUNT(*) FROM account_video_rates WHERE video_id = ?1 AND rate_type = 'like'),
            dislikes = (SELECT COUNT(*) FROM account_video_rates WHERE video_id = ?1 AND rate_type = 'dislike'),
            updated_at = ?2
        WHERE id = ?1
        RETURNING *
        "#,
    )
    .bind(video_id)
    .bind(Utc::now())
    .fetch_optional(&mut *conn)
    .await?;

    video.ok_or(AppError::NotFound)
}

// =========================================================================
// Shares
// =========================================================================

/// Return the share of `video_id` by `actor_id`, creating it when absent
pub async fn find_or_create_share(
    conn: &mut SqliteConnection,
    actor_id: &str,
    video_id: &str,
    url: &str,
) -> Result<(VideoShare, bool), AppError> {
    let inserted = sqlx::query(
        "INSERT INTO video_shares (id, actor_id, video_id, url, created_at) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT DO NOTHING",
    )
    .bind(EntityId::new().0)
    .bind(actor_id)
    .bind(video_id)
    .bind(url)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    let share = sqlx::query_as::<_, VideoShare>(
        "SELECT * FROM video_shares WHERE actor_id = ? AND video_id = ?",
    )
    .bind(actor_id)
    .bind(video_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::Validation(format!("announce {url} already belongs to another share")))?;

    Ok((share, inserted.rows_affected() > 0))
}

pub async fn load_share_by_url<'e, E>(executor: E, url: &str) -> Result<Option<VideoShare>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let share = sqlx::query_as::<_, VideoShare>("SELECT * FROM video_shares WHERE url = ?")
        .bind(url)
        .fetch_optional(executor)
        .await?;
    Ok(share)
}

pub async fn delete_share<'e, E>(executor: E, id: &str) -> Result<bool, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM video_shares WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

// =========================================================================
// Cache files (redundancy offers)
// =========================================================================

/// Input for a cache-file offer
#[derive(Debug, Clone)]
pub struct NewRedundancy<'a> {
    pub actor_id: &'a str,
    pub video_id: &'a str,
    pub url: &'a str,
    pub file_url: &'a str,
    pub expires_on: Option<DateTime<Utc>>,
}

/// Insert a cache file, or refresh location and expiry of a known one
///
/// Ownership of an existing row must be checked by the caller.
pub async fn upsert_redundancy<'e, E>(
    executor: E,
    offer: &NewRedundancy<'_>,
) -> Result<VideoRedundancy, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let redundancy = sqlx::query_as::<_, VideoRedundancy>(
        r#"
        INSERT INTO video_redundancies (id, actor_id, video_id, url, file_url, expires_on, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (url) DO UPDATE SET
            file_url = excluded.file_url,
            expires_on = excluded.expires_on
        RETURNING *
        "#,
    )
    .bind(EntityId::new().0)
    .bind(offer.actor_id)
    .bind(offer.video_id)
    .bind(offer.url)
    .bind(offer.file_url)
    .bind(offer.expires_on)
    .bind(Utc::now())
    .fetch_one(executor)
    .await?;
    Ok(redundancy)
}

pub async fn load_redundancy_by_url<'e, E>(
    executor: E,
    url: &str,
) -> Result<Option<VideoRedundancy>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let redundancy =
        sqlx::query_as::<_, VideoRedundancy>("SELECT * FROM video_redundancies WHERE url = ?")
            .bind(url)
            .fetch_optional(executor)
            .await?;
    Ok(redundancy)
}

pub async fn delete_redundancy<'e, E>(executor: E, id: &str) -> Result<bool, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM video_redundancies WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Drop cache files whose expiry has passed
pub async fn delete_expired_redundancies<'e, E>(
    executor: E,
    now: DateTime<Utc>,
) -> Result<u64, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "DELETE FROM video_redundancies WHERE expires_on IS NOT NULL AND expires_on < ?",
    )
    .bind(now)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
