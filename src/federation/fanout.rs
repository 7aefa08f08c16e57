//! Federation fan-out
//!
//! Computes the remote inboxes an activity about a video must reach and
//! writes one delivery job per inbox on the caller's connection, so the jobs
//! commit or roll back with the change that produced them.

use std::collections::HashSet;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::data::{delivery, Actor, Video};
use crate::error::AppError;

fn activity_type(activity: &serde_json::Value) -> &str {
    activity
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("Unknown")
}

/// Delivery inboxes of remote accepted followers of everyone involved in
/// `video`: its channel, the channel's owner account, actors who shared it,
/// and the local instance actor
pub async fn video_subscriber_inboxes(
    conn: &mut SqliteConnection,
    video: &Video,
) -> Result<Vec<String>, AppError> {
    let inboxes = sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT COALESCE(follower.shared_inbox_url, follower.inbox_url) AS inbox
        FROM actor_follows
        JOIN actors AS follower ON follower.id = actor_follows.actor_id
        WHERE actor_follows.state = 'accepted'
          AND follower.server_id IS NOT NULL
          AND actor_follows.target_actor_id IN (
              SELECT video_channels.actor_id FROM video_channels WHERE video_channels.id = ?1
              UNION
              SELECT accounts.actor_id FROM accounts
              JOIN video_channels ON video_channels.account_id = accounts.id
              WHERE video_channels.id = ?1
              UNION
              SELECT video_shares.actor_id FROM video_shares WHERE video_shares.video_id = ?2
              UNION
              SELECT actors.id FROM actors
              WHERE actors.actor_type = 'Application' AND actors.server_id IS NULL
          )
        ORDER BY inbox ASC
        "#,
    )
    .bind(&video.channel_id)
    .bind(&video.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(inboxes)
}

async fn excluded_inboxes(
    conn: &mut SqliteConnection,
    exclude_actor_ids: &[String],
) -> Result<HashSet<String>, AppError> {
    if exclude_actor_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT inbox_url, shared_inbox_url FROM actors WHERE id IN (",
    );
    {
        let mut separated = builder.separated(", ");
        for id in exclude_actor_ids {
            separated.push_bind(id.clone());
        }
    }
    builder.push(")");

    let rows = builder
        .build_query_as::<(String, Option<String>)>()
        .fetch_all(&mut *conn)
        .await?;

    let mut inboxes = HashSet::new();
    for (inbox, shared_inbox) in rows {
        inboxes.insert(inbox);
        if let Some(shared_inbox) = shared_inbox {
            inboxes.insert(shared_inbox);
        }
    }
    Ok(inboxes)
}

/// Queue `activity` for the subscribers of `video`, minus the inboxes of
/// `exclude_actor_ids`
///
/// Returns the number of jobs written.
pub async fn forward_video_activity(
    conn: &mut SqliteConnection,
    activity: &serde_json::Value,
    exclude_actor_ids: &[String],
    video: &Video,
) -> Result<usize, AppError> {
    let excluded = excluded_inboxes(conn, exclude_actor_ids).await?;
    let inboxes: Vec<String> = video_subscriber_inboxes(conn, video)
        .await?
        .into_iter()
        .filter(|inbox| !excluded.contains(inbox))
        .collect();

    let queued = delivery::enqueue(conn, &inboxes, activity).await?;
    record_enqueued(activity, queued);

    tracing::debug!(
        video = %video.url,
        activity_type = activity_type(activity),
        recipients = queued,
        "Forwarded video activity"
    );
    Ok(queued)
}

/// Queue `activity` for a single actor
pub async fn send_to_actor(
    conn: &mut SqliteConnection,
    activity: &serde_json::Value,
    recipient: &Actor,
) -> Result<usize, AppError> {
    if recipient.is_local() {
        return Ok(0);
    }

    let inboxes = [recipient.delivery_inbox().to_string()];
    let queued = delivery::enqueue(conn, &inboxes, activity).await?;
    record_enqueued(activity, queued);
    Ok(queued)
}

fn record_enqueued(activity: &serde_json::Value, queued: usize) {
    if queued > 0 {
        crate::metrics::DELIVERY_JOBS_ENQUEUED
            .with_label_values(&[activity_type(activity)])
            .inc_by(queued as u64);
    }
}
