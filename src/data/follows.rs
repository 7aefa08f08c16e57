//! Follow graph store
//!
//! Sole owner of `actor_follows` rows. Every mutating function rebuilds the
//! derived follower/following counters of both endpoints on the same
//! connection before returning, so callers running inside a transaction get
//! counts that commit or roll back together with the edge.

use chrono::Utc;
use serde::Serialize;
use sqlx::{Executor, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use super::models::*;
use crate::error::AppError;

/// Instance-level follow totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FollowStats {
    pub total_instance_followers: i64,
    pub total_instance_following: i64,
}

/// Score clamp applied by every score update
#[derive(Debug, Clone, Copy)]
pub struct ScoreBounds {
    pub floor: i64,
    pub max: i64,
}

// =========================================================================
// Lookups
// =========================================================================

pub async fn load<'e, E>(executor: E, id: &str) -> Result<Option<ActorFollow>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let edge = sqlx::query_as::<_, ActorFollow>("SELECT * FROM actor_follows WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(edge)
}

pub async fn load_by_actor_and_target<'e, E>(
    executor: E,
    actor_id: &str,
    target_actor_id: &str,
) -> Result<Option<ActorFollow>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let edge = sqlx::query_as::<_, ActorFollow>(
        "SELECT * FROM actor_follows WHERE actor_id = ? AND target_actor_id = ?",
    )
    .bind(actor_id)
    .bind(target_actor_id)
    .fetch_optional(executor)
    .await?;
    Ok(edge)
}

pub async fn load_by_url<'e, E>(executor: E, url: &str) -> Result<Option<ActorFollow>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let edge = sqlx::query_as::<_, ActorFollow>("SELECT * FROM actor_follows WHERE url = ?")
        .bind(url)
        .fetch_optional(executor)
        .await?;
    Ok(edge)
}

/// Whether `follower_id` has an accepted follow on `actor_id`
pub async fn is_followed_by<'e, E>(
    executor: E,
    actor_id: &str,
    follower_id: &str,
) -> Result<bool, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT EXISTS (SELECT 1 FROM actor_follows \
         WHERE target_actor_id = ? AND actor_id = ? AND state = 'accepted')",
    )
    .bind(actor_id)
    .bind(follower_id)
    .fetch_one(executor)
    .await?;
    Ok(found != 0)
}

/// Edges whose score dropped to zero or below
pub async fn list_bad<'e, E>(executor: E, limit: i64) -> Result<Vec<ActorFollow>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let edges = sqlx::query_as::<_, ActorFollow>(
        "SELECT * FROM actor_follows WHERE score <= 0 ORDER BY score ASC, id ASC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(edges)
}

pub async fn count_edges<'e, E>(executor: E) -> Result<i64, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM actor_follows")
        .fetch_one(executor)
        .await?;
    Ok(count)
}

// =========================================================================
// Mutations
// =========================================================================

/// Return the edge for (follower, target), creating it when absent
///
/// Idempotent: an existing edge comes back unchanged with `created = false`.
/// The insert runs before any read, so concurrent callers for the same pair
/// serialize on the write lock and the unique key; the loser observes the
/// winner's row.
pub async fn find_or_create(
    conn: &mut SqliteConnection,
    actor_id: &str,
    target_actor_id: &str,
    url: Option<&str>,
    state: FollowState,
    base_score: i64,
) -> Result<(ActorFollow, bool), AppError> {
    if actor_id == target_actor_id {
        return Err(AppError::Validation("an actor cannot follow itself".into()));
    }

    let now = Utc::now();
    let inserted = sqlx::query(
        r#"
        INSERT INTO actor_follows (id, actor_id, target_actor_id, state, score, url, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(EntityId::new().0)
    .bind(actor_id)
    .bind(target_actor_id)
    .bind(state)
    .bind(base_score)
    .bind(url)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let created = inserted.rows_affected() > 0;

    let edge = load_by_actor_and_target(&mut *conn, actor_id, target_actor_id)
        .await?
        .ok_or_else(|| {
            // The pair is free, so the insert lost on the activity URL.
            AppError::Validation(format!(
                "follow activity {} already belongs to another edge",
                url.unwrap_or("<none>")
            ))
        })?;

    if created {
        rebuild_follow_counts(conn, actor_id, target_actor_id).await?;
    }

    Ok((edge, created))
}

/// Move an edge to `accepted`
///
/// Legal from `pending` and `rejected`; an accepted edge is returned as is.
pub async fn accept(conn: &mut SqliteConnection, edge_id: &str) -> Result<ActorFollow, AppError> {
    let edge = load(&mut *conn, edge_id).await?.ok_or(AppError::NotFound)?;
    if edge.state == FollowState::Accepted {
        return Ok(edge);
    }

    let edge = set_state(conn, &edge, FollowState::Accepted).await?;
    Ok(edge)
}

/// Move a pending edge to `rejected`
pub async fn reject(conn: &mut SqliteConnection, edge_id: &str) -> Result<ActorFollow, AppError> {
    let edge = load(&mut *conn, edge_id).await?.ok_or(AppError::NotFound)?;
    if edge.state != FollowState::Pending {
        return Err(AppError::Validation(format!(
            "cannot reject a follow in state {}",
            edge.state.as_str()
        )));
    }

    let edge = set_state(conn, &edge, FollowState::Rejected).await?;
    Ok(edge)
}

/// Turn a rejected edge back into a request identified by `url`
pub async fn reopen(
    conn: &mut SqliteConnection,
    edge_id: &str,
    url: &str,
    state: FollowState,
) -> Result<ActorFollow, AppError> {
    let edge = load(&mut *conn, edge_id).await?.ok_or(AppError::NotFound)?;
    if edge.state != FollowState::Rejected {
        return Err(AppError::Validation(format!(
            "cannot reopen a follow in state {}",
            edge.state.as_str()
        )));
    }

    let updated = sqlx::query_as::<_, ActorFollow>(
        "UPDATE actor_follows SET state = ?, url = ?, updated_at = ? WHERE id = ? RETURNING *",
    )
    .bind(state)
    .bind(url)
    .bind(Utc::now())
    .bind(&edge.id)
    .fetch_one(&mut *conn)
    .await?;

    rebuild_follow_counts(conn, &edge.actor_id, &edge.target_actor_id).await?;
    Ok(updated)
}

async fn set_state(
    conn: &mut SqliteConnection,
    edge: &ActorFollow,
    state: FollowState,
) -> Result<ActorFollow, AppError> {
    let updated = sqlx::query_as::<_, ActorFollow>(
        "UPDATE actor_follows SET state = ?, updated_at = ? WHERE id = ? RETURNING *",
    )
    .bind(state)
    .bind(Utc::now())
    .bind(&edge.id)
    .fetch_one(&mut *conn)
    .await?;

    rebuild_follow_counts(conn, &edge.actor_id, &edge.target_actor_id).await?;
    Ok(updated)
}

/// Hard-delete an edge
///
/// Returns false if the edge was already gone.
pub async fn remove(conn: &mut SqliteConnection, edge: &ActorFollow) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM actor_follows WHERE id = ?")
        .bind(&edge.id)
        .execute(&mut *conn)
        .await?;

    rebuild_follow_counts(conn, &edge.actor_id, &edge.target_actor_id).await?;
    Ok(result.rows_affected() > 0)
}

/// Delete every edge touching `actor_id`, in both directions
pub async fn remove_follows_of(conn: &mut SqliteConnection, actor_id: &str) -> Result<u64, AppError> {
    let counterparts = sqlx::query_scalar::<_, String>(
        r#"
        SELECT target_actor_id FROM actor_follows WHERE actor_id = ?1
        UNION
        SELECT actor_id FROM actor_follows WHERE target_actor_id = ?1
        "#,
    )
    .bind(actor_id)
    .fetch_all(&mut *conn)
    .await?;

    let result = sqlx::query("DELETE FROM actor_follows WHERE actor_id = ?1 OR target_actor_id = ?1")
        .bind(actor_id)
        .execute(&mut *conn)
        .await?;

    rebuild_counts(conn, actor_id, FollowDirection::Followers).await?;
    rebuild_counts(conn, actor_id, FollowDirection::Following).await?;
    for counterpart in &counterparts {
        rebuild_counts(conn, counterpart, FollowDirection::Followers).await?;
        rebuild_counts(conn, counterpart, FollowDirection::Following).await?;
    }

    Ok(result.rows_affected())
}

// =========================================================================
// Derived counters
// =========================================================================

/// Recompute one counter of `actor_id` from accepted edges
pub async fn rebuild_counts(
    conn: &mut SqliteConnection,
    actor_id: &str,
    direction: FollowDirection,
) -> Result<(), AppError> {
    let sql = match direction {
        FollowDirection::Followers => {
            "UPDATE actors SET followers_count = (SELECT COUNT(*) FROM actor_follows \
             WHERE target_actor_id = ? AND state = 'accepted') WHERE id = ?"
        }
        FollowDirection::Following => {
            "UPDATE actors SET following_count = (SELECT COUNT(*) FROM actor_follows \
             WHERE actor_id = ? AND state = 'accepted') WHERE id = ?"
        }
    };

    sqlx::query(sql)
        .bind(actor_id)
        .bind(actor_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Rebuild the follower's `following_count` and the target's `followers_count`
pub async fn rebuild_follow_counts(
    conn: &mut SqliteConnection,
    actor_id: &str,
    target_actor_id: &str,
) -> Result<(), AppError> {
    rebuild_counts(conn, actor_id, FollowDirection::Following).await?;
    rebuild_counts(conn, target_actor_id, FollowDirection::Followers).await?;
    Ok(())
}

// =========================================================================
// Scores
// =========================================================================

/// Add `delta` to every edge whose follower is reached through `inbox_url`
///
/// The result is clamped to `[floor, max]` in the same statement.
pub async fn update_score_by_inbox<'e, E>(
    executor: E,
    inbox_url: &str,
    delta: i64,
    bounds: ScoreBounds,
) -> Result<u64, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE actor_follows
        SET score = MAX(MIN(score + ?1, ?2), ?3), updated_at = ?4
        WHERE actor_id IN (
            SELECT id FROM actors WHERE inbox_url = ?5 OR shared_inbox_url = ?5
        )
        "#,
    )
    .bind(delta)
    .bind(bounds.max)
    .bind(bounds.floor)
    .bind(Utc::now())
    .bind(inbox_url)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Add `delta` to edges from `follower_actor_id` to actors on `server_ids`
pub async fn update_score_by_following_servers<'e, E>(
    executor: E,
    follower_actor_id: &str,
    server_ids: &[String],
    delta: i64,
    bounds: ScoreBounds,
) -> Result<u64, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    if server_ids.is_empty() {
        return Ok(0);
    }

    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE actor_follows SET score = MAX(MIN(score + ");
    builder.push_bind(delta);
    builder.push(", ");
    builder.push_bind(bounds.max);
    builder.push("), ");
    builder.push_bind(bounds.floor);
    builder.push("), updated_at = ");
    builder.push_bind(Utc::now());
    builder.push(" WHERE actor_id = ");
    builder.push_bind(follower_actor_id.to_string());
    builder.push(" AND target_actor_id IN (SELECT id FROM actors WHERE server_id IN (");
    {
        let mut separated = builder.separated(", ");
        for server_id in server_ids {
            separated.push_bind(server_id.clone());
        }
    }
    builder.push("))");

    let result = builder.build().execute(executor).await?;
    Ok(result.rows_affected())
}

// =========================================================================
// Listings
// =========================================================================

#[derive(Clone, Copy)]
enum Side {
    /// List edges targeting the actors, counterpart is the follower
    Followers,
    /// List edges made by the actor, counterpart is the followed actor
    Following,
}

const FOLLOW_ENTRY_COLUMNS: &str = r#"
    actor_follows.*,
    follower.url AS follower_url,
    follower.preferred_username AS follower_username,
    follower.actor_type AS follower_type,
    follower_server.host AS follower_host,
    following.url AS following_url,
    following.preferred_username AS following_username,
    following.actor_type AS following_type,
    following_server.host AS following_host
"#;

fn push_follow_listing(
    builder: &mut QueryBuilder<'_, Sqlite>,
    side: Side,
    actor_ids: &[String],
    filter: &FollowListFilter,
    search: Option<&str>,
) {
    builder.push(
        r#"
        FROM actor_follows
        JOIN actors AS follower ON follower.id = actor_follows.actor_id
        LEFT JOIN servers AS follower_server ON follower_server.id = follower.server_id
        JOIN actors AS following ON following.id = actor_follows.target_actor_id
        LEFT JOIN servers AS following_server ON following_server.id = following.server_id
        WHERE "#,
    );

    let (own_column, counterpart, counterpart_server) = match side {
        Side::Followers => ("actor_follows.target_actor_id", "follower", "follower_server"),
        Side::Following => ("actor_follows.actor_id", "following", "following_server"),
    };

    builder.push(own_column);
    builder.push(" IN (");
    {
        let mut separated = builder.separated(", ");
        for actor_id in actor_ids {
            separated.push_bind(actor_id.clone());
        }
    }
    builder.push(")");

    if let Some(state) = filter.state {
        builder.push(" AND actor_follows.state = ");
        builder.push_bind(state);
    }

    if let Some(actor_type) = filter.actor_type {
        builder.push(format!(" AND {counterpart}.actor_type = "));
        builder.push_bind(actor_type);
    }

    if let Some(pattern) = search {
        builder.push(format!(" AND (LOWER({counterpart}.preferred_username) LIKE "));
        builder.push_bind(pattern.to_string());
        builder.push(format!(" OR LOWER({counterpart_server}.host) LIKE "));
        builder.push_bind(pattern.to_string());
        builder.push(")");
    }
}

fn push_order(builder: &mut QueryBuilder<'_, Sqlite>, sort: ListSort) {
    builder.push(match sort {
        ListSort::CreatedAtAsc => " ORDER BY actor_follows.created_at ASC, actor_follows.id ASC",
        ListSort::CreatedAtDesc => " ORDER BY actor_follows.created_at DESC, actor_follows.id DESC",
        ListSort::ScoreAsc => " ORDER BY actor_follows.score ASC, actor_follows.id ASC",
        ListSort::ScoreDesc => " ORDER BY actor_follows.score DESC, actor_follows.id DESC",
    });
}

async fn list_for_api(
    pool: &SqlitePool,
    side: Side,
    actor_ids: &[String],
    query: &ListQuery,
    filter: &FollowListFilter,
) -> Result<ResultList<FollowListEntry>, AppError> {
    if actor_ids.is_empty() {
        return Ok(ResultList {
            total: 0,
            data: Vec::new(),
        });
    }

    let search = query.search_pattern();

    let mut count_builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) ");
    push_follow_listing(&mut count_builder, side, actor_ids, filter, search.as_deref());
    let total = count_builder
        .build_query_scalar::<i64>()
        .fetch_one(pool)
        .await?;

    let mut builder = QueryBuilder::<Sqlite>::new("SELECT ");
    builder.push(FOLLOW_ENTRY_COLUMNS);
    push_follow_listing(&mut builder, side, actor_ids, filter, search.as_deref());
    push_order(&mut builder, query.sort);
    builder.push(" LIMIT ");
    builder.push_bind(query.count.max(0));
    builder.push(" OFFSET ");
    builder.push_bind(query.start.max(0));

    let data = builder
        .build_query_as::<FollowListEntry>()
        .fetch_all(pool)
        .await?;

    Ok(ResultList { total, data })
}

/// Edges targeting any of `actor_ids`, one row per follower
pub async fn list_followers_for_api(
    pool: &SqlitePool,
    actor_ids: &[String],
    query: &ListQuery,
    filter: &FollowListFilter,
) -> Result<ResultList<FollowListEntry>, AppError> {
    list_for_api(pool, Side::Followers, actor_ids, query, filter).await
}

/// Edges made by `actor_id`, one row per followed actor
pub async fn list_following_for_api(
    pool: &SqlitePool,
    actor_id: &str,
    query: &ListQuery,
    filter: &FollowListFilter,
) -> Result<ResultList<FollowListEntry>, AppError> {
    let actor_ids = [actor_id.to_string()];
    list_for_api(pool, Side::Following, &actor_ids, query, filter).await
}

/// Distinct delivery inboxes of remote accepted followers of `actor_ids`
///
/// Followers sharing an inbox collapse into one entry.
pub async fn list_accepted_follower_inboxes<'e, E>(
    executor: E,
    actor_ids: &[String],
    start: Option<i64>,
    count: Option<i64>,
) -> Result<Vec<String>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    if actor_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(
        r#"
        SELECT DISTINCT COALESCE(follower.shared_inbox_url, follower.inbox_url) AS inbox
        FROM actor_follows
        JOIN actors AS follower ON follower.id = actor_follows.actor_id
        WHERE actor_follows.state = 'accepted'
          AND follower.server_id IS NOT NULL
          AND actor_follows.target_actor_id IN ("#,
    );
    {
        let mut separated = builder.separated(", ");
        for actor_id in actor_ids {
            separated.push_bind(actor_id.clone());
        }
    }
    builder.push(") ORDER BY inbox ASC");

    if let Some(count) = count {
        builder.push(" LIMIT ");
        builder.push_bind(count.max(0));
        builder.push(" OFFSET ");
        builder.push_bind(start.unwrap_or(0).max(0));
    }

    let inboxes = builder
        .build_query_scalar::<String>()
        .fetch_all(executor)
        .await?;
    Ok(inboxes)
}

/// Accepted instance follows in both directions of the system actor
pub async fn get_stats<'e, E>(executor: E, system_actor_id: &str) -> Result<FollowStats, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (followers, following) = sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN target_actor_id = ?1 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN actor_id = ?1 THEN 1 ELSE 0 END), 0)
        FROM actor_follows
        WHERE state = 'accepted' AND (target_actor_id = ?1 OR actor_id = ?1)
        "#,
    )
    .bind(system_actor_id)
    .fetch_one(executor)
    .await?;

    Ok(FollowStats {
        total_instance_followers: followers,
        total_instance_following: following,
    })
}
