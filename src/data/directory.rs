//! Servers, actors, accounts, channels and videos
//!
//! Plain lookups and upserts for the entities the federation core references.
//! Single-statement functions are generic over the executor so they run
//! against the pool or inside an open transaction.

use chrono::Utc;
use sqlx::{Executor, Sqlite, SqliteConnection};

use super::models::*;
use crate::error::AppError;

/// Input for creating or refreshing an actor
#[derive(Debug, Clone)]
pub struct NewActor {
    pub actor_type: ActorType,
    pub preferred_username: String,
    pub url: String,
    pub inbox_url: String,
    pub shared_inbox_url: Option<String>,
    pub public_key_pem: Option<String>,
    pub server_id: Option<String>,
}

// =========================================================================
// Servers
// =========================================================================

/// Get or insert the server row for `host`
pub async fn find_or_create_server(
    conn: &mut SqliteConnection,
    host: &str,
) -> Result<Server, AppError> {
    let host = host.to_ascii_lowercase();

    sqlx::query(
        "INSERT INTO servers (id, host, redundancy_allowed, created_at) VALUES (?, ?, 0, ?) \
         ON CONFLICT (host) DO NOTHING",
    )
    .bind(EntityId::new().0)
    .bind(&host)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    let server = sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE host = ?")
        .bind(&host)
        .fetch_one(&mut *conn)
        .await?;

    Ok(server)
}

pub async fn get_server<'e, E>(executor: E, id: &str) -> Result<Option<Server>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let server = sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(server)
}

pub async fn get_server_by_host<'e, E>(executor: E, host: &str) -> Result<Option<Server>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let server = sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE host = ?")
        .bind(host.to_ascii_lowercase())
        .fetch_optional(executor)
        .await?;
    Ok(server)
}

/// Allow or refuse cache-file offers from a server
pub async fn set_redundancy_allowed<'e, E>(
    executor: E,
    server_id: &str,
    allowed: bool,
) -> Result<bool, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE servers SET redundancy_allowed = ? WHERE id = ?")
        .bind(allowed)
        .bind(server_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

// =========================================================================
// Actors
// =========================================================================

/// Insert an actor, or refresh its mutable fields if the URL is known
///
/// Follower/following counts are never touched here.
pub async fn upsert_actor(
    conn: &mut SqliteConnection,
    actor: &NewActor,
) -> Result<Actor, AppError> {
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO actors (
            id, actor_type, preferred_username, url, inbox_url, shared_inbox_url,
            public_key_pem, followers_count, following_count, server_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?, ?)
        ON CONFLICT (url) DO UPDATE SET
            preferred_username = excluded.preferred_username,
            inbox_url = excluded.inbox_url,
            shared_inbox_url = excluded.shared_inbox_url,
            public_key_pem = COALESCE(excluded.public_key_pem, actors.public_key_pem),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(EntityId::new().0)
    .bind(actor.actor_type)
    .bind(&actor.preferred_username)
    .bind(&actor.url)
    .bind(&actor.inbox_url)
    .bind(&actor.shared_inbox_url)
    .bind(&actor.public_key_pem)
    .bind(&actor.server_id)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let stored = sqlx::query_as::<_, Actor>("SELECT * FROM actors WHERE url = ?")
        .bind(&actor.url)
        .fetch_one(&mut *conn)
        .await?;

    Ok(stored)
}

pub async fn get_actor<'e, E>(executor: E, id: &str) -> Result<Option<Actor>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let actor = sqlx::query_as::<_, Actor>("SELECT * FROM actors WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(actor)
}

pub async fn get_actor_by_url<'e, E>(executor: E, url: &str) -> Result<Option<Actor>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let actor = sqlx::query_as::<_, Actor>("SELECT * FROM actors WHERE url = ?")
        .bind(url)
        .fetch_optional(executor)
        .await?;
    Ok(actor)
}

/// Local actor by preferred username
pub async fn get_local_actor_by_name<'e, E>(
    executor: E,
    preferred_username: &str,
) -> Result<Option<Actor>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let actor = sqlx::query_as::<_, Actor>(
        "SELECT * FROM actors WHERE preferred_username = ? AND server_id IS NULL",
    )
    .bind(preferred_username)
    .fetch_optional(executor)
    .await?;
    Ok(actor)
}

// =========================================================================
// Accounts and channels
// =========================================================================

/// Get or insert the account attached to an actor
pub async fn find_or_create_account(
    conn: &mut SqliteConnection,
    actor_id: &str,
    name: &str,
) -> Result<Account, AppError> {
    sqlx::query(
        "INSERT INTO accounts (id, name, actor_id, created_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT (actor_id) DO NOTHING",
    )
    .bind(EntityId::new().0)
    .bind(name)
    .bind(actor_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE actor_id = ?")
        .bind(actor_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(account)
}

pub async fn get_account<'e, E>(executor: E, id: &str) -> Result<Option<Account>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(account)
}

pub async fn get_account_by_actor<'e, E>(
    executor: E,
    actor_id: &str,
) -> Result<Option<Account>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE actor_id = ?")
        .bind(actor_id)
        .fetch_optional(executor)
        .await?;
    Ok(account)
}

/// Account speaking for an actor
///
/// A channel actor resolves to the account owning the channel.
pub async fn get_owning_account<'e, E>(
    executor: E,
    actor_id: &str,
) -> Result<Option<Account>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let account = sqlx::query_as::<_, Account>(
        r#"
        SELECT accounts.* FROM accounts WHERE accounts.actor_id = ?1
        UNION ALL
        SELECT accounts.* FROM accounts
        JOIN video_channels ON video_channels.account_id = accounts.id
        WHERE video_channels.actor_id = ?1
        LIMIT 1
        "#,
    )
    .bind(actor_id)
    .fetch_optional(executor)
    .await?;
    Ok(account)
}

/// Insert a channel owned by `account_id`
pub async fn create_channel<'e, E>(
    executor: E,
    actor_id: &str,
    account_id: &str,
    name: &str,
) -> Result<VideoChannel, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let channel = sqlx::query_as::<_, VideoChannel>(
        "INSERT INTO video_channels (id, name, actor_id, account_id, created_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(EntityId::new().0)
    .bind(name)
    .bind(actor_id)
    .bind(account_id)
    .bind(Utc::now())
    .fetch_one(executor)
    .await?;
    Ok(channel)
}

pub async fn get_channel<'e, E>(executor: E, id: &str) -> Result<Option<VideoChannel>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let channel = sqlx::query_as::<_, VideoChannel>("SELECT * FROM video_channels WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(channel)
}

// =========================================================================
// Videos
// =========================================================================

/// Insert a video
pub async fn create_video<'e, E>(
    executor: E,
    channel_id: &str,
    name: &str,
    url: &str,
    remote: bool,
) -> Result<Video, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = Utc::now();
    let video = sqlx::query_as::<_, Video>(
        r#"
        INSERT INTO videos (id, uuid, name, url, channel_id, remote, likes, dislikes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
        RETURNING *
        "#,
    )
    .bind(EntityId::new().0)
    .bind(ulid::Ulid::new().to_string().to_lowercase())
    .bind(name)
    .bind(url)
    .bind(channel_id)
    .bind(remote)
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await?;
    Ok(video)
}

pub async fn get_video<'e, E>(executor: E, id: &str) -> Result<Option<Video>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let video = sqlx::query_as::<_, Video>("SELECT * FROM videos WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(video)
}

pub async fn get_video_by_url<'e, E>(executor: E, url: &str) -> Result<Option<Video>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let video = sqlx::query_as::<_, Video>("SELECT * FROM videos WHERE url = ?")
        .bind(url)
        .fetch_optional(executor)
        .await?;
    Ok(video)
}

/// Channel actor and owner account actor of a video
pub async fn get_video_publishers<'e, E>(
    executor: E,
    video_id: &str,
) -> Result<Option<(Actor, Actor)>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, Actor>(
        r#"
        SELECT actors.*, 0 AS publisher_rank FROM actors
        JOIN video_channels ON video_channels.actor_id = actors.id
        JOIN videos ON videos.channel_id = video_channels.id
        WHERE videos.id = ?1
        UNION ALL
        SELECT actors.*, 1 AS publisher_rank FROM actors
        JOIN accounts ON accounts.actor_id = actors.id
        JOIN video_channels ON video_channels.account_id = accounts.id
        JOIN videos ON videos.channel_id = video_channels.id
        WHERE videos.id = ?1
        ORDER BY publisher_rank
        "#,
    )
    .bind(video_id)
    .fetch_all(executor)
    .await?;

    let mut rows = rows.into_iter();
    match (rows.next(), rows.next()) {
        (Some(channel), Some(owner)) => Ok(Some((channel, owner))),
        _ => Ok(None),
    }
}
