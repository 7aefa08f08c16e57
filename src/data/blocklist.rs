//! Account and server blocklists
//!
//! Existence-only block edges. Predicates take every source account at once
//! and answer in a single query.

use chrono::Utc;
use sqlx::{Executor, QueryBuilder, Sqlite, SqlitePool};

use super::models::*;
use crate::error::AppError;

// =========================================================================
// Mutations
// =========================================================================

/// Insert an account block; an existing block is kept as is
///
/// Returns true if a row was inserted.
pub async fn add_account_block<'e, E>(
    executor: E,
    account_id: &str,
    target_account_id: &str,
) -> Result<bool, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO account_blocklist (id, account_id, target_account_id, created_at) \
         VALUES (?, ?, ?, ?) ON CONFLICT (account_id, target_account_id) DO NOTHING",
    )
    .bind(EntityId::new().0)
    .bind(account_id)
    .bind(target_account_id)
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn remove_account_block<'e, E>(
    executor: E,
    account_id: &str,
    target_account_id: &str,
) -> Result<bool, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "DELETE FROM account_blocklist WHERE account_id = ? AND target_account_id = ?",
    )
    .bind(account_id)
    .bind(target_account_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Insert a server block; an existing block is kept as is
pub async fn add_server_block<'e, E>(
    executor: E,
    account_id: &str,
    target_server_id: &str,
) -> Result<bool, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO server_blocklist (id, account_id, target_server_id, created_at) \
         VALUES (?, ?, ?, ?) ON CONFLICT (account_id, target_server_id) DO NOTHING",
    )
    .bind(EntityId::new().0)
    .bind(account_id)
    .bind(target_server_id)
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn remove_server_block<'e, E>(
    executor: E,
    account_id: &str,
    target_server_id: &str,
) -> Result<bool, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result =
        sqlx::query("DELETE FROM server_blocklist WHERE account_id = ? AND target_server_id = ?")
            .bind(account_id)
            .bind(target_server_id)
            .execute(executor)
            .await?;
    Ok(result.rows_affected() > 0)
}

// =========================================================================
// Predicates
// =========================================================================

fn push_ids(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[String]) {
    builder.push("(");
    {
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.clone());
        }
    }
    builder.push(")");
}

/// Whether any of `source_account_ids` blocks the target account directly
/// or blocks the server hosting it
pub async fn is_blocked_by_server_or_account<'e, E>(
    executor: E,
    source_account_ids: &[String],
    target_account_id: &str,
) -> Result<bool, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    if source_account_ids.is_empty() {
        return Ok(false);
    }

    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT EXISTS (SELECT 1 FROM account_blocklist WHERE account_blocklist.target_account_id = ",
    );
    builder.push_bind(target_account_id.to_string());
    builder.push(" AND account_blocklist.account_id IN ");
    push_ids(&mut builder, source_account_ids);
    builder.push(
        r#") OR EXISTS (
            SELECT 1 FROM server_blocklist
            JOIN actors ON actors.server_id = server_blocklist.target_server_id
            JOIN accounts ON accounts.actor_id = actors.id
            WHERE accounts.id = "#,
    );
    builder.push_bind(target_account_id.to_string());
    builder.push(" AND server_blocklist.account_id IN ");
    push_ids(&mut builder, source_account_ids);
    builder.push(")");

    let blocked = builder
        .build_query_scalar::<i64>()
        .fetch_one(executor)
        .await?;
    Ok(blocked != 0)
}

/// Whether any of `source_account_ids` blocks `server_id`
pub async fn is_server_blocked_by<'e, E>(
    executor: E,
    server_id: &str,
    source_account_ids: &[String],
) -> Result<bool, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    if source_account_ids.is_empty() {
        return Ok(false);
    }

    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT EXISTS (SELECT 1 FROM server_blocklist WHERE target_server_id = ",
    );
    builder.push_bind(server_id.to_string());
    builder.push(" AND account_id IN ");
    push_ids(&mut builder, source_account_ids);
    builder.push(")");

    let blocked = builder
        .build_query_scalar::<i64>()
        .fetch_one(executor)
        .await?;
    Ok(blocked != 0)
}

/// Subset of `target_account_ids` blocked directly by any source account
pub async fn blocked_account_ids<'e, E>(
    executor: E,
    source_account_ids: &[String],
    target_account_ids: &[String],
) -> Result<Vec<String>, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    if source_account_ids.is_empty() || target_account_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT DISTINCT target_account_id FROM account_blocklist WHERE account_id IN ",
    );
    push_ids(&mut builder, source_account_ids);
    builder.push(" AND target_account_id IN ");
    push_ids(&mut builder, target_account_ids);

    let ids = builder
        .build_query_scalar::<String>()
        .fetch_all(executor)
        .await?;
    Ok(ids)
}

// =========================================================================
// Listings
// =========================================================================

fn push_block_order(builder: &mut QueryBuilder<'_, Sqlite>, table: &str, sort: ListSort) {
    let direction = match sort {
        ListSort::CreatedAtAsc | ListSort::ScoreAsc => "ASC",
        ListSort::CreatedAtDesc | ListSort::ScoreDesc => "DESC",
    };
    builder.push(format!(
        " ORDER BY {table}.created_at {direction}, {table}.id {direction}"
    ));
}

fn push_account_block_listing(
    builder: &mut QueryBuilder<'_, Sqlite>,
    account_id: &str,
    search: Option<&str>,
) {
    builder.push(
        r#"
        FROM account_blocklist
        JOIN accounts AS target ON target.id = account_blocklist.target_account_id
        JOIN actors AS target_actor ON target_actor.id = target.actor_id
        LEFT JOIN servers AS target_server ON target_server.id = target_actor.server_id
        WHERE account_blocklist.account_id = "#,
    );
    builder.push_bind(account_id.to_string());

    if let Some(pattern) = search {
        builder.push(" AND (LOWER(target.name) LIKE ");
        builder.push_bind(pattern.to_string());
        builder.push(" OR LOWER(target_actor.preferred_username) LIKE ");
        builder.push_bind(pattern.to_string());
        builder.push(" OR LOWER(target_server.host) LIKE ");
        builder.push_bind(pattern.to_string());
        builder.push(")");
    }
}

/// Accounts blocked by `account_id`
pub async fn list_account_blocks_for_api(
    pool: &SqlitePool,
    account_id: &str,
    query: &ListQuery,
) -> Result<ResultList<AccountBlockEntry>, AppError> {
    let search = query.search_pattern();

    let mut count_builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) ");
    push_account_block_listing(&mut count_builder, account_id, search.as_deref());
    let total = count_builder
        .build_query_scalar::<i64>()
        .fetch_one(pool)
        .await?;

    let mut builder = QueryBuilder::<Sqlite>::new(
        r#"SELECT account_blocklist.*,
            target.name AS target_account_name,
            target_actor.url AS target_actor_url,
            target_server.host AS target_host "#,
    );
    push_account_block_listing(&mut builder, account_id, search.as_deref());
    push_block_order(&mut builder, "account_blocklist", query.sort);
    builder.push(" LIMIT ");
    builder.push_bind(query.count.max(0));
    builder.push(" OFFSET ");
    builder.push_bind(query.start.max(0));

    let data = builder
        .build_query_as::<AccountBlockEntry>()
        .fetch_all(pool)
        .await?;

    Ok(ResultList { total, data })
}

fn push_server_block_listing(
    builder: &mut QueryBuilder<'_, Sqlite>,
    account_id: &str,
    search: Option<&str>,
) {
    builder.push(
        r#"
        FROM server_blocklist
        JOIN servers ON servers.id = server_blocklist.target_server_id
        WHERE server_blocklist.account_id = "#,
    );
    builder.push_bind(account_id.to_string());

    if let Some(pattern) = search {
        builder.push(" AND LOWER(servers.host) LIKE ");
        builder.push_bind(pattern.to_string());
    }
}

/// Servers blocked by `account_id`
pub async fn list_server_blocks_for_api(
    pool: &SqlitePool,
    account_id: &str,
    query: &ListQuery,
) -> Result<ResultList<ServerBlockEntry>, AppError> {
    let search = query.search_pattern();

    let mut count_builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) ");
    push_server_block_listing(&mut count_builder, account_id, search.as_deref());
    let total = count_builder
        .build_query_scalar::<i64>()
        .fetch_one(pool)
        .await?;

    let mut builder = QueryBuilder::<Sqlite>::new("SELECT server_blocklist.*, servers.host AS host ");
    push_server_block_listing(&mut builder, account_id, search.as_deref());
    push_block_order(&mut builder, "server_blocklist", query.sort);
    builder.push(" LIMIT ");
    builder.push_bind(query.count.max(0));
    builder.push(" OFFSET ");
    builder.push_bind(query.start.max(0));

    let data = builder
        .build_query_as::<ServerBlockEntry>()
        .fetch_all(pool)
        .await?;

    Ok(ResultList { total, data })
}
