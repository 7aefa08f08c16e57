//! Blocklist service
//!
//! Account- and server-level blocks, and the visibility predicate built on
//! them. The instance's system account always participates as a blocker.

use std::sync::Arc;

use crate::data::{
    blocklist, directory, AccountBlockEntry, Database, ListQuery, ResultList, ServerBlockEntry,
};
use crate::error::AppError;
use crate::federation::{authority_of, InstanceContext};

/// Blocklist service
pub struct BlocklistService {
    db: Arc<Database>,
}

impl BlocklistService {
    /// Create new blocklist service
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Whether `target_account_id` is hidden from `viewer_account_id`
    ///
    /// True when the system account or the viewer blocks the target account
    /// or the server hosting it. One query covers every source.
    pub async fn is_blocked_by_server_or_account(
        &self,
        ctx: &InstanceContext,
        target_account_id: &str,
        viewer_account_id: Option<&str>,
    ) -> Result<bool, AppError> {
        let mut sources = vec![ctx.system_account.id.clone()];
        if let Some(viewer) = viewer_account_id {
            if viewer != ctx.system_account.id {
                sources.push(viewer.to_string());
            }
        }

        let blocked =
            blocklist::is_blocked_by_server_or_account(self.db.pool(), &sources, target_account_id)
                .await?;

        let label = if blocked { "blocked" } else { "allowed" };
        crate::metrics::BLOCKLIST_CHECKS_TOTAL
            .with_label_values(&[label])
            .inc();
        Ok(blocked)
    }

    /// Subset of `target_account_ids` directly blocked by the system account
    /// or the viewer
    pub async fn blocked_among(
        &self,
        ctx: &InstanceContext,
        target_account_ids: &[String],
        viewer_account_id: Option<&str>,
    ) -> Result<Vec<String>, AppError> {
        let mut sources = vec![ctx.system_account.id.clone()];
        if let Some(viewer) = viewer_account_id {
            sources.push(viewer.to_string());
        }
        blocklist::blocked_account_ids(self.db.pool(), &sources, target_account_ids).await
    }

    // =========================================================================
    // Account blocks
    // =========================================================================

    pub async fn list_account_blocks(
        &self,
        account_id: &str,
        query: &ListQuery,
    ) -> Result<ResultList<AccountBlockEntry>, AppError> {
        blocklist::list_account_blocks_for_api(self.db.pool(), account_id, query).await
    }

    /// Block `target_account_id` on behalf of `by_account_id`
    ///
    /// Blocking an already blocked account succeeds without change.
    pub async fn add_account_block(
        &self,
        by_account_id: &str,
        target_account_id: &str,
    ) -> Result<bool, AppError> {
        if by_account_id == target_account_id {
            return Err(AppError::Validation("an account cannot block itself".into()));
        }

        if directory::get_account(self.db.pool(), target_account_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound);
        }

        let inserted = self
            .db
            .transaction("add_account_block", |mut tx| async move {
                let inserted =
                    blocklist::add_account_block(&mut *tx, by_account_id, target_account_id).await?;
                Ok((tx, inserted))
            })
            .await?;

        if inserted {
            tracing::info!(account = %by_account_id, target = %target_account_id, "Account blocked");
        }
        Ok(inserted)
    }

    pub async fn remove_account_block(
        &self,
        by_account_id: &str,
        target_account_id: &str,
    ) -> Result<bool, AppError> {
        let removed = self
            .db
            .transaction("remove_account_block", |mut tx| async move {
                let removed =
                    blocklist::remove_account_block(&mut *tx, by_account_id, target_account_id)
                        .await?;
                Ok((tx, removed))
            })
            .await?;

        if removed {
            tracing::info!(account = %by_account_id, target = %target_account_id, "Account unblocked");
        }
        Ok(removed)
    }

    // =========================================================================
    // Server blocks
    // =========================================================================

    pub async fn list_server_blocks(
        &self,
        account_id: &str,
        query: &ListQuery,
    ) -> Result<ResultList<ServerBlockEntry>, AppError> {
        blocklist::list_server_blocks_for_api(self.db.pool(), account_id, query).await
    }

    /// Block every actor hosted on `host`
    ///
    /// Unknown hosts get a server row so the block applies to actors seen
    /// later. The local instance cannot be blocked.
    pub async fn add_server_block(
        &self,
        ctx: &InstanceContext,
        by_account_id: &str,
        host: &str,
    ) -> Result<bool, AppError> {
        let host = host.trim().to_ascii_lowercase();
        if host.is_empty() {
            return Err(AppError::Validation("server host cannot be empty".into()));
        }
        if authority_of(&ctx.base_url).as_deref() == Some(host.as_str()) {
            return Err(AppError::Validation("the local instance cannot be blocked".into()));
        }

        let host = host.as_str();
        let inserted = self
            .db
            .transaction("add_server_block", |mut tx| async move {
                let server = directory::find_or_create_server(&mut tx, host).await?;
                let inserted =
                    blocklist::add_server_block(&mut *tx, by_account_id, &server.id).await?;
                Ok((tx, inserted))
            })
            .await?;

        if inserted {
            tracing::info!(account = %by_account_id, server = %host, "Server blocked");
        }
        Ok(inserted)
    }

    pub async fn remove_server_block(&self, by_account_id: &str, host: &str) -> Result<bool, AppError> {
        let host = host.trim().to_ascii_lowercase();
        let Some(server) = directory::get_server_by_host(self.db.pool(), &host).await? else {
            return Ok(false);
        };

        let server_id = server.id.as_str();
        let removed = self
            .db
            .transaction("remove_server_block", |mut tx| async move {
                let removed =
                    blocklist::remove_server_block(&mut *tx, by_account_id, server_id).await?;
                Ok((tx, removed))
            })
            .await?;

        if removed {
            tracing::info!(account = %by_account_id, server = %host, "Server unblocked");
        }
        Ok(removed)
    }
}
