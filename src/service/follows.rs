//! Follow service
//!
//! Follow operations initiated on this instance: following remote actors,
//! moderating incoming follows and listing both directions. Every change
//! that peers must learn about queues its activity in the same transaction.

use std::sync::Arc;

use crate::config::ScoreConfig;
use crate::data::{
    directory, follows, Actor, ActorFollow, Database, FollowListEntry, FollowListFilter,
    FollowState, ListQuery, ResultList,
};
use crate::data::follows::FollowStats;
use crate::error::AppError;
use crate::federation::{
    build_accept, build_follow, build_reject, build_undo, fanout, BoundedResolver, InstanceContext,
};

/// Follow service
pub struct FollowService {
    db: Arc<Database>,
    resolver: BoundedResolver,
    score: ScoreConfig,
}

impl FollowService {
    /// Create new follow service
    pub fn new(db: Arc<Database>, resolver: BoundedResolver, score: ScoreConfig) -> Self {
        Self {
            db,
            resolver,
            score,
        }
    }

    async fn load_edge(&self, edge_id: &str) -> Result<(ActorFollow, Actor, Actor), AppError> {
        let edge = follows::load(self.db.pool(), edge_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let follower = directory::get_actor(self.db.pool(), &edge.actor_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let target = directory::get_actor(self.db.pool(), &edge.target_actor_id)
            .await?
            .ok_or(AppError::NotFound)?;
        Ok((edge, follower, target))
    }

    /// Make local `follower` follow the actor at `target_url`
    ///
    /// Remote targets get a pending edge and a queued Follow; local targets
    /// are accepted at once. An edge the target rejected is requested again;
    /// any other existing edge is returned unchanged.
    pub async fn follow(&self, follower: &Actor, target_url: &str) -> Result<ActorFollow, AppError> {
        if !follower.is_local() {
            return Err(AppError::Validation("only local actors can follow from here".into()));
        }

        let target = self
            .resolver
            .actor(target_url)
            .await?
            .ok_or(AppError::NotFound)?;

        let state = if target.is_local() {
            FollowState::Accepted
        } else {
            FollowState::Pending
        };
        let follow_url = format!(
            "{}/follows/{}",
            follower.url,
            ulid::Ulid::new().to_string().to_lowercase()
        );

        let base_score = self.score.base;
        let follow_url = follow_url.as_str();
        let target = &target;

        let (edge, requested) = self
            .db
            .transaction("local_follow", |mut tx| async move {
                let (mut edge, created) = follows::find_or_create(
                    &mut tx,
                    &follower.id,
                    &target.id,
                    Some(follow_url),
                    state,
                    base_score,
                )
                .await?;

                let reopened = !created && edge.state == FollowState::Rejected;
                if reopened {
                    edge = follows::reopen(&mut tx, &edge.id, follow_url, state).await?;
                }

                if created || reopened {
                    let follow = build_follow(follow_url, &follower.url, &target.url);
                    fanout::send_to_actor(&mut tx, &follow, target).await?;
                }
                Ok((tx, (edge, created || reopened)))
            })
            .await?;

        if requested {
            tracing::info!(
                edge_id = %edge.id,
                actor = %follower.url,
                object = %target.url,
                state = edge.state.as_str(),
                "Follow requested"
            );
        }
        Ok(edge)
    }

    /// Stop `follower` following the actor at `target_url`
    ///
    /// Returns false when there was nothing to undo.
    pub async fn unfollow(
        &self,
        ctx: &InstanceContext,
        follower: &Actor,
        target_url: &str,
    ) -> Result<bool, AppError> {
        let Some(target) = directory::get_actor_by_url(self.db.pool(), target_url).await? else {
            return Ok(false);
        };

        let target = &target;
        let removed = self
            .db
            .transaction("local_unfollow", |mut tx| async move {
                let Some(edge) =
                    follows::load_by_actor_and_target(&mut *tx, &follower.id, &target.id).await?
                else {
                    return Ok((tx, false));
                };

                let undo_id = match &edge.url {
                    Some(url) => format!("{url}/undo"),
                    None => ctx.activity_url("undo"),
                };
                let follow_id = edge.url.clone().unwrap_or_else(|| ctx.activity_url("follow"));
                let undo = build_undo(
                    &undo_id,
                    &follower.url,
                    build_follow(&follow_id, &follower.url, &target.url),
                );
                fanout::send_to_actor(&mut tx, &undo, target).await?;

                let removed = follows::remove(&mut tx, &edge).await?;
                Ok((tx, removed))
            })
            .await?;

        if removed {
            tracing::info!(actor = %follower.url, object = %target.url, "Unfollowed");
        }
        Ok(removed)
    }

    /// Accept a pending or rejected follow of a local actor
    pub async fn accept_follower(
        &self,
        ctx: &InstanceContext,
        edge_id: &str,
    ) -> Result<ActorFollow, AppError> {
        let (edge, follower, target) = self.load_edge(edge_id).await?;
        if !target.is_local() {
            return Err(AppError::Forbidden);
        }

        let (edge, follower, target) = (&edge, &follower, &target);
        let accepted = self
            .db
            .transaction("accept_follower", |mut tx| async move {
                let accepted = follows::accept(&mut tx, &edge.id).await?;
                if edge.state != FollowState::Accepted {
                    let accept = build_accept(
                        &ctx.activity_url("accept"),
                        edge.url.as_deref(),
                        &follower.url,
                        &target.url,
                    );
                    fanout::send_to_actor(&mut tx, &accept, follower).await?;
                }
                Ok((tx, accepted))
            })
            .await?;

        tracing::info!(edge_id = %accepted.id, actor = %follower.url, object = %target.url, "Follower accepted");
        Ok(accepted)
    }

    /// Reject a pending follow of a local actor
    pub async fn reject_follower(
        &self,
        ctx: &InstanceContext,
        edge_id: &str,
    ) -> Result<ActorFollow, AppError> {
        let (edge, follower, target) = self.load_edge(edge_id).await?;
        if !target.is_local() {
            return Err(AppError::Forbidden);
        }

        let (edge, follower, target) = (&edge, &follower, &target);
        let rejected = self
            .db
            .transaction("reject_follower", |mut tx| async move {
                let rejected = follows::reject(&mut tx, &edge.id).await?;
                let reject = build_reject(
                    &ctx.activity_url("reject"),
                    edge.url.as_deref(),
                    &follower.url,
                    &target.url,
                );
                fanout::send_to_actor(&mut tx, &reject, follower).await?;
                Ok((tx, rejected))
            })
            .await?;

        tracing::info!(edge_id = %rejected.id, actor = %follower.url, object = %target.url, "Follower rejected");
        Ok(rejected)
    }

    /// Drop a follower of a local actor and tell it with a Reject
    pub async fn remove_follower(&self, ctx: &InstanceContext, edge_id: &str) -> Result<bool, AppError> {
        let (edge, follower, target) = self.load_edge(edge_id).await?;
        if !target.is_local() {
            return Err(AppError::Forbidden);
        }

        let (edge, follower, target) = (&edge, &follower, &target);
        let removed = self
            .db
            .transaction("remove_follower", |mut tx| async move {
                let reject = build_reject(
                    &ctx.activity_url("reject"),
                    edge.url.as_deref(),
                    &follower.url,
                    &target.url,
                );
                fanout::send_to_actor(&mut tx, &reject, follower).await?;
                let removed = follows::remove(&mut tx, edge).await?;
                Ok((tx, removed))
            })
            .await?;

        tracing::info!(edge_id = %edge.id, actor = %follower.url, object = %target.url, "Follower removed");
        Ok(removed)
    }

    pub async fn list_followers(
        &self,
        actor_ids: &[String],
        query: &ListQuery,
        filter: &FollowListFilter,
    ) -> Result<ResultList<FollowListEntry>, AppError> {
        follows::list_followers_for_api(self.db.pool(), actor_ids, query, filter).await
    }

    pub async fn list_following(
        &self,
        actor_id: &str,
        query: &ListQuery,
        filter: &FollowListFilter,
    ) -> Result<ResultList<FollowListEntry>, AppError> {
        follows::list_following_for_api(self.db.pool(), actor_id, query, filter).await
    }

    /// Delivery inboxes of the accepted remote followers of `actor_ids`
    pub async fn follower_inboxes(
        &self,
        actor_ids: &[String],
        start: Option<i64>,
        count: Option<i64>,
    ) -> Result<Vec<String>, AppError> {
        follows::list_accepted_follower_inboxes(self.db.pool(), actor_ids, start, count).await
    }

    /// Instance-level follow totals
    pub async fn stats(&self, ctx: &InstanceContext) -> Result<FollowStats, AppError> {
        follows::get_stats(self.db.pool(), &ctx.system_actor.id).await
    }
}
