//! Inbox processing
//!
//! Applies inbound activities from verified senders: follows and their
//! answers, rates, shares and cache-file offers. Undo is handed to
//! [`UndoProcessor`].

use std::sync::Arc;
use std::time::Instant;

use crate::config::ScoreConfig;
use crate::data::{
    blocklist, directory, follows, objects, Actor, ActorFollow, Database, FollowState, RateType,
};
use crate::error::AppError;

use super::activity::{
    build_accept, build_video_update, Activity, Announce, CacheFile, CreateObject, Follow,
    FollowReference, FollowResponse, Rate,
};
use super::context::InstanceContext;
use super::fanout;
use super::outcome::{ActivityOutcome, SkipReason};
use super::resolver::BoundedResolver;
use super::undo::UndoProcessor;

/// Activity processor
///
/// Processes incoming ActivityPub activities from the inbox.
pub struct ActivityProcessor {
    db: Arc<Database>,
    resolver: BoundedResolver,
    undo: UndoProcessor,
    score: ScoreConfig,
    /// Accept follows of the instance actor without moderation
    auto_accept_instance_follows: bool,
}

impl ActivityProcessor {
    pub fn new(
        db: Arc<Database>,
        resolver: BoundedResolver,
        score: ScoreConfig,
        auto_accept_instance_follows: bool,
    ) -> Self {
        Self {
            undo: UndoProcessor::new(db.clone(), resolver.clone()),
            db,
            resolver,
            score,
            auto_accept_instance_follows,
        }
    }

    /// Process an incoming activity
    ///
    /// # Arguments
    /// * `raw` - Activity JSON as received
    /// * `sender` - Actor whose signature was verified
    ///
    /// # Returns
    /// The outcome when processed, an error when rejected or failed
    pub async fn process(
        &self,
        ctx: &InstanceContext,
        raw: &serde_json::Value,
        sender: &Actor,
    ) -> Result<ActivityOutcome, AppError> {
        let started = Instant::now();
        let activity = Activity::parse(raw)?;
        let kind = activity.kind();

        let result = self.dispatch(ctx, &activity, raw, sender).await;
        crate::metrics::observe_activity(kind, started.elapsed());

        match &result {
            Ok(outcome) => tracing::debug!(
                actor = %sender.url,
                activity_type = kind,
                outcome = outcome.label(),
                "Processed activity"
            ),
            Err(error) => tracing::warn!(
                actor = %sender.url,
                activity_type = kind,
                error = %error,
                "Activity rejected"
            ),
        }
        result
    }

    async fn dispatch(
        &self,
        ctx: &InstanceContext,
        activity: &Activity,
        raw: &serde_json::Value,
        sender: &Actor,
    ) -> Result<ActivityOutcome, AppError> {
        if let Some(actor_url) = activity.actor() {
            if actor_url != sender.url {
                return Err(AppError::AuthorizationViolation(format!(
                    "activity by {} was delivered by {}",
                    actor_url, sender.url
                )));
            }
        }

        self.ensure_not_blocked(ctx, sender).await?;

        match activity {
            Activity::Follow(follow) => self.handle_follow(ctx, follow, sender).await,
            Activity::Accept(response) => self.handle_accept(response, sender).await,
            Activity::Reject(response) => self.handle_reject(response, sender).await,
            Activity::Like(rate) => self.handle_rate(ctx, RateType::Like, rate, sender).await,
            Activity::Dislike(rate) => {
                self.handle_rate(ctx, RateType::Dislike, rate, sender)
                    .await
            }
            Activity::Announce(announce) => self.handle_announce(announce, raw, sender).await,
            Activity::Create(create) => match &create.object {
                CreateObject::CacheFile(cache_file) => {
                    self.handle_cache_file(cache_file, raw, sender).await
                }
                CreateObject::Unknown => Ok(unsupported(activity.kind(), sender)),
            },
            Activity::Undo(undo) => self.undo.process(ctx, undo, raw, sender).await,
            Activity::Unknown => Ok(unsupported(activity.kind(), sender)),
        }
    }

    /// Reject senders blocked by the instance, directly or through their server
    async fn ensure_not_blocked(&self, ctx: &InstanceContext, sender: &Actor) -> Result<(), AppError> {
        let sources = [ctx.system_account.id.clone()];

        let blocked = match &sender.server_id {
            Some(server_id) => {
                blocklist::is_server_blocked_by(self.db.pool(), server_id, &sources).await?
            }
            None => false,
        };

        let blocked = blocked
            || match directory::get_owning_account(self.db.pool(), &sender.id).await? {
                Some(account) => {
                    blocklist::is_blocked_by_server_or_account(self.db.pool(), &sources, &account.id)
                        .await?
                }
                None => false,
            };

        let label = if blocked { "blocked" } else { "allowed" };
        crate::metrics::BLOCKLIST_CHECKS_TOTAL
            .with_label_values(&[label])
            .inc();

        if blocked {
            tracing::info!(actor = %sender.url, "Dropping activity from blocked sender");
            return Err(AppError::Forbidden);
        }
        Ok(())
    }

    // =========================================================================
    // Follow / Accept / Reject
    // =========================================================================

    async fn handle_follow(
        &self,
        ctx: &InstanceContext,
        follow: &Follow,
        sender: &Actor,
    ) -> Result<ActivityOutcome, AppError> {
        let target_url = follow.object.id();
        let Some(target) = self.resolver.actor(target_url).await? else {
            tracing::warn!(actor = %sender.url, object = %target_url, "Follow of unknown actor");
            return Ok(ActivityOutcome::Skipped(SkipReason::UnknownObject));
        };

        if !target.is_local() {
            tracing::warn!(actor = %sender.url, object = %target.url, "Follow of a remote actor");
            return Ok(ActivityOutcome::Skipped(SkipReason::NotForThisInstance));
        }

        let state = if target.id != ctx.system_actor.id || self.auto_accept_instance_follows {
            FollowState::Accepted
        } else {
            FollowState::Pending
        };

        let base_score = self.score.base;
        let follow_url = follow.id.as_deref();
        let target = &target;

        let (edge, changed) = self
            .db
            .transaction("inbox_follow", |mut tx| async move {
                let (edge, created) = follows::find_or_create(
                    &mut tx,
                    &sender.id,
                    &target.id,
                    follow_url,
                    state,
                    base_score,
                )
                .await?;

                let (edge, changed) =
                    if state == FollowState::Accepted && edge.state != FollowState::Accepted {
                        (follows::accept(&mut tx, &edge.id).await?, true)
                    } else {
                        (edge, created)
                    };

                if edge.state == FollowState::Accepted {
                    let accept = build_accept(
                        &ctx.activity_url("accept"),
                        edge.url.as_deref().or(follow_url),
                        &sender.url,
                        &target.url,
                    );
                    fanout::send_to_actor(&mut tx, &accept, sender).await?;
                }

                Ok((tx, (edge, changed)))
            })
            .await?;

        tracing::info!(
            edge_id = %edge.id,
            actor = %sender.url,
            object = %target.url,
            state = edge.state.as_str(),
            "Follow received"
        );

        if changed {
            Ok(ActivityOutcome::Applied)
        } else {
            Ok(ActivityOutcome::Skipped(SkipReason::AlreadyApplied))
        }
    }

    /// Load the local follow answered by `response`
    ///
    /// Keyed by the sender as followed actor, so an answer naming a follow
    /// of someone else finds nothing.
    async fn answered_edge(
        &self,
        response: &FollowResponse,
        sender: &Actor,
    ) -> Result<Option<ActorFollow>, AppError> {
        let edge = match &response.object {
            FollowReference::Embedded(follow) => {
                let follower_url = follow.actor.id();
                match directory::get_actor_by_url(self.db.pool(), follower_url).await? {
                    Some(follower) => {
                        follows::load_by_actor_and_target(self.db.pool(), &follower.id, &sender.id)
                            .await?
                    }
                    None => None,
                }
            }
            FollowReference::Url(url) => follows::load_by_url(self.db.pool(), url)
                .await?
                .filter(|edge| edge.target_actor_id == sender.id),
        };

        let Some(edge) = edge else {
            return Ok(None);
        };

        // Answers only matter for follows made by local actors.
        match directory::get_actor(self.db.pool(), &edge.actor_id).await? {
            Some(follower) if follower.is_local() => Ok(Some(edge)),
            _ => Ok(None),
        }
    }

    async fn handle_accept(
        &self,
        response: &FollowResponse,
        sender: &Actor,
    ) -> Result<ActivityOutcome, AppError> {
        let Some(edge) = self.answered_edge(response, sender).await? else {
            tracing::warn!(actor = %sender.url, "Accept without matching local follow");
            return Ok(ActivityOutcome::Skipped(SkipReason::RecordMissing));
        };

        if edge.state == FollowState::Accepted {
            return Ok(ActivityOutcome::Skipped(SkipReason::AlreadyApplied));
        }

        let edge_id = edge.id.as_str();
        let edge = self
            .db
            .transaction("inbox_accept", |mut tx| async move {
                let edge = follows::accept(&mut tx, edge_id).await?;
                Ok((tx, edge))
            })
            .await?;

        tracing::info!(edge_id = %edge.id, actor = %sender.url, "Follow accepted");
        Ok(ActivityOutcome::Applied)
    }

    async fn handle_reject(
        &self,
        response: &FollowResponse,
        sender: &Actor,
    ) -> Result<ActivityOutcome, AppError> {
        let Some(edge) = self.answered_edge(response, sender).await? else {
            tracing::warn!(actor = %sender.url, "Reject without matching local follow");
            return Ok(ActivityOutcome::Skipped(SkipReason::RecordMissing));
        };

        match edge.state {
            FollowState::Rejected => {
                return Ok(ActivityOutcome::Skipped(SkipReason::AlreadyApplied));
            }
            FollowState::Accepted => {
                tracing::warn!(edge_id = %edge.id, actor = %sender.url, "Reject of an accepted follow");
                return Ok(ActivityOutcome::Skipped(SkipReason::InvalidTransition));
            }
            FollowState::Pending => {}
        }

        let edge_id = edge.id.as_str();
        let edge = self
            .db
            .transaction("inbox_reject", |mut tx| async move {
                let edge = follows::reject(&mut tx, edge_id).await?;
                Ok((tx, edge))
            })
            .await?;

        tracing::info!(edge_id = %edge.id, actor = %sender.url, "Follow rejected");
        Ok(ActivityOutcome::Applied)
    }

    // =========================================================================
    // Like / Dislike
    // =========================================================================

    async fn handle_rate(
        &self,
        ctx: &InstanceContext,
        rate_type: RateType,
        rate: &Rate,
        sender: &Actor,
    ) -> Result<ActivityOutcome, AppError> {
        let Some(rate_url) = rate.id.as_deref() else {
            return Err(AppError::Federation(format!(
                "{} activity without id",
                rate_type.activity_type()
            )));
        };

        let video_url = rate.object.id();
        let Some(video) = self.resolver.video(video_url).await? else {
            tracing::warn!(actor = %sender.url, object = %video_url, "Rate of unknown video");
            return Ok(ActivityOutcome::Skipped(SkipReason::UnknownObject));
        };

        if !video.is_owned() {
            return Ok(ActivityOutcome::Skipped(SkipReason::NotLocallyOwned));
        }

        let Some(account) = directory::get_account_by_actor(self.db.pool(), &sender.id).await? else {
            tracing::warn!(actor = %sender.url, "Rate from actor without account");
            return Ok(ActivityOutcome::Skipped(SkipReason::UnknownObject));
        };

        let account_id = account.id.as_str();
        let video = &video;

        let outcome = self
            .db
            .transaction("inbox_rate", |mut tx| async move {
                if let Some(existing) = objects::load_rate(&mut *tx, account_id, &video.id).await? {
                    if existing.rate_type == rate_type && existing.url == rate_url {
                        return Ok((tx, ActivityOutcome::Skipped(SkipReason::AlreadyApplied)));
                    }
                }

                if let Some(owner) = objects::load_rate_by_url(&mut *tx, rate_url).await? {
                    if owner.account_id != account_id {
                        return Err(AppError::AuthorizationViolation(format!(
                            "{} cannot reuse rate {} owned by another account",
                            sender.url, rate_url
                        )));
                    }
                    if owner.video_id != video.id {
                        return Err(AppError::Validation(format!(
                            "rate {rate_url} already targets another video"
                        )));
                    }
                }

                objects::upsert_rate(&mut *tx, account_id, &video.id, rate_type, rate_url).await?;
                let video = objects::refresh_video_rates(&mut tx, &video.id).await?;

                let publisher_url = match directory::get_video_publishers(&mut *tx, &video.id).await? {
                    Some((channel, _owner)) => channel.url,
                    None => ctx.system_actor.url.clone(),
                };
                let update = build_video_update(&ctx.activity_url("update"), &publisher_url, &video);
                fanout::forward_video_activity(&mut tx, &update, &[sender.id.clone()], &video)
                    .await?;

                Ok((tx, ActivityOutcome::Applied))
            })
            .await?;

        if outcome.is_applied() {
            tracing::info!(
                actor = %sender.url,
                video = %video.url,
                rate = rate_type.as_str(),
                "Rate recorded"
            );
        }
        Ok(outcome)
    }

    // =========================================================================
    // Announce
    // =========================================================================

    async fn handle_announce(
        &self,
        announce: &Announce,
        raw: &serde_json::Value,
        sender: &Actor,
    ) -> Result<ActivityOutcome, AppError> {
        let video_url = announce.object.id();
        let Some(video) = self.resolver.video(video_url).await? else {
            tracing::warn!(actor = %sender.url, object = %video_url, "Announce of unknown video");
            return Ok(ActivityOutcome::Skipped(SkipReason::UnknownObject));
        };

        let announce_url = announce.id.as_str();
        let video = &video;

        self.db
            .transaction("inbox_announce", |mut tx| async move {
                if let Some(existing) = objects::load_share_by_url(&mut *tx, announce_url).await? {
                    if existing.actor_id != sender.id {
                        return Err(AppError::AuthorizationViolation(format!(
                            "{} cannot reuse share {} owned by another actor",
                            sender.url, announce_url
                        )));
                    }
                }

                let (share, created) =
                    objects::find_or_create_share(&mut tx, &sender.id, &video.id, announce_url)
                        .await?;
                if !created {
                    return Ok((tx, ActivityOutcome::Skipped(SkipReason::AlreadyApplied)));
                }

                if video.is_owned() {
                    fanout::forward_video_activity(&mut tx, raw, &[sender.id.clone()], video)
                        .await?;
                }

                tracing::info!(share_id = %share.id, actor = %sender.url, video = %video.url, "Share recorded");
                Ok((tx, ActivityOutcome::Applied))
            })
            .await
    }

    // =========================================================================
    // Create(CacheFile)
    // =========================================================================

    async fn handle_cache_file(
        &self,
        cache_file: &CacheFile,
        raw: &serde_json::Value,
        sender: &Actor,
    ) -> Result<ActivityOutcome, AppError> {
        let redundancy_allowed = match &sender.server_id {
            Some(server_id) => directory::get_server(self.db.pool(), server_id)
                .await?
                .is_some_and(|server| server.redundancy_allowed),
            None => false,
        };
        if !redundancy_allowed {
            tracing::info!(actor = %sender.url, object = %cache_file.id, "Cache file offer from server without redundancy");
            return Ok(ActivityOutcome::Skipped(SkipReason::RedundancyNotAllowed));
        }

        let Some(file_url) = cache_file.url.href() else {
            return Err(AppError::Federation(format!(
                "cache file {} without url",
                cache_file.id
            )));
        };

        let video_url = cache_file.object.id();
        let Some(video) = self.resolver.video(video_url).await? else {
            tracing::warn!(actor = %sender.url, object = %video_url, "Cache file for unknown video");
            return Ok(ActivityOutcome::Skipped(SkipReason::UnknownObject));
        };

        let video = &video;
        self.db
            .transaction("inbox_cache_file", |mut tx| async move {
                if let Some(existing) = objects::load_redundancy_by_url(&mut *tx, &cache_file.id).await? {
                    if existing.actor_id != sender.id {
                        return Err(AppError::AuthorizationViolation(format!(
                            "{} cannot update cache file {} created by another actor",
                            sender.url, cache_file.id
                        )));
                    }
                }

                let offer = objects::NewRedundancy {
                    actor_id: &sender.id,
                    video_id: &video.id,
                    url: &cache_file.id,
                    file_url,
                    expires_on: cache_file.expires,
                };
                objects::upsert_redundancy(&mut *tx, &offer).await?;

                if video.is_owned() {
                    fanout::forward_video_activity(&mut tx, raw, &[sender.id.clone()], video)
                        .await?;
                }

                tracing::info!(actor = %sender.url, object = %cache_file.id, video = %video.url, "Cache file recorded");
                Ok((tx, ActivityOutcome::Applied))
            })
            .await
    }
}

fn unsupported(kind: &str, sender: &Actor) -> ActivityOutcome {
    tracing::info!(actor = %sender.url, kind, "Ignoring unsupported activity");
    ActivityOutcome::Skipped(SkipReason::UnsupportedKind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::directory::NewActor;
    use crate::data::{delivery, ActorType};
    use crate::federation::resolver::DatabaseResolver;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        db: Arc<Database>,
        ctx: InstanceContext,
        processor: ActivityProcessor,
        remote: Actor,
        _temp_dir: TempDir,
    }

    async fn fixture(auto_accept: bool) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("inbox.db"))
                .await
                .unwrap(),
        );

        let mut conn = db.pool().acquire().await.unwrap();
        let system = directory::upsert_actor(
            &mut conn,
            &NewActor {
                actor_type: ActorType::Application,
                preferred_username: "instance".into(),
                url: "https://local.example/accounts/instance".into(),
                inbox_url: "https://local.example/accounts/instance/inbox".into(),
                shared_inbox_url: Some("https://local.example/inbox".into()),
                public_key_pem: None,
                server_id: None,
            },
        )
        .await
        .unwrap();
        let system_account = directory::find_or_create_account(&mut conn, &system.id, "instance")
            .await
            .unwrap();

        let server = directory::find_or_create_server(&mut conn, "remote.example").await.unwrap();
        let remote = directory::upsert_actor(
            &mut conn,
            &NewActor {
                actor_type: ActorType::Application,
                preferred_username: "instance".into(),
                url: "https://remote.example/accounts/instance".into(),
                inbox_url: "https://remote.example/accounts/instance/inbox".into(),
                shared_inbox_url: Some("https://remote.example/inbox".into()),
                public_key_pem: None,
                server_id: Some(server.id),
            },
        )
        .await
        .unwrap();
        directory::find_or_create_account(&mut conn, &remote.id, "instance")
            .await
            .unwrap();
        drop(conn);

        let resolver = BoundedResolver::new(
            Arc::new(DatabaseResolver::new(db.clone())),
            Duration::from_secs(1),
        );
        Fixture {
            processor: ActivityProcessor::new(db.clone(), resolver, ScoreConfig::default(), auto_accept),
            ctx: InstanceContext::new(system_account, system, "https://local.example"),
            db,
            remote,
            _temp_dir: temp_dir,
        }
    }

    fn follow_of_instance(f: &Fixture) -> serde_json::Value {
        json!({
            "type": "Follow",
            "id": "https://remote.example/follows/1",
            "actor": f.remote.url,
            "object": f.ctx.system_actor.url
        })
    }

    #[tokio::test]
    async fn follow_is_auto_accepted_and_answered() {
        let f = fixture(true).await;

        let outcome = f.processor.process(&f.ctx, &follow_of_instance(&f), &f.remote).await.unwrap();
        assert_eq!(outcome, ActivityOutcome::Applied);

        let edge = follows::load_by_url(f.db.pool(), "https://remote.example/follows/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edge.state, FollowState::Accepted);
        assert_eq!(edge.score, 1000);

        let jobs = delivery::pending_jobs_for_inbox(f.db.pool(), "https://remote.example/inbox")
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        let accept: serde_json::Value = serde_json::from_str(&jobs[0].activity).unwrap();
        assert_eq!(accept["type"], "Accept");
        assert_eq!(accept["object"]["id"], "https://remote.example/follows/1");
    }

    #[tokio::test]
    async fn instance_follow_waits_for_moderation() {
        let f = fixture(false).await;

        f.processor.process(&f.ctx, &follow_of_instance(&f), &f.remote).await.unwrap();
        let edge = follows::load_by_url(f.db.pool(), "https://remote.example/follows/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edge.state, FollowState::Pending);

        let system = directory::get_actor(f.db.pool(), &f.ctx.system_actor.id).await.unwrap().unwrap();
        assert_eq!(system.followers_count, 0);
        assert_eq!(delivery::count_pending(f.db.pool()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_follow_is_already_applied() {
        let f = fixture(true).await;
        let follow = follow_of_instance(&f);

        f.processor.process(&f.ctx, &follow, &f.remote).await.unwrap();
        let outcome = f.processor.process(&f.ctx, &follow, &f.remote).await.unwrap();
        assert_eq!(outcome, ActivityOutcome::Skipped(SkipReason::AlreadyApplied));
        assert_eq!(follows::count_edges(f.db.pool()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn activity_from_other_actor_is_violation() {
        let f = fixture(true).await;
        let forged = json!({
            "type": "Follow",
            "actor": "https://elsewhere.example/accounts/mallory",
            "object": f.ctx.system_actor.url
        });

        let result = f.processor.process(&f.ctx, &forged, &f.remote).await;
        assert!(matches!(result, Err(AppError::AuthorizationViolation(_))));
    }

    #[tokio::test]
    async fn blocked_server_is_forbidden() {
        let f = fixture(true).await;
        blocklist::add_server_block(
            f.db.pool(),
            &f.ctx.system_account.id,
            f.remote.server_id.as_deref().unwrap(),
        )
        .await
        .unwrap();

        let result = f.processor.process(&f.ctx, &follow_of_instance(&f), &f.remote).await;
        assert!(matches!(result, Err(AppError::Forbidden)));
        assert_eq!(follows::count_edges(f.db.pool()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cache_file_requires_redundancy_allowed() {
        let f = fixture(true).await;
        let offer = json!({
            "type": "Create",
            "actor": f.remote.url,
            "object": {
                "type": "CacheFile",
                "id": "https://remote.example/redundancy/1",
                "object": "https://local.example/videos/watch/1",
                "url": { "type": "Link", "href": "https://remote.example/static/1.mp4" }
            }
        });

        let outcome = f.processor.process(&f.ctx, &offer, &f.remote).await.unwrap();
        assert_eq!(outcome, ActivityOutcome::Skipped(SkipReason::RedundancyNotAllowed));
    }

    #[tokio::test]
    async fn unknown_kind_is_skipped() {
        let f = fixture(true).await;
        let activity = json!({ "type": "Flag", "actor": f.remote.url, "object": "x" });

        let outcome = f.processor.process(&f.ctx, &activity, &f.remote).await.unwrap();
        assert_eq!(outcome, ActivityOutcome::Skipped(SkipReason::UnsupportedKind));
    }
}
