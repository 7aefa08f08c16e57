//! Undo processing
//!
//! Applies the compensating transition for each undone activity kind. Every
//! handler tolerates an Undo arriving before, after or without the activity
//! it retracts: a missing record is logged and skipped. Each handler runs in
//! its own transaction through [`Database::transaction`].

use std::sync::Arc;

use crate::data::{directory, follows, objects, Actor, Database, RateType, Tx, Video};
use crate::error::AppError;

use super::activity::{build_video_update, Activity, CacheFile, CreateObject, Follow, Rate, Undo, UndoObject};
use super::context::InstanceContext;
use super::fanout;
use super::outcome::{SkipReason, UndoOutcome};
use super::resolver::BoundedResolver;

/// Handles `Undo` activities
pub struct UndoProcessor {
    db: Arc<Database>,
    resolver: BoundedResolver,
}

impl UndoProcessor {
    pub fn new(db: Arc<Database>, resolver: BoundedResolver) -> Self {
        Self { db, resolver }
    }

    /// Apply `undo` sent by `sender`
    ///
    /// `raw` is the Undo as received, forwarded verbatim where the undone
    /// object is a local video.
    pub async fn process(
        &self,
        ctx: &InstanceContext,
        undo: &Undo,
        raw: &serde_json::Value,
        sender: &Actor,
    ) -> Result<UndoOutcome, AppError> {
        if undo.actor.id() != sender.url {
            crate::metrics::UNDO_OUTCOMES
                .with_label_values(&["Any", "rejected"])
                .inc();
            return Err(AppError::AuthorizationViolation(format!(
                "Undo by {} was delivered by {}",
                undo.actor.id(),
                sender.url
            )));
        }

        let (kind, result) = match &undo.object {
            UndoObject::Embedded(inner) => match inner.as_ref() {
                Activity::Like(rate) => ("Like", self.undo_rate(ctx, RateType::Like, rate, sender).await),
                Activity::Dislike(rate) => (
                    "Dislike",
                    self.undo_rate(ctx, RateType::Dislike, rate, sender).await,
                ),
                Activity::Follow(follow) => ("Follow", self.undo_follow(follow, sender).await),
                Activity::Announce(announce) => (
                    "Announce",
                    self.undo_announce(&announce.id, raw, sender).await,
                ),
                Activity::Create(create) => match &create.object {
                    CreateObject::CacheFile(cache_file) => (
                        "CacheFile",
                        self.undo_cache_file(cache_file, raw, sender).await,
                    ),
                    CreateObject::Unknown => ("Create", Ok(unsupported(inner.kind(), sender))),
                },
                other => ("Other", Ok(unsupported(other.kind(), sender))),
            },
            UndoObject::Url(url) | UndoObject::Reference { id: url } => {
                ("Url", self.undo_by_url(ctx, url, raw, sender).await)
            }
        };

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(AppError::AuthorizationViolation(_)) => "rejected",
            Err(_) => "failed",
        };
        crate::metrics::UNDO_OUTCOMES
            .with_label_values(&[kind, label])
            .inc();

        result
    }

    // =========================================================================
    // Like / Dislike
    // =========================================================================

    async fn undo_rate(
        &self,
        ctx: &InstanceContext,
        rate_type: RateType,
        rate: &Rate,
        sender: &Actor,
    ) -> Result<UndoOutcome, AppError> {
        let video_url = rate.object.id();
        let Some(video) = self.resolver.video(video_url).await? else {
            tracing::warn!(actor = %sender.url, object = %video_url, "Undo {} on unknown video", rate_type.activity_type());
            return Ok(UndoOutcome::Skipped(SkipReason::UnknownObject));
        };

        if !video.is_owned() {
            tracing::debug!(actor = %sender.url, video = %video.url, "Undo rate on remote video, nothing tracked");
            return Ok(UndoOutcome::Skipped(SkipReason::NotLocallyOwned));
        }

        let Some(account) = directory::get_account_by_actor(self.db.pool(), &sender.id).await? else {
            tracing::warn!(actor = %sender.url, "Undo rate from actor without account");
            return Ok(UndoOutcome::Skipped(SkipReason::RecordMissing));
        };

        let account_id = account.id.as_str();
        let activity_url = rate.id.as_deref();
        let video = &video;

        self.db
            .transaction("undo_rate", |mut tx| async move {
                let Some(stored) = objects::load_rate(&mut *tx, account_id, &video.id).await? else {
                    tracing::warn!(actor = %sender.url, video = %video.url, "Undo {} without stored rate", rate_type.activity_type());
                    return Ok((tx, UndoOutcome::Skipped(SkipReason::RecordMissing)));
                };

                if stored.rate_type != rate_type {
                    tracing::warn!(
                        actor = %sender.url,
                        video = %video.url,
                        stored = stored.rate_type.as_str(),
                        undone = rate_type.as_str(),
                        "Undo rate type does not match stored rate"
                    );
                    return Ok((tx, UndoOutcome::Skipped(SkipReason::RateTypeMismatch)));
                }

                // A rate re-created by a later activity survives Undos of the earlier one.
                if let Some(url) = activity_url {
                    if stored.url != url {
                        tracing::warn!(
                            actor = %sender.url,
                            video = %video.url,
                            stored = %stored.url,
                            undone = %url,
                            "Undo {} of a superseded activity",
                            rate_type.activity_type()
                        );
                        return Ok((tx, UndoOutcome::Skipped(SkipReason::Superseded)));
                    }
                }

                let outcome = retract_rate(&mut tx, ctx, &stored.id, video, sender).await?;
                Ok((tx, outcome))
            })
            .await
    }

    // =========================================================================
    // Follow
    // =========================================================================

    async fn undo_follow(&self, follow: &Follow, sender: &Actor) -> Result<UndoOutcome, AppError> {
        let target_url = follow.object.id();
        let Some(target) = self.resolver.actor(target_url).await? else {
            tracing::warn!(actor = %sender.url, object = %target_url, "Undo Follow of unknown actor");
            return Ok(UndoOutcome::Skipped(SkipReason::UnknownObject));
        };

        let target = &target;
        self.db
            .transaction("undo_follow", |mut tx| async move {
                let Some(edge) =
                    follows::load_by_actor_and_target(&mut *tx, &sender.id, &target.id).await?
                else {
                    tracing::warn!(actor = %sender.url, object = %target.url, "Undo Follow without follow edge");
                    return Ok((tx, UndoOutcome::Skipped(SkipReason::RecordMissing)));
                };

                follows::remove(&mut tx, &edge).await?;
                tracing::info!(edge_id = %edge.id, actor = %sender.url, object = %target.url, "Removed follow on Undo");
                Ok((tx, UndoOutcome::Applied))
            })
            .await
    }

    // =========================================================================
    // Announce
    // =========================================================================

    async fn undo_announce(
        &self,
        announce_url: &str,
        raw: &serde_json::Value,
        sender: &Actor,
    ) -> Result<UndoOutcome, AppError> {
        self.db
            .transaction("undo_announce", |mut tx| async move {
                let outcome = retract_share(&mut tx, announce_url, raw, sender).await?;
                Ok((tx, outcome))
            })
            .await
    }

    // =========================================================================
    // Create(CacheFile)
    // =========================================================================

    async fn undo_cache_file(
        &self,
        cache_file: &CacheFile,
        raw: &serde_json::Value,
        sender: &Actor,
    ) -> Result<UndoOutcome, AppError> {
        let video_url = cache_file.object.id();
        let Some(video) = self.resolver.video(video_url).await? else {
            tracing::warn!(actor = %sender.url, object = %video_url, "Undo CacheFile on unknown video");
            return Ok(UndoOutcome::Skipped(SkipReason::UnknownObject));
        };

        let cache_url = cache_file.id.as_str();
        let video = &video;
        self.db
            .transaction("undo_cache_file", |mut tx| async move {
                let outcome = retract_cache_file(&mut tx, cache_url, Some(video), raw, sender).await?;
                Ok((tx, outcome))
            })
            .await
    }

    // =========================================================================
    // Compact Undo (object is a URL)
    // =========================================================================

    async fn undo_by_url(
        &self,
        ctx: &InstanceContext,
        url: &str,
        raw: &serde_json::Value,
        sender: &Actor,
    ) -> Result<UndoOutcome, AppError> {
        let account = directory::get_account_by_actor(self.db.pool(), &sender.id).await?;
        let account_id = account.as_ref().map(|account| account.id.as_str());

        self.db
            .transaction("undo_by_url", |mut tx| async move {
                if let Some(edge) = follows::load_by_url(&mut *tx, url).await? {
                    if edge.actor_id != sender.id {
                        tracing::warn!(actor = %sender.url, object = %url, "Undo of a follow made by another actor");
                        return Ok((tx, UndoOutcome::Skipped(SkipReason::RecordMissing)));
                    }
                    follows::remove(&mut tx, &edge).await?;
                    tracing::info!(edge_id = %edge.id, actor = %sender.url, "Removed follow on Undo");
                    return Ok((tx, UndoOutcome::Applied));
                }

                if let Some(stored) = objects::load_rate_by_url(&mut *tx, url).await? {
                    if Some(stored.account_id.as_str()) != account_id {
                        tracing::warn!(actor = %sender.url, object = %url, "Undo of a rate made by another account");
                        return Ok((tx, UndoOutcome::Skipped(SkipReason::RecordMissing)));
                    }
                    let Some(video) = directory::get_video(&mut *tx, &stored.video_id).await? else {
                        return Ok((tx, UndoOutcome::Skipped(SkipReason::UnknownObject)));
                    };
                    if !video.is_owned() {
                        return Ok((tx, UndoOutcome::Skipped(SkipReason::NotLocallyOwned)));
                    }
                    let outcome = retract_rate(&mut tx, ctx, &stored.id, &video, sender).await?;
                    return Ok((tx, outcome));
                }

                if objects::load_share_by_url(&mut *tx, url).await?.is_some() {
                    let outcome = retract_share(&mut tx, url, raw, sender).await?;
                    return Ok((tx, outcome));
                }

                if objects::load_redundancy_by_url(&mut *tx, url).await?.is_some() {
                    let outcome = retract_cache_file(&mut tx, url, None, raw, sender).await?;
                    return Ok((tx, outcome));
                }

                tracing::warn!(actor = %sender.url, object = %url, "Undo of unknown activity URL");
                Ok((tx, UndoOutcome::Skipped(SkipReason::RecordMissing)))
            })
            .await
    }
}

fn unsupported(kind: &str, sender: &Actor) -> UndoOutcome {
    tracing::info!(actor = %sender.url, kind, "Ignoring Undo of unsupported activity kind");
    UndoOutcome::Skipped(SkipReason::UnsupportedKind)
}

/// Delete a rate, rebuild the video's counters and announce them
async fn retract_rate(
    tx: &mut Tx,
    ctx: &InstanceContext,
    rate_id: &str,
    video: &Video,
    sender: &Actor,
) -> Result<UndoOutcome, AppError> {
    objects::delete_rate(&mut **tx, rate_id).await?;
    let video = objects::refresh_video_rates(tx, &video.id).await?;

    let publisher_url = match directory::get_video_publishers(&mut **tx, &video.id).await? {
        Some((channel, _owner)) => channel.url,
        None => ctx.system_actor.url.clone(),
    };
    let update = build_video_update(&ctx.activity_url("update"), &publisher_url, &video);
    fanout::forward_video_activity(tx, &update, &[sender.id.clone()], &video).await?;

    tracing::info!(
        actor = %sender.url,
        video = %video.url,
        likes = video.likes,
        dislikes = video.dislikes,
        "Removed rate on Undo"
    );
    Ok(UndoOutcome::Applied)
}

/// Delete a share owned by `sender` and forward the Undo
async fn retract_share(
    tx: &mut Tx,
    announce_url: &str,
    raw: &serde_json::Value,
    sender: &Actor,
) -> Result<UndoOutcome, AppError> {
    let Some(share) = objects::load_share_by_url(&mut **tx, announce_url).await? else {
        tracing::warn!(actor = %sender.url, object = %announce_url, "Undo Announce without stored share");
        return Ok(UndoOutcome::Skipped(SkipReason::RecordMissing));
    };

    if share.actor_id != sender.id {
        return Err(AppError::AuthorizationViolation(format!(
            "{} cannot undo share {} owned by another actor",
            sender.url, announce_url
        )));
    }

    objects::delete_share(&mut **tx, &share.id).await?;

    if let Some(video) = directory::get_video(&mut **tx, &share.video_id).await? {
        if video.is_owned() {
            fanout::forward_video_activity(tx, raw, &[sender.id.clone()], &video).await?;
        }
    }

    tracing::info!(actor = %sender.url, object = %announce_url, "Removed share on Undo");
    Ok(UndoOutcome::Applied)
}

/// Delete a cache file created by `sender` and forward the Undo
async fn retract_cache_file(
    tx: &mut Tx,
    cache_url: &str,
    video: Option<&Video>,
    raw: &serde_json::Value,
    sender: &Actor,
) -> Result<UndoOutcome, AppError> {
    let Some(redundancy) = objects::load_redundancy_by_url(&mut **tx, cache_url).await? else {
        tracing::warn!(actor = %sender.url, object = %cache_url, "Undo CacheFile without stored cache file");
        return Ok(UndoOutcome::Skipped(SkipReason::RecordMissing));
    };

    if redundancy.actor_id != sender.id {
        return Err(AppError::AuthorizationViolation(format!(
            "{} cannot undo cache file {} created by another actor",
            sender.url, cache_url
        )));
    }

    objects::delete_redundancy(&mut **tx, &redundancy.id).await?;

    let video = match video {
        Some(video) => Some(video.clone()),
        None => directory::get_video(&mut **tx, &redundancy.video_id).await?,
    };
    if let Some(video) = video {
        if video.is_owned() {
            fanout::forward_video_activity(tx, raw, &[sender.id.clone()], &video).await?;
        }
    }

    tracing::info!(actor = %sender.url, object = %cache_url, "Removed cache file on Undo");
    Ok(UndoOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::directory::NewActor;
    use crate::data::{delivery, ActorType, FollowState};
    use crate::federation::resolver::{DatabaseResolver, MockObjectResolver};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn queued_for(db: &Database, inbox_url: &str) -> usize {
        delivery::pending_jobs_for_inbox(db.pool(), inbox_url)
            .await
            .unwrap()
            .len()
    }

    struct Fixture {
        db: Arc<Database>,
        ctx: InstanceContext,
        processor: UndoProcessor,
        remote: Actor,
        video: Video,
        _temp_dir: TempDir,
    }

    async fn actor(db: &Database, url: &str, server: Option<&str>, kind: ActorType) -> Actor {
        let mut conn = db.pool().acquire().await.unwrap();
        let server_id = match server {
            Some(host) => Some(directory::find_or_create_server(&mut conn, host).await.unwrap().id),
            None => None,
        };
        let name = url.rsplit('/').next().unwrap().to_string();
        directory::upsert_actor(
            &mut conn,
            &NewActor {
                actor_type: kind,
                preferred_username: name.clone(),
                url: url.to_string(),
                inbox_url: format!("{url}/inbox"),
                shared_inbox_url: server.map(|host| format!("https://{host}/inbox")),
                public_key_pem: None,
                server_id,
            },
        )
        .await
        .unwrap()
    }

    async fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("undo.db"))
                .await
                .unwrap(),
        );

        let system = actor(&db, "https://local.example/accounts/instance", None, ActorType::Application).await;
        let owner = actor(&db, "https://local.example/accounts/owner", None, ActorType::Person).await;
        let channel_actor = actor(&db, "https://local.example/video-channels/main", None, ActorType::Group).await;
        let remote = actor(&db, "https://remote.example/accounts/alice", Some("remote.example"), ActorType::Person).await;

        let mut conn = db.pool().acquire().await.unwrap();
        let system_account = directory::find_or_create_account(&mut conn, &system.id, "instance").await.unwrap();
        let owner_account = directory::find_or_create_account(&mut conn, &owner.id, "owner").await.unwrap();
        directory::find_or_create_account(&mut conn, &remote.id, "alice").await.unwrap();
        let channel = directory::create_channel(&mut *conn, &channel_actor.id, &owner_account.id, "main")
            .await
            .unwrap();
        let video = directory::create_video(&mut *conn, &channel.id, "clip", "https://local.example/videos/watch/1", false)
            .await
            .unwrap();
        drop(conn);

        let resolver = BoundedResolver::new(
            Arc::new(DatabaseResolver::new(db.clone())),
            Duration::from_secs(1),
        );
        Fixture {
            processor: UndoProcessor::new(db.clone(), resolver),
            ctx: InstanceContext::new(system_account, system, "https://local.example"),
            db,
            remote,
            video,
            _temp_dir: temp_dir,
        }
    }

    fn undo_of(value: serde_json::Value) -> (Undo, serde_json::Value) {
        let Activity::Undo(undo) = Activity::parse(&value).unwrap() else {
            panic!("expected Undo");
        };
        (undo, value)
    }

    async fn like(f: &Fixture, url: &str, rate_type: RateType) {
        let account = directory::get_account_by_actor(f.db.pool(), &f.remote.id).await.unwrap().unwrap();
        objects::upsert_rate(f.db.pool(), &account.id, &f.video.id, rate_type, url).await.unwrap();
        let mut conn = f.db.pool().acquire().await.unwrap();
        objects::refresh_video_rates(&mut conn, &f.video.id).await.unwrap();
    }

    #[tokio::test]
    async fn undo_like_is_idempotent() {
        let f = fixture().await;
        like(&f, "https://remote.example/likes/1", RateType::Like).await;

        let (undo, raw) = undo_of(json!({
            "type": "Undo",
            "id": "https://remote.example/likes/1/undo",
            "actor": f.remote.url,
            "object": {
                "type": "Like",
                "id": "https://remote.example/likes/1",
                "actor": f.remote.url,
                "object": f.video.url
            }
        }));

        let first = f.processor.process(&f.ctx, &undo, &raw, &f.remote).await.unwrap();
        assert_eq!(first, UndoOutcome::Applied);
        let video = directory::get_video(f.db.pool(), &f.video.id).await.unwrap().unwrap();
        assert_eq!(video.likes, 0);

        let second = f.processor.process(&f.ctx, &undo, &raw, &f.remote).await.unwrap();
        assert_eq!(second, UndoOutcome::Skipped(SkipReason::RecordMissing));
        let video = directory::get_video(f.db.pool(), &f.video.id).await.unwrap().unwrap();
        assert_eq!(video.likes, 0);
    }

    #[tokio::test]
    async fn undo_like_of_stored_dislike_is_skipped() {
        let f = fixture().await;
        like(&f, "https://remote.example/dislikes/1", RateType::Dislike).await;

        let (undo, raw) = undo_of(json!({
            "type": "Undo",
            "actor": f.remote.url,
            "object": {
                "type": "Like",
                "id": "https://remote.example/likes/1",
                "actor": f.remote.url,
                "object": f.video.url
            }
        }));

        let outcome = f.processor.process(&f.ctx, &undo, &raw, &f.remote).await.unwrap();
        assert_eq!(outcome, UndoOutcome::Skipped(SkipReason::RateTypeMismatch));
        let video = directory::get_video(f.db.pool(), &f.video.id).await.unwrap().unwrap();
        assert_eq!(video.dislikes, 1);
    }

    #[tokio::test]
    async fn undo_of_earlier_like_keeps_current_rate() {
        let f = fixture().await;
        like(&f, "https://remote.example/likes/2", RateType::Like).await;

        let (undo, raw) = undo_of(json!({
            "type": "Undo",
            "actor": f.remote.url,
            "object": {
                "type": "Like",
                "id": "https://remote.example/likes/1",
                "actor": f.remote.url,
                "object": f.video.url
            }
        }));

        let outcome = f.processor.process(&f.ctx, &undo, &raw, &f.remote).await.unwrap();
        assert_eq!(outcome, UndoOutcome::Skipped(SkipReason::Superseded));
        let video = directory::get_video(f.db.pool(), &f.video.id).await.unwrap().unwrap();
        assert_eq!(video.likes, 1);
    }

    #[tokio::test]
    async fn undo_follow_without_edge_is_soft() {
        let f = fixture().await;
        let (undo, raw) = undo_of(json!({
            "type": "Undo",
            "actor": f.remote.url,
            "object": {
                "type": "Follow",
                "actor": f.remote.url,
                "object": f.ctx.system_actor.url
            }
        }));

        let outcome = f.processor.process(&f.ctx, &undo, &raw, &f.remote).await.unwrap();
        assert_eq!(outcome, UndoOutcome::Skipped(SkipReason::RecordMissing));
    }

    #[tokio::test]
    async fn undo_follow_removes_edge_and_rebuilds_counts() {
        let f = fixture().await;
        let remote_id = f.remote.id.clone();
        let system_id = f.ctx.system_actor.id.clone();
        f.db.transaction("seed", |mut tx| {
            let (remote_id, system_id) = (remote_id.clone(), system_id.clone());
            async move {
                follows::find_or_create(&mut tx, &remote_id, &system_id, None, FollowState::Accepted, 1000)
                    .await?;
                Ok((tx, ()))
            }
        })
        .await
        .unwrap();

        let (undo, raw) = undo_of(json!({
            "type": "Undo",
            "actor": f.remote.url,
            "object": { "type": "Follow", "actor": f.remote.url, "object": f.ctx.system_actor.url }
        }));
        let outcome = f.processor.process(&f.ctx, &undo, &raw, &f.remote).await.unwrap();
        assert_eq!(outcome, UndoOutcome::Applied);

        let system = directory::get_actor(f.db.pool(), &f.ctx.system_actor.id).await.unwrap().unwrap();
        assert_eq!(system.followers_count, 0);
    }

    #[tokio::test]
    async fn undo_cache_file_by_other_actor_is_violation() {
        let f = fixture().await;
        let mirror = actor(&f.db, "https://mirror.example/accounts/instance", Some("mirror.example"), ActorType::Application).await;
        objects::upsert_redundancy(
            f.db.pool(),
            &objects::NewRedundancy {
                actor_id: &mirror.id,
                video_id: &f.video.id,
                url: "https://mirror.example/redundancy/1",
                file_url: "https://mirror.example/static/1.mp4",
                expires_on: None,
            },
        )
        .await
        .unwrap();

        let (undo, raw) = undo_of(json!({
            "type": "Undo",
            "actor": f.remote.url,
            "object": {
                "type": "Create",
                "actor": f.remote.url,
                "object": {
                    "type": "CacheFile",
                    "id": "https://mirror.example/redundancy/1",
                    "object": f.video.url,
                    "url": "https://mirror.example/static/1.mp4"
                }
            }
        }));

        let result = f.processor.process(&f.ctx, &undo, &raw, &f.remote).await;
        assert!(matches!(result, Err(AppError::AuthorizationViolation(_))));
        assert!(objects::load_redundancy_by_url(f.db.pool(), "https://mirror.example/redundancy/1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn compact_undo_finds_share_by_url() {
        let f = fixture().await;
        let mut conn = f.db.pool().acquire().await.unwrap();
        objects::find_or_create_share(&mut conn, &f.remote.id, &f.video.id, "https://remote.example/announces/1")
            .await
            .unwrap();
        drop(conn);

        let (undo, raw) = undo_of(json!({
            "type": "Undo",
            "actor": f.remote.url,
            "object": "https://remote.example/announces/1"
        }));
        let outcome = f.processor.process(&f.ctx, &undo, &raw, &f.remote).await.unwrap();
        assert_eq!(outcome, UndoOutcome::Applied);
        assert!(objects::load_share_by_url(f.db.pool(), "https://remote.example/announces/1")
            .await
            .unwrap()
            .is_none());
        // The sender's own inbox never receives the forwarded Undo.
        assert_eq!(queued_for(&f.db, "https://remote.example/inbox").await, 0);
    }

    #[tokio::test]
    async fn undo_of_unknown_kind_is_skipped() {
        let f = fixture().await;
        let (undo, raw) = undo_of(json!({
            "type": "Undo",
            "actor": f.remote.url,
            "object": { "type": "Block", "id": "https://remote.example/blocks/1" }
        }));
        let outcome = f.processor.process(&f.ctx, &undo, &raw, &f.remote).await.unwrap();
        assert_eq!(outcome, UndoOutcome::Skipped(SkipReason::UnsupportedKind));
    }

    #[tokio::test]
    async fn resolve_timeout_aborts_undo() {
        let f = fixture().await;
        let mut mock = MockObjectResolver::new();
        mock.expect_resolve_video()
            .returning(|url| Err(AppError::ResolveTimeout(url.to_string())));
        let processor = UndoProcessor::new(
            f.db.clone(),
            BoundedResolver::new(Arc::new(mock), Duration::from_secs(1)),
        );

        let (undo, raw) = undo_of(json!({
            "type": "Undo",
            "actor": f.remote.url,
            "object": { "type": "Like", "id": "https://remote.example/likes/9", "actor": f.remote.url, "object": f.video.url }
        }));
        let result = processor.process(&f.ctx, &undo, &raw, &f.remote).await;
        assert!(matches!(result, Err(AppError::ResolveTimeout(_))));
        assert!(result.unwrap_err().is_retryable());
    }
}
