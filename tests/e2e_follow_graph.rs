//! E2E tests for the follow graph: inbound follows, answers to local
//! follows, undo and derived counters

mod common;

use common::TestServer;
use serde_json::json;
use vidfed::data::{follows, FollowState};
use vidfed::federation::{ActivityOutcome, SkipReason};

#[tokio::test]
async fn test_concurrent_follows_create_one_edge() {
    let server = TestServer::new().await;
    let alice = server.local_actor("alice").await;
    let bob = server.remote_actor("bob", "remote.example").await;

    let follow = json!({
        "type": "Follow",
        "id": "https://remote.example/follows/1",
        "actor": bob.url,
        "object": alice.url
    });

    let attempts = (0..8).map(|_| server.receive(follow.clone(), &bob));
    let outcomes = futures::future::join_all(attempts).await;

    let applied = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Ok(ActivityOutcome::Applied)))
        .count();
    let duplicates = outcomes
        .iter()
        .filter(|outcome| {
            matches!(
                outcome,
                Ok(ActivityOutcome::Skipped(SkipReason::AlreadyApplied))
            )
        })
        .count();
    assert_eq!(applied, 1);
    assert_eq!(duplicates, 7);

    assert_eq!(follows::count_edges(server.db().pool()).await.unwrap(), 1);
    assert_eq!(server.reload(&alice).await.followers_count, 1);
    assert_eq!(server.reload(&bob).await.following_count, 1);
}

#[tokio::test]
async fn test_inbound_follow_then_undo() {
    let server = TestServer::new().await;
    let alice = server.local_actor("alice").await;
    let bob = server.remote_actor("bob", "remote.example").await;

    let follow = json!({
        "type": "Follow",
        "id": "https://remote.example/follows/1",
        "actor": bob.url,
        "object": alice.url
    });
    let outcome = server.receive(follow.clone(), &bob).await.unwrap();
    assert_eq!(outcome, ActivityOutcome::Applied);

    // The Accept goes to the follower's shared inbox.
    let queued = server.queued_for("https://remote.example/inbox").await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0]["type"], "Accept");
    assert_eq!(queued[0]["actor"], alice.url.as_str());
    assert_eq!(queued[0]["object"]["id"], "https://remote.example/follows/1");

    let undo = json!({
        "type": "Undo",
        "id": "https://remote.example/follows/1/undo",
        "actor": bob.url,
        "object": follow
    });
    let outcome = server.receive(undo.clone(), &bob).await.unwrap();
    assert_eq!(outcome, ActivityOutcome::Applied);
    assert_eq!(server.reload(&alice).await.followers_count, 0);
    assert_eq!(server.reload(&bob).await.following_count, 0);

    let outcome = server.receive(undo, &bob).await.unwrap();
    assert_eq!(outcome, ActivityOutcome::Skipped(SkipReason::RecordMissing));
}

#[tokio::test]
async fn test_local_follow_accepted_then_unfollowed() {
    let server = TestServer::new().await;
    let alice = server.local_actor("alice").await;
    let bob = server.remote_actor("bob", "remote.example").await;

    let edge = server.state.follows.follow(&alice, &bob.url).await.unwrap();
    assert_eq!(edge.state, FollowState::Pending);
    let follow_url = edge.url.clone().unwrap();
    assert!(follow_url.starts_with(&format!("{}/follows/", alice.url)));

    let queued = server.queued_for("https://remote.example/inbox").await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0]["type"], "Follow");
    assert_eq!(queued[0]["id"], follow_url.as_str());

    // Pending edges do not count.
    assert_eq!(server.reload(&alice).await.following_count, 0);

    let accept = json!({
        "type": "Accept",
        "id": "https://remote.example/accepts/1",
        "actor": bob.url,
        "object": {
            "type": "Follow",
            "id": follow_url,
            "actor": alice.url,
            "object": bob.url
        }
    });
    let outcome = server.receive(accept.clone(), &bob).await.unwrap();
    assert_eq!(outcome, ActivityOutcome::Applied);
    assert_eq!(server.reload(&alice).await.following_count, 1);
    assert_eq!(server.reload(&bob).await.followers_count, 1);

    let outcome = server.receive(accept, &bob).await.unwrap();
    assert_eq!(outcome, ActivityOutcome::Skipped(SkipReason::AlreadyApplied));

    let removed = server
        .state
        .follows
        .unfollow(&server.state.ctx, &alice, &bob.url)
        .await
        .unwrap();
    assert!(removed);
    assert_eq!(server.reload(&alice).await.following_count, 0);
    assert_eq!(server.reload(&bob).await.followers_count, 0);

    let queued = server.queued_for("https://remote.example/inbox").await;
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[1]["type"], "Undo");
    assert_eq!(queued[1]["object"]["type"], "Follow");
    assert_eq!(queued[1]["object"]["id"], follow_url.as_str());

    let removed = server
        .state
        .follows
        .unfollow(&server.state.ctx, &alice, &bob.url)
        .await
        .unwrap();
    assert!(!removed);
}

#[tokio::test]
async fn test_reject_by_url_then_late_accept() {
    let server = TestServer::new().await;
    let alice = server.local_actor("alice").await;
    let bob = server.remote_actor("bob", "remote.example").await;

    let edge = server.state.follows.follow(&alice, &bob.url).await.unwrap();
    let follow_url = edge.url.clone().unwrap();

    let reject = json!({
        "type": "Reject",
        "actor": bob.url,
        "object": follow_url
    });
    let outcome = server.receive(reject.clone(), &bob).await.unwrap();
    assert_eq!(outcome, ActivityOutcome::Applied);
    let stored = follows::load(server.db().pool(), &edge.id).await.unwrap().unwrap();
    assert_eq!(stored.state, FollowState::Rejected);

    let outcome = server.receive(reject, &bob).await.unwrap();
    assert_eq!(outcome, ActivityOutcome::Skipped(SkipReason::AlreadyApplied));

    let accept = json!({
        "type": "Accept",
        "actor": bob.url,
        "object": follow_url
    });
    let outcome = server.receive(accept, &bob).await.unwrap();
    assert_eq!(outcome, ActivityOutcome::Applied);
    assert_eq!(server.reload(&alice).await.following_count, 1);

    // Rejecting an accepted follow is refused without touching the edge.
    let reject = json!({
        "type": "Reject",
        "actor": bob.url,
        "object": follow_url
    });
    let outcome = server.receive(reject, &bob).await.unwrap();
    assert_eq!(outcome, ActivityOutcome::Skipped(SkipReason::InvalidTransition));
    assert_eq!(server.reload(&alice).await.following_count, 1);
}

#[tokio::test]
async fn test_follow_again_after_reject() {
    let server = TestServer::new().await;
    let alice = server.local_actor("alice").await;
    let bob = server.remote_actor("bob", "remote.example").await;

    let edge = server.state.follows.follow(&alice, &bob.url).await.unwrap();
    let first_url = edge.url.clone().unwrap();
    let reject = json!({
        "type": "Reject",
        "actor": bob.url,
        "object": first_url
    });
    server.receive(reject, &bob).await.unwrap();

    let again = server.state.follows.follow(&alice, &bob.url).await.unwrap();
    assert_eq!(again.id, edge.id);
    assert_eq!(again.state, FollowState::Pending);
    let second_url = again.url.clone().unwrap();
    assert_ne!(second_url, first_url);

    let queued = server.queued_for("https://remote.example/inbox").await;
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[1]["type"], "Follow");
    assert_eq!(queued[1]["id"], second_url.as_str());

    // Still pending: asking again sends nothing new.
    server.state.follows.follow(&alice, &bob.url).await.unwrap();
    assert_eq!(server.queued_for("https://remote.example/inbox").await.len(), 2);

    let accept = json!({
        "type": "Accept",
        "actor": bob.url,
        "object": second_url
    });
    let outcome = server.receive(accept, &bob).await.unwrap();
    assert_eq!(outcome, ActivityOutcome::Applied);
    assert_eq!(server.reload(&alice).await.following_count, 1);
}

#[tokio::test]
async fn test_answer_from_wrong_actor_finds_nothing() {
    let server = TestServer::new().await;
    let alice = server.local_actor("alice").await;
    let bob = server.remote_actor("bob", "remote.example").await;
    let mallory = server.remote_actor("mallory", "evil.example").await;

    let edge = server.state.follows.follow(&alice, &bob.url).await.unwrap();

    let accept = json!({
        "type": "Accept",
        "actor": mallory.url,
        "object": edge.url
    });
    let outcome = server.receive(accept, &mallory).await.unwrap();
    assert_eq!(outcome, ActivityOutcome::Skipped(SkipReason::RecordMissing));

    let stored = follows::load(server.db().pool(), &edge.id).await.unwrap().unwrap();
    assert_eq!(stored.state, FollowState::Pending);
}

#[tokio::test]
async fn test_moderated_followers() {
    let server = TestServer::new().await;
    let alice = server.local_actor("alice").await;
    let bob = server.remote_actor("bob", "remote.example").await;
    let carol = server.remote_actor("carol", "other.example").await;

    let pending = server.follow(&bob, &alice, FollowState::Pending).await;
    let accepted_edge = server.follow(&carol, &alice, FollowState::Pending).await;
    let ctx = &server.state.ctx;

    let rejected = server.state.follows.reject_follower(ctx, &pending.id).await.unwrap();
    assert_eq!(rejected.state, FollowState::Rejected);
    let queued = server.queued_for("https://remote.example/inbox").await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0]["type"], "Reject");

    let accepted = server
        .state
        .follows
        .accept_follower(ctx, &accepted_edge.id)
        .await
        .unwrap();
    assert_eq!(accepted.state, FollowState::Accepted);
    assert_eq!(server.reload(&alice).await.followers_count, 1);
    let queued = server.queued_for("https://other.example/inbox").await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0]["type"], "Accept");

    let inboxes = server
        .state
        .follows
        .follower_inboxes(&[alice.id.clone()], None, None)
        .await
        .unwrap();
    assert_eq!(inboxes, vec!["https://other.example/inbox".to_string()]);

    assert!(server.state.follows.remove_follower(ctx, &accepted.id).await.unwrap());
    assert_eq!(server.reload(&alice).await.followers_count, 0);
    assert_eq!(server.queued_for("https://other.example/inbox").await.len(), 2);
}

#[tokio::test]
async fn test_instance_follow_stats() {
    let server = TestServer::new().await;
    let remote = server.remote_instance("remote.example").await;
    let other = server.remote_instance("other.example").await;
    let system = server.system_actor().clone();

    let follow = json!({
        "type": "Follow",
        "id": "https://remote.example/follows/instance",
        "actor": remote.url,
        "object": system.url
    });
    let outcome = server.receive(follow, &remote).await.unwrap();
    assert_eq!(outcome, ActivityOutcome::Applied);
    server.follow(&system, &other, FollowState::Accepted).await;

    let stats = server.state.follows.stats(&server.state.ctx).await.unwrap();
    assert_eq!(stats.total_instance_followers, 1);
    assert_eq!(stats.total_instance_following, 1);

    let followers = server
        .state
        .follows
        .list_followers(
            &[system.id.clone()],
            &vidfed::data::ListQuery::new(0, 10),
            &vidfed::data::FollowListFilter::default(),
        )
        .await
        .unwrap();
    assert_eq!(followers.total, 1);
    assert_eq!(followers.data[0].follower_host.as_deref(), Some("remote.example"));
}
