//! Activity vocabulary
//!
//! Closed set of the activity kinds the core reacts to, parsed from inbound
//! JSON, plus builders for the activities the core emits.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::data::{RateType, Video};

const ACTIVITYSTREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// `object`/`actor` value: either a bare URL or an embedded object with an id
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ObjectRef {
    Url(String),
    Object { id: String },
}

impl ObjectRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Object { id } => id,
        }
    }
}

/// Inbound activity
///
/// Unrecognized `type` values land in [`Activity::Unknown`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Activity {
    Follow(Follow),
    Accept(FollowResponse),
    Reject(FollowResponse),
    Undo(Undo),
    Like(Rate),
    Dislike(Rate),
    Announce(Announce),
    Create(Create),
    #[serde(other)]
    Unknown,
}

impl Activity {
    /// Parse raw activity JSON
    pub fn parse(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Activity::deserialize(value)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Follow(_) => "Follow",
            Self::Accept(_) => "Accept",
            Self::Reject(_) => "Reject",
            Self::Undo(_) => "Undo",
            Self::Like(_) => "Like",
            Self::Dislike(_) => "Dislike",
            Self::Announce(_) => "Announce",
            Self::Create(create) => match create.object {
                CreateObject::CacheFile(_) => "Create(CacheFile)",
                CreateObject::Unknown => "Create",
            },
            Self::Unknown => "Unknown",
        }
    }

    /// Actor URL, absent only for unknown kinds
    pub fn actor(&self) -> Option<&str> {
        match self {
            Self::Follow(follow) => Some(follow.actor.id()),
            Self::Accept(response) | Self::Reject(response) => Some(response.actor.id()),
            Self::Undo(undo) => Some(undo.actor.id()),
            Self::Like(rate) | Self::Dislike(rate) => Some(rate.actor.id()),
            Self::Announce(announce) => Some(announce.actor.id()),
            Self::Create(create) => Some(create.actor.id()),
            Self::Unknown => None,
        }
    }

    /// Activity id, when carried
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Follow(follow) => follow.id.as_deref(),
            Self::Accept(response) | Self::Reject(response) => response.id.as_deref(),
            Self::Undo(undo) => undo.id.as_deref(),
            Self::Like(rate) | Self::Dislike(rate) => rate.id.as_deref(),
            Self::Announce(announce) => Some(&announce.id),
            Self::Create(create) => create.id.as_deref(),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Follow {
    pub id: Option<String>,
    pub actor: ObjectRef,
    pub object: ObjectRef,
}

/// Accept or Reject of a Follow
#[derive(Debug, Clone, Deserialize)]
pub struct FollowResponse {
    pub id: Option<String>,
    pub actor: ObjectRef,
    pub object: FollowReference,
}

/// The Follow an Accept/Reject answers
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FollowReference {
    Embedded(Box<Follow>),
    Url(String),
}

/// Like or Dislike
#[derive(Debug, Clone, Deserialize)]
pub struct Rate {
    pub id: Option<String>,
    pub actor: ObjectRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Announce {
    pub id: String,
    pub actor: ObjectRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Create {
    pub id: Option<String>,
    pub actor: ObjectRef,
    pub object: CreateObject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum CreateObject {
    CacheFile(CacheFile),
    #[serde(other)]
    Unknown,
}

/// Cache file (redundancy) offer
#[derive(Debug, Clone, Deserialize)]
pub struct CacheFile {
    pub id: String,
    /// Video being mirrored
    pub object: ObjectRef,
    pub url: Link,
    pub expires: Option<DateTime<Utc>>,
}

/// `url` value of a cache file
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Link {
    Href(String),
    Object { href: String },
    Many(Vec<Link>),
}

impl Link {
    /// First usable href
    pub fn href(&self) -> Option<&str> {
        match self {
            Self::Href(href) | Self::Object { href } => Some(href),
            Self::Many(links) => links.iter().find_map(Link::href),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Undo {
    pub id: Option<String>,
    pub actor: ObjectRef,
    pub object: UndoObject,
}

/// What an Undo retracts
///
/// Compact payloads carry only the URL of the undone activity.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UndoObject {
    Embedded(Box<Activity>),
    Url(String),
    Reference { id: String },
}

impl RateType {
    pub fn activity_type(&self) -> &'static str {
        match self {
            RateType::Like => "Like",
            RateType::Dislike => "Dislike",
        }
    }
}

// =============================================================================
// Outbound builders
// =============================================================================

/// Follow of `object_url` by `actor_url`
pub fn build_follow(id: &str, actor_url: &str, object_url: &str) -> serde_json::Value {
    json!({
        "@context": ACTIVITYSTREAMS_CONTEXT,
        "id": id,
        "type": "Follow",
        "actor": actor_url,
        "object": object_url,
    })
}

fn embedded_follow(follow_url: Option<&str>, follower_url: &str, target_url: &str) -> serde_json::Value {
    let mut follow = json!({
        "type": "Follow",
        "actor": follower_url,
        "object": target_url,
    });
    if let Some(url) = follow_url {
        follow["id"] = json!(url);
    }
    follow
}

/// Accept sent by the followed actor
pub fn build_accept(
    id: &str,
    follow_url: Option<&str>,
    follower_url: &str,
    target_url: &str,
) -> serde_json::Value {
    json!({
        "@context": ACTIVITYSTREAMS_CONTEXT,
        "id": id,
        "type": "Accept",
        "actor": target_url,
        "object": embedded_follow(follow_url, follower_url, target_url),
    })
}

/// Reject sent by the followed actor
pub fn build_reject(
    id: &str,
    follow_url: Option<&str>,
    follower_url: &str,
    target_url: &str,
) -> serde_json::Value {
    json!({
        "@context": ACTIVITYSTREAMS_CONTEXT,
        "id": id,
        "type": "Reject",
        "actor": target_url,
        "object": embedded_follow(follow_url, follower_url, target_url),
    })
}

/// Undo wrapping `object`
pub fn build_undo(id: &str, actor_url: &str, object: serde_json::Value) -> serde_json::Value {
    json!({
        "@context": ACTIVITYSTREAMS_CONTEXT,
        "id": id,
        "type": "Undo",
        "actor": actor_url,
        "object": object,
    })
}

/// Update of a video carrying its current rating counters
pub fn build_video_update(id: &str, actor_url: &str, video: &Video) -> serde_json::Value {
    json!({
        "@context": ACTIVITYSTREAMS_CONTEXT,
        "id": id,
        "type": "Update",
        "actor": actor_url,
        "to": ["https://www.w3.org/ns/activitystreams#Public"],
        "object": {
            "id": video.url,
            "type": "Video",
            "uuid": video.uuid,
            "name": video.name,
            "likes": video.likes,
            "dislikes": video.dislikes,
            "updated": video.updated_at.to_rfc3339(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_follow_with_string_object() {
        let activity = Activity::parse(&json!({
            "type": "Follow",
            "id": "https://remote.example/follows/1",
            "actor": "https://remote.example/accounts/alice",
            "object": "https://local.example/accounts/instance"
        }))
        .unwrap();

        let Activity::Follow(follow) = activity else {
            panic!("expected Follow");
        };
        assert_eq!(follow.actor.id(), "https://remote.example/accounts/alice");
        assert_eq!(follow.object.id(), "https://local.example/accounts/instance");
    }

    #[test]
    fn parse_actor_as_embedded_object() {
        let activity = Activity::parse(&json!({
            "type": "Like",
            "id": "https://remote.example/likes/1",
            "actor": { "id": "https://remote.example/accounts/alice", "type": "Person" },
            "object": "https://local.example/videos/watch/1"
        }))
        .unwrap();
        assert_eq!(activity.actor(), Some("https://remote.example/accounts/alice"));
        assert_eq!(activity.kind(), "Like");
    }

    #[test]
    fn unknown_type_parses_to_unknown() {
        let activity = Activity::parse(&json!({
            "type": "Flag",
            "actor": "https://remote.example/accounts/alice",
            "object": "https://local.example/videos/watch/1"
        }))
        .unwrap();
        assert!(matches!(activity, Activity::Unknown));
        assert_eq!(activity.actor(), None);
    }

    #[test]
    fn undo_with_embedded_like() {
        let activity = Activity::parse(&json!({
            "type": "Undo",
            "actor": "https://remote.example/accounts/alice",
            "object": {
                "type": "Like",
                "id": "https://remote.example/likes/1",
                "actor": "https://remote.example/accounts/alice",
                "object": "https://local.example/videos/watch/1"
            }
        }))
        .unwrap();

        let Activity::Undo(undo) = activity else {
            panic!("expected Undo");
        };
        let UndoObject::Embedded(inner) = undo.object else {
            panic!("expected embedded activity");
        };
        assert!(matches!(*inner, Activity::Like(_)));
    }

    #[test]
    fn undo_with_url_or_bare_reference() {
        let compact = Activity::parse(&json!({
            "type": "Undo",
            "actor": "https://remote.example/accounts/alice",
            "object": "https://remote.example/likes/1"
        }))
        .unwrap();
        let Activity::Undo(undo) = compact else {
            panic!("expected Undo");
        };
        assert!(matches!(undo.object, UndoObject::Url(ref url) if url == "https://remote.example/likes/1"));

        let reference = Activity::parse(&json!({
            "type": "Undo",
            "actor": "https://remote.example/accounts/alice",
            "object": { "id": "https://remote.example/likes/1" }
        }))
        .unwrap();
        let Activity::Undo(undo) = reference else {
            panic!("expected Undo");
        };
        assert!(matches!(undo.object, UndoObject::Reference { .. }));
    }

    #[test]
    fn undo_of_unknown_kind_is_embedded_unknown() {
        let activity = Activity::parse(&json!({
            "type": "Undo",
            "actor": "https://remote.example/accounts/alice",
            "object": { "type": "Block", "id": "https://remote.example/blocks/1" }
        }))
        .unwrap();
        let Activity::Undo(undo) = activity else {
            panic!("expected Undo");
        };
        assert!(matches!(undo.object, UndoObject::Embedded(ref inner) if matches!(**inner, Activity::Unknown)));
    }

    #[test]
    fn create_cache_file_with_link_object() {
        let activity = Activity::parse(&json!({
            "type": "Create",
            "id": "https://mirror.example/redundancy/1/create",
            "actor": "https://mirror.example/accounts/instance",
            "object": {
                "type": "CacheFile",
                "id": "https://mirror.example/redundancy/videos/1",
                "object": "https://local.example/videos/watch/1",
                "expires": "2030-01-01T00:00:00Z",
                "url": { "type": "Link", "mediaType": "video/mp4", "href": "https://mirror.example/static/1.mp4" }
            }
        }))
        .unwrap();

        assert_eq!(activity.kind(), "Create(CacheFile)");
        let Activity::Create(create) = activity else {
            panic!("expected Create");
        };
        let CreateObject::CacheFile(cache_file) = create.object else {
            panic!("expected CacheFile");
        };
        assert_eq!(cache_file.url.href(), Some("https://mirror.example/static/1.mp4"));
        assert!(cache_file.expires.is_some());
    }

    #[test]
    fn create_of_other_object_is_unknown() {
        let activity = Activity::parse(&json!({
            "type": "Create",
            "actor": "https://remote.example/accounts/alice",
            "object": { "type": "Note", "id": "https://remote.example/notes/1" }
        }))
        .unwrap();
        assert_eq!(activity.kind(), "Create");
    }

    #[test]
    fn accept_with_embedded_follow() {
        let activity = Activity::parse(&build_accept(
            "https://remote.example/accepts/1",
            Some("https://local.example/follows/1"),
            "https://local.example/accounts/instance",
            "https://remote.example/accounts/instance",
        ))
        .unwrap();

        let Activity::Accept(accept) = activity else {
            panic!("expected Accept");
        };
        let FollowReference::Embedded(follow) = accept.object else {
            panic!("expected embedded follow");
        };
        assert_eq!(follow.actor.id(), "https://local.example/accounts/instance");
        assert_eq!(follow.id.as_deref(), Some("https://local.example/follows/1"));
    }

    #[test]
    fn link_many_uses_first_href() {
        let link: Link = serde_json::from_value(json!([
            { "type": "Link", "href": "https://mirror.example/a.m3u8" },
            { "type": "Link", "href": "https://mirror.example/b.m3u8" }
        ]))
        .unwrap();
        assert_eq!(link.href(), Some("https://mirror.example/a.m3u8"));
    }
}
