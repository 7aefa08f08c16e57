//! Data models
//!
//! Rust structs representing database entities and listing rows.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Servers and actors
// =============================================================================

/// A remote host known to this instance
///
/// Local actors have no server row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Server {
    pub id: String,
    /// Host name, lowercase, with an explicit port when non-default
    pub host: String,
    /// Whether cache-file (redundancy) offers from this host are accepted
    pub redundancy_allowed: bool,
    pub created_at: DateTime<Utc>,
}

/// ActivityPub actor type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum ActorType {
    /// User account
    Person,
    /// Video channel
    Group,
    /// Instance (system) actor
    Application,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "Person",
            Self::Group => "Group",
            Self::Application => "Application",
        }
    }

    /// Parse actor type from its ActivityStreams name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Person" => Some(Self::Person),
            "Group" => Some(Self::Group),
            "Application" | "Service" => Some(Self::Application),
            _ => None,
        }
    }
}

/// A federated identity (account, channel or instance actor)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Actor {
    pub id: String,
    pub actor_type: ActorType,
    pub preferred_username: String,
    /// ActivityPub id (globally unique)
    pub url: String,
    pub inbox_url: String,
    pub shared_inbox_url: Option<String>,
    pub public_key_pem: Option<String>,
    /// Accepted follows targeting this actor (derived)
    pub followers_count: i64,
    /// Accepted follows made by this actor (derived)
    pub following_count: i64,
    /// Hosting server, `None` for local actors
    pub server_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Actor {
    pub fn is_local(&self) -> bool {
        self.server_id.is_none()
    }

    /// Inbox used for delivery: shared inbox when advertised.
    pub fn delivery_inbox(&self) -> &str {
        self.shared_inbox_url.as_deref().unwrap_or(&self.inbox_url)
    }
}

/// Account owning channels and rates
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

/// Video channel, publishes videos under its own actor
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoChannel {
    pub id: String,
    pub name: String,
    pub actor_id: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
}

/// A video, local or remote
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Video {
    pub id: String,
    pub uuid: String,
    pub name: String,
    /// ActivityPub URI (globally unique)
    pub url: String,
    pub channel_id: String,
    /// false if this instance owns the video
    pub remote: bool,
    /// Derived from `account_video_rates`
    pub likes: i64,
    /// Derived from `account_video_rates`
    pub dislikes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Video {
    pub fn is_owned(&self) -> bool {
        !self.remote
    }
}

// =============================================================================
// Follow relationships
// =============================================================================

/// Follow edge state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum FollowState {
    Pending,
    Accepted,
    Rejected,
}

impl FollowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// Directed follow edge between two actors
///
/// At most one edge exists per (actor_id, target_actor_id).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActorFollow {
    pub id: String,
    /// Follower
    pub actor_id: String,
    /// Followed actor
    pub target_actor_id: String,
    pub state: FollowState,
    /// Delivery health credit, edges with score <= 0 are evicted
    pub score: i64,
    /// Follow activity URI (null for legacy/local edges)
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActorFollow {
    pub fn is_bad(&self) -> bool {
        self.score <= 0
    }
}

/// Which derived counter of an actor to rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowDirection {
    /// `followers_count`, edges targeting the actor
    Followers,
    /// `following_count`, edges made by the actor
    Following,
}

/// Follow edge joined with both endpoints, for API listings
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FollowListEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub follow: ActorFollow,
    pub follower_url: String,
    pub follower_username: String,
    pub follower_type: ActorType,
    pub follower_host: Option<String>,
    pub following_url: String,
    pub following_username: String,
    pub following_type: ActorType,
    pub following_host: Option<String>,
}

// =============================================================================
// Rates, shares and cache files
// =============================================================================

/// Rating kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RateType {
    Like,
    Dislike,
}

impl RateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }
}

/// Like or dislike of a video by an account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountVideoRate {
    pub id: String,
    pub account_id: String,
    pub video_id: String,
    pub rate_type: RateType,
    /// Like/Dislike activity URI
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Announce (share) of a video by an actor
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoShare {
    pub id: String,
    pub actor_id: String,
    pub video_id: String,
    /// Announce activity URI
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Cache file offered by a remote instance for a video
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoRedundancy {
    pub id: String,
    /// Actor that created (and may retract) the offer
    pub actor_id: String,
    pub video_id: String,
    /// CacheFile object URI
    pub url: String,
    /// Where the cached copy is served
    pub file_url: String,
    pub expires_on: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Blocklists
// =============================================================================

/// Account-level block
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountBlock {
    pub id: String,
    /// Blocker
    pub account_id: String,
    pub target_account_id: String,
    pub created_at: DateTime<Utc>,
}

/// Server-level block, hides every actor of the server
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServerBlock {
    pub id: String,
    /// Blocker
    pub account_id: String,
    pub target_server_id: String,
    pub created_at: DateTime<Utc>,
}

/// Account block joined with the blocked account, for API listings
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AccountBlockEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub block: AccountBlock,
    pub target_account_name: String,
    pub target_actor_url: String,
    pub target_host: Option<String>,
}

/// Server block joined with the blocked host, for API listings
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServerBlockEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub block: ServerBlock,
    pub host: String,
}

// =============================================================================
// Delivery queue
// =============================================================================

/// One queued (inbox, activity) pair
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryJob {
    pub id: String,
    pub inbox_url: String,
    /// Serialized activity JSON
    pub activity: String,
    pub attempts: i64,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Listing helpers
// =============================================================================

/// Sort order accepted by listing endpoints
///
/// Parsed from `createdAt`, `-createdAt`, `score`, `-score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListSort {
    #[default]
    CreatedAtDesc,
    CreatedAtAsc,
    ScoreDesc,
    ScoreAsc,
}

impl ListSort {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "createdAt" => Some(Self::CreatedAtAsc),
            "-createdAt" => Some(Self::CreatedAtDesc),
            "score" => Some(Self::ScoreAsc),
            "-score" => Some(Self::ScoreDesc),
            _ => None,
        }
    }
}

/// Pagination, sort and search for API listings
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub start: i64,
    pub count: i64,
    pub sort: ListSort,
    pub search: Option<String>,
}

impl ListQuery {
    pub fn new(start: i64, count: i64) -> Self {
        Self {
            start,
            count,
            ..Self::default()
        }
    }

    pub fn with_sort(mut self, sort: ListSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub(crate) fn search_pattern(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| format!("%{}%", value.to_lowercase()))
    }
}

/// Filters for follower/following listings
#[derive(Debug, Clone, Default)]
pub struct FollowListFilter {
    pub state: Option<FollowState>,
    pub actor_type: Option<ActorType>,
}

/// Page of results plus total row count
#[derive(Debug, Clone, Serialize)]
pub struct ResultList<T> {
    pub total: i64,
    pub data: Vec<T>,
}
