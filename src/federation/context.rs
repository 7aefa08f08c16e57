//! Instance identity passed to every federation operation

use crate::data::{Account, Actor};

/// The local instance as seen by federation handlers
///
/// The system account is the implicit blocker for instance-wide moderation
/// and the follower in instance-to-instance follows.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    pub system_account: Account,
    pub system_actor: Actor,
    /// e.g. "https://videos.example.com"
    pub base_url: String,
}

impl InstanceContext {
    pub fn new(system_account: Account, system_actor: Actor, base_url: impl Into<String>) -> Self {
        Self {
            system_account,
            system_actor,
            base_url: base_url.into(),
        }
    }

    /// Fresh activity id under the instance's URL space
    pub fn activity_url(&self, kind: &str) -> String {
        format!(
            "{}/activities/{}/{}",
            self.base_url.trim_end_matches('/'),
            kind,
            ulid::Ulid::new().to_string().to_lowercase()
        )
    }
}
