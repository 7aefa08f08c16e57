//! Result of processing one inbound activity

use serde::Serialize;

/// Why an activity was accepted without changing anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A referenced actor or video could not be resolved
    UnknownObject,
    /// Remote video, its counters are not tracked here
    NotLocallyOwned,
    /// The record to act on does not exist (never seen, or already undone)
    RecordMissing,
    /// The stored rate no longer has the undone type
    RateTypeMismatch,
    /// The stored record comes from a later activity than the undone one
    Superseded,
    /// Activity or undone kind outside the supported vocabulary
    UnsupportedKind,
    /// Object is not addressed to an actor of this instance
    NotForThisInstance,
    /// Cache-file offers from this server are refused
    RedundancyNotAllowed,
    /// The record was already in the requested state
    AlreadyApplied,
    /// Follow state change not allowed from the edge's current state
    InvalidTransition,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownObject => "unknown_object",
            Self::NotLocallyOwned => "not_locally_owned",
            Self::RecordMissing => "record_missing",
            Self::RateTypeMismatch => "rate_type_mismatch",
            Self::Superseded => "superseded",
            Self::UnsupportedKind => "unsupported_kind",
            Self::NotForThisInstance => "not_for_this_instance",
            Self::RedundancyNotAllowed => "redundancy_not_allowed",
            Self::AlreadyApplied => "already_applied",
            Self::InvalidTransition => "invalid_transition",
        }
    }
}

/// Processing result reported to the inbox collaborator
///
/// Both variants mean "processed"; failures are returned as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum ActivityOutcome {
    Applied,
    Skipped(SkipReason),
}

impl ActivityOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Skipped(_) => "skipped",
        }
    }
}

/// Outcome of an Undo
pub type UndoOutcome = ActivityOutcome;
