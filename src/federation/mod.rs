//! ActivityPub federation module
//!
//! Handles:
//! - Activity parsing and outbound builders
//! - Inbox processing (Follow, Accept, Reject, Like, Dislike, Announce, CacheFile)
//! - Undo processing
//! - Object resolution with bounded fetches
//! - Fan-out to video subscribers through the delivery queue
//! - Follow score tracking and eviction

mod activity;
mod context;
pub mod fanout;
mod outcome;
mod processor;
mod resolver;
mod score;
mod undo;

pub use activity::{
    Activity, ObjectRef, UndoObject, build_accept, build_follow, build_reject, build_undo,
    build_video_update,
};
pub use context::InstanceContext;
pub use outcome::{ActivityOutcome, SkipReason, UndoOutcome};
pub use processor::ActivityProcessor;
pub use resolver::{
    BoundedResolver, DatabaseResolver, HttpObjectResolver, ObjectResolver, authority_of,
};
pub use score::ScoreTracker;
pub use undo::UndoProcessor;
