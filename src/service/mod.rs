//! Service layer
//!
//! Operations exposed to API layers. Services orchestrate the stores and
//! the federation queue.

mod blocklist;
mod follows;

pub use blocklist::BlocklistService;
pub use follows::FollowService;
