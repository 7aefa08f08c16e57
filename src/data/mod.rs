//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite connection pool and transaction combinator
//! - Follow graph, blocklist, rate/share/cache-file stores
//! - Delivery outbox

mod database;
mod models;

pub mod blocklist;
pub mod delivery;
pub mod directory;
pub mod follows;
pub mod objects;

pub use database::{Database, RetryPolicy, Tx};
pub use models::*;
