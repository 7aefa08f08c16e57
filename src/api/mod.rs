//! API layer
//!
//! Operational endpoints only. Inbox routing, signature checks and the REST
//! API live in the embedding server, which calls the services directly.

mod health;
mod metrics;

pub use health::health_router;
pub use metrics::metrics_router;
