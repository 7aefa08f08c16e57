//! vidfed - federation core of a decentralized video-hosting instance
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 API Layer (Axum, operational)                │
//! │  - /health, /metrics                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Service / Federation Layer                      │
//! │  - Inbox and Undo processing                                │
//! │  - Follow and blocklist services                            │
//! │  - Score tracking, eviction, fan-out                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx), retried transactions                      │
//! │  - Delivery queue table                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: operational HTTP handlers
//! - `service`: follow and blocklist operations for API layers
//! - `federation`: activity processing, resolution, fan-out, scores
//! - `data`: database stores
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod service;

use std::sync::Arc;

use federation::{
    ActivityProcessor, BoundedResolver, HttpObjectResolver, InstanceContext, ScoreTracker,
};

/// Application state shared across all handlers and background jobs
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Local instance identity
    pub ctx: Arc<InstanceContext>,

    /// Bounded object resolver
    pub resolver: BoundedResolver,

    /// Inbox processor
    pub processor: Arc<ActivityProcessor>,

    /// Follow score tracker
    pub scores: Arc<ScoreTracker>,

    pub follows: Arc<service::FollowService>,
    pub blocklist: Arc<service::BlocklistService>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Ensure the system actor exists
    /// 3. Build resolver, processors and services
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = data::Database::connect_with(&config.database.path, config.database.max_connections)
            .await?
            .with_retry_policy(config.federation.retry_policy());
        tracing::info!(path = %config.database.path.display(), "Database connected");

        Self::with_database(config, db).await
    }

    /// Initialize application state on an existing database
    pub async fn with_database(
        config: config::AppConfig,
        db: data::Database,
    ) -> Result<Self, error::AppError> {
        let db = Arc::new(db);
        let base_url = config.server.base_url();
        let federation = &config.federation;

        let ctx = ensure_system_actor(&db, &federation.system_actor_name, &base_url).await?;

        let http_resolver = HttpObjectResolver::new(
            db.clone(),
            &base_url,
            &federation.user_agent,
            federation.fetch_timeout(),
        )?;
        let resolver = BoundedResolver::new(Arc::new(http_resolver), federation.fetch_timeout());

        let processor = ActivityProcessor::new(
            db.clone(),
            resolver.clone(),
            federation.score,
            federation.auto_accept_instance_follows,
        );
        let scores = ScoreTracker::new(db.clone(), federation.score, ctx.system_actor.id.clone());
        let follows = service::FollowService::new(db.clone(), resolver.clone(), federation.score);
        let blocklist = service::BlocklistService::new(db.clone());

        tracing::info!(
            system_actor = %ctx.system_actor.url,
            "Application state initialized successfully"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            ctx: Arc::new(ctx),
            resolver,
            processor: Arc::new(processor),
            scores: Arc::new(scores),
            follows: Arc::new(follows),
            blocklist: Arc::new(blocklist),
        })
    }
}

/// Create or refresh the local instance actor and its account
///
/// The actor lives at `{base_url}/accounts/{name}` and receives on the
/// instance's shared inbox.
pub async fn ensure_system_actor(
    db: &data::Database,
    name: &str,
    base_url: &str,
) -> Result<InstanceContext, error::AppError> {
    let base_url = base_url.trim_end_matches('/');
    let actor_url = format!("{base_url}/accounts/{name}");
    let new_actor = data::directory::NewActor {
        actor_type: data::ActorType::Application,
        preferred_username: name.to_string(),
        url: actor_url.clone(),
        inbox_url: format!("{actor_url}/inbox"),
        shared_inbox_url: Some(format!("{base_url}/inbox")),
        public_key_pem: None,
        server_id: None,
    };
    let new_actor = &new_actor;

    let (actor, account) = db
        .transaction("ensure_system_actor", |mut tx| async move {
            let actor = data::directory::upsert_actor(&mut tx, new_actor).await?;
            let account = data::directory::find_or_create_account(&mut tx, &actor.id, name).await?;
            Ok((tx, (actor, account)))
        })
        .await?;

    tracing::info!(actor = %actor.url, "System actor ready");
    Ok(InstanceContext::new(account, actor, base_url))
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    Router::new()
        .merge(api::health_router())
        .merge(api::metrics_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
