//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use vidfed::data::directory::{self, NewActor};
use vidfed::data::{delivery, follows, Actor, ActorFollow, ActorType, Database, FollowState, RetryPolicy, Video};
use vidfed::{AppState, config};

pub const LOCAL_DOMAIN: &str = "videos.test.example";

static METRICS: Once = Once::new();

/// Register instruments once per test binary
pub fn init_metrics() {
    METRICS.call_once(vidfed::metrics::init_metrics);
}

/// Configuration pointing at a throwaway database
pub fn test_config(db_path: std::path::PathBuf) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            domain: LOCAL_DOMAIN.to_string(),
            protocol: "https".to_string(),
        },
        database: config::DatabaseConfig {
            path: db_path,
            max_connections: 8,
        },
        federation: config::FederationConfig {
            system_actor_name: "instance".to_string(),
            transaction_retries: 10,
            retry_backoff_ms: 5,
            fetch_timeout_seconds: 2,
            eviction_interval_seconds: 3600,
            auto_accept_instance_follows: true,
            user_agent: "vidfed-tests".to_string(),
            score: config::ScoreConfig::default(),
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        init_metrics();

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path().join("test.db"));

        let db = Database::connect_with(&config.database.path, config.database.max_connections)
            .await
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: config.federation.transaction_retries,
                backoff: Duration::from_millis(config.federation.retry_backoff_ms),
            });
        let state = AppState::with_database(config, db).await.unwrap();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = vidfed::build_router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: format!("http://{}", addr),
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.state.db
    }

    pub fn system_actor(&self) -> &Actor {
        &self.state.ctx.system_actor
    }

    pub fn system_account_id(&self) -> &str {
        &self.state.ctx.system_account.id
    }

    /// Local person actor with its account
    pub async fn local_actor(&self, name: &str) -> Actor {
        let url = format!("https://{LOCAL_DOMAIN}/accounts/{name}");
        self.insert_actor(ActorType::Person, name, &url, None).await
    }

    /// Remote actor hosted on `host`, with its account
    pub async fn remote_actor(&self, name: &str, host: &str) -> Actor {
        let url = format!("https://{host}/accounts/{name}");
        self.insert_actor(ActorType::Person, name, &url, Some(host)).await
    }

    /// Instance actor of a remote server
    pub async fn remote_instance(&self, host: &str) -> Actor {
        let url = format!("https://{host}/accounts/instance");
        self.insert_actor(ActorType::Application, "instance", &url, Some(host))
            .await
    }

    async fn insert_actor(&self, kind: ActorType, name: &str, url: &str, host: Option<&str>) -> Actor {
        let mut conn = self.db().pool().acquire().await.unwrap();
        let server_id = match host {
            Some(host) => Some(directory::find_or_create_server(&mut conn, host).await.unwrap().id),
            None => None,
        };
        let actor = directory::upsert_actor(
            &mut conn,
            &NewActor {
                actor_type: kind,
                preferred_username: name.to_string(),
                url: url.to_string(),
                inbox_url: format!("{url}/inbox"),
                shared_inbox_url: host.map(|host| format!("https://{host}/inbox")),
                public_key_pem: None,
                server_id,
            },
        )
        .await
        .unwrap();
        directory::find_or_create_account(&mut conn, &actor.id, name)
            .await
            .unwrap();
        actor
    }

    pub async fn account_id_of(&self, actor: &Actor) -> String {
        directory::get_account_by_actor(self.db().pool(), &actor.id)
            .await
            .unwrap()
            .unwrap()
            .id
    }

    /// Local video published by a channel of `owner`
    ///
    /// Returns the channel actor and the video.
    pub async fn local_video(&self, owner: &Actor, channel_name: &str) -> (Actor, Video) {
        let url = format!("https://{LOCAL_DOMAIN}/video-channels/{channel_name}");
        let channel_actor = {
            let mut conn = self.db().pool().acquire().await.unwrap();
            directory::upsert_actor(
                &mut conn,
                &NewActor {
                    actor_type: ActorType::Group,
                    preferred_username: channel_name.to_string(),
                    url: url.clone(),
                    inbox_url: format!("{url}/inbox"),
                    shared_inbox_url: None,
                    public_key_pem: None,
                    server_id: None,
                },
            )
            .await
            .unwrap()
        };

        let owner_account = self.account_id_of(owner).await;
        let channel = directory::create_channel(self.db().pool(), &channel_actor.id, &owner_account, channel_name)
            .await
            .unwrap();
        let video_url = format!("https://{LOCAL_DOMAIN}/videos/watch/{}", ulid::Ulid::new());
        let video = directory::create_video(self.db().pool(), &channel.id, "clip", &video_url, false)
            .await
            .unwrap();
        (channel_actor, video)
    }

    /// Insert a follow edge directly
    pub async fn follow(&self, follower: &Actor, target: &Actor, state: FollowState) -> ActorFollow {
        let mut conn = self.db().pool().acquire().await.unwrap();
        let (edge, _) = follows::find_or_create(
            &mut conn,
            &follower.id,
            &target.id,
            None,
            state,
            self.state.config.federation.score.base,
        )
        .await
        .unwrap();
        edge
    }

    pub async fn reload(&self, actor: &Actor) -> Actor {
        directory::get_actor(self.db().pool(), &actor.id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn reload_video(&self, video: &Video) -> Video {
        directory::get_video(self.db().pool(), &video.id)
            .await
            .unwrap()
            .unwrap()
    }

    /// Activities waiting in the outbox for `inbox_url`
    pub async fn queued_for(&self, inbox_url: &str) -> Vec<serde_json::Value> {
        delivery::pending_jobs_for_inbox(self.db().pool(), inbox_url)
            .await
            .unwrap()
            .iter()
            .map(|job| serde_json::from_str(&job.activity).unwrap())
            .collect()
    }

    /// Feed an inbound activity through the inbox processor
    pub async fn receive(
        &self,
        activity: serde_json::Value,
        sender: &Actor,
    ) -> Result<vidfed::federation::ActivityOutcome, vidfed::error::AppError> {
        self.state
            .processor
            .process(&self.state.ctx, &activity, sender)
            .await
    }
}
