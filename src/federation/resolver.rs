//! Object resolution
//!
//! Turns object URLs found in activities into local records. Known records
//! come from the database; unknown remote actors are fetched over HTTP and
//! persisted together with their server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::data::{directory, Actor, ActorType, Database, Video};
use crate::error::AppError;

/// Resolves object URLs to local records
///
/// `Ok(None)` means the object is unknown.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectResolver: Send + Sync {
    async fn resolve_actor(&self, url: &str) -> Result<Option<Actor>, AppError>;
    async fn resolve_video(&self, url: &str) -> Result<Option<Video>, AppError>;
}

/// Resolver limited to records already in the database
pub struct DatabaseResolver {
    db: Arc<Database>,
}

impl DatabaseResolver {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ObjectResolver for DatabaseResolver {
    async fn resolve_actor(&self, url: &str) -> Result<Option<Actor>, AppError> {
        directory::get_actor_by_url(self.db.pool(), url).await
    }

    async fn resolve_video(&self, url: &str) -> Result<Option<Video>, AppError> {
        directory::get_video_by_url(self.db.pool(), url).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteActorDocument {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    preferred_username: String,
    inbox: String,
    endpoints: Option<RemoteEndpoints>,
    public_key: Option<RemotePublicKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteEndpoints {
    shared_inbox: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemotePublicKey {
    public_key_pem: String,
}

/// `host[:port]` of an absolute URL
pub fn authority_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

/// Database-first resolver that fetches unknown remote actors
pub struct HttpObjectResolver {
    db: Arc<Database>,
    http_client: reqwest::Client,
    /// Local authority, never fetched
    local_authority: Option<String>,
}

impl HttpObjectResolver {
    pub fn new(
        db: Arc<Database>,
        base_url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            db,
            http_client,
            local_authority: authority_of(base_url),
        })
    }

    async fn fetch_actor(&self, url: &str) -> Result<Actor, AppError> {
        let authority = authority_of(url)
            .ok_or_else(|| AppError::Validation(format!("Invalid actor URL: {url}")))?;

        if self.local_authority.as_deref() == Some(authority.as_str()) {
            return Err(AppError::NotFound);
        }

        let response = self
            .http_client
            .get(url)
            .header("Accept", "application/activity+json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "Failed to fetch actor: HTTP {}",
                response.status()
            )));
        }

        let document: RemoteActorDocument = response
            .json()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to parse actor: {}", e)))?;

        if authority_of(&document.id).as_deref() != Some(authority.as_str()) {
            return Err(AppError::Federation(format!(
                "Actor document {} is not hosted on {}",
                document.id, authority
            )));
        }

        let actor_type = ActorType::parse(&document.kind).ok_or_else(|| {
            AppError::Federation(format!("Unsupported actor type: {}", document.kind))
        })?;

        let new_actor = directory::NewActor {
            actor_type,
            preferred_username: document.preferred_username.clone(),
            url: document.id.clone(),
            inbox_url: document.inbox.clone(),
            shared_inbox_url: document.endpoints.and_then(|e| e.shared_inbox),
            public_key_pem: document.public_key.map(|k| k.public_key_pem),
            server_id: None,
        };
        let new_actor = &new_actor;
        let authority = authority.as_str();

        let actor = self
            .db
            .transaction("persist_remote_actor", |mut tx| async move {
                let server = directory::find_or_create_server(&mut tx, authority).await?;
                let mut with_server = new_actor.clone();
                with_server.server_id = Some(server.id);
                let actor = directory::upsert_actor(&mut tx, &with_server).await?;
                if actor.actor_type != ActorType::Group {
                    directory::find_or_create_account(&mut tx, &actor.id, &actor.preferred_username)
                        .await?;
                }
                Ok((tx, actor))
            })
            .await?;

        tracing::info!(actor = %actor.url, server = %authority, "Persisted remote actor");
        Ok(actor)
    }
}

#[async_trait]
impl ObjectResolver for HttpObjectResolver {
    async fn resolve_actor(&self, url: &str) -> Result<Option<Actor>, AppError> {
        if let Some(actor) = directory::get_actor_by_url(self.db.pool(), url).await? {
            return Ok(Some(actor));
        }

        self.fetch_actor(url).await.map(Some)
    }

    async fn resolve_video(&self, url: &str) -> Result<Option<Video>, AppError> {
        // Remote video import is handled outside the federation core.
        directory::get_video_by_url(self.db.pool(), url).await
    }
}

/// Resolver with a deadline on every call
///
/// A timeout aborts the activity with a retryable error. Database errors and
/// nested timeouts propagate. Any other failure is logged and reported as an unknown object.
#[derive(Clone)]
pub struct BoundedResolver {
    inner: Arc<dyn ObjectResolver>,
    timeout: Duration,
}

impl BoundedResolver {
    pub fn new(inner: Arc<dyn ObjectResolver>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub async fn actor(&self, url: &str) -> Result<Option<Actor>, AppError> {
        let result = tokio::time::timeout(self.timeout, self.inner.resolve_actor(url)).await;
        settle(url, result)
    }

    pub async fn video(&self, url: &str) -> Result<Option<Video>, AppError> {
        let result = tokio::time::timeout(self.timeout, self.inner.resolve_video(url)).await;
        settle(url, result)
    }
}

fn settle<T>(
    url: &str,
    result: Result<Result<Option<T>, AppError>, tokio::time::error::Elapsed>,
) -> Result<Option<T>, AppError> {
    match result {
        Err(_) => {
            tracing::warn!(object = %url, "Timed out resolving object");
            Err(AppError::ResolveTimeout(url.to_string()))
        }
        Ok(Ok(found)) => Ok(found),
        Ok(Err(
            error @ (AppError::Database(_)
            | AppError::TransactionConflict { .. }
            | AppError::ResolveTimeout(_)),
        )) => {
            Err(error)
        }
        Ok(Err(error)) => {
            tracing::warn!(object = %url, error = %error, "Could not resolve object, treating it as unknown");
            Ok(None)
        }
    }
}
