//! vidfed binary entry point

use vidfed::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Initialize metrics
/// 3. Load configuration from file and environment
/// 4. Initialize AppState
/// 5. Start background tasks (eviction sweep)
/// 6. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("VIDFED__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "vidfed=info,tower_http=info".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "vidfed=info,tower_http=info".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting vidfed...");

    // 2. Initialize metrics
    vidfed::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        "Configuration loaded"
    );

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Start background tasks
    spawn_eviction_task(state.clone());

    // 6. Start HTTP server
    let app = vidfed::build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app).await?;

    Ok(())
}

/// Spawn the periodic sweep: bad follows, then expired cache files
fn spawn_eviction_task(state: AppState) {
    tokio::spawn(async move {
        let interval_secs = state.config.federation.eviction_interval_seconds.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            match state.scores.evict_bad_follows().await {
                Ok(evicted) => tracing::debug!(evicted, "Follow eviction sweep completed"),
                Err(e) => tracing::error!(error = %e, "Follow eviction sweep failed"),
            }

            match vidfed::data::objects::delete_expired_redundancies(
                state.db.pool(),
                chrono::Utc::now(),
            )
            .await
            {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Expired cache files removed"),
                Err(e) => tracing::error!(error = %e, "Cache file expiry failed"),
            }
        }
    });

    tracing::info!("Eviction task spawned");
}
