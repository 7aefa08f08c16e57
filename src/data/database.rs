//! SQLite database operations
//!
//! Owns the connection pool and the transaction combinator every mutating
//! federation operation runs through. Query functions live in the sibling
//! store modules and take an executor or a connection.

use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};

use crate::error::AppError;

/// Open transaction handed to a unit of work
pub type Tx = Transaction<'static, Sqlite>;

/// Bounded retry applied to transient conflicts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Linear backoff step, multiplied by the attempt number
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(20),
        }
    }
}

/// Database connection pool wrapper
pub struct Database {
    pool: Pool<Sqlite>,
    retry: RetryPolicy,
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        Self::connect_with(path, 8).await
    }

    /// Connect with an explicit pool size
    pub async fn connect_with(path: &Path, max_connections: u32) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
            }
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self {
            pool,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy used by [`Database::transaction`]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Shared pool for single-statement reads
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Run `work` inside a transaction, retrying transient conflicts
    ///
    /// The unit of work receives the open transaction and hands it back with
    /// its result. `Ok` commits; `Err` drops the transaction, which rolls it
    /// back. Busy/locked/serialization failures are retried with linear
    /// backoff up to the configured attempt count, then surface as
    /// [`AppError::TransactionConflict`]. Any other error is returned as is.
    ///
    /// `work` may run more than once, so it must not consume its captures.
    pub async fn transaction<T, F, Fut>(&self, label: &'static str, mut work: F) -> Result<T, AppError>
    where
        F: FnMut(Tx) -> Fut,
        Fut: Future<Output = Result<(Tx, T), AppError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = async {
                let tx = self.pool.begin().await?;
                let (tx, value) = work(tx).await?;
                tx.commit().await?;
                Ok::<T, AppError>(value)
            }
            .await;

            match result {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient_conflict() => {
                    crate::metrics::TX_RETRIES_TOTAL
                        .with_label_values(&[label])
                        .inc();

                    if attempt >= max_attempts {
                        tracing::warn!(
                            label,
                            attempts = attempt,
                            error = %error,
                            "Transaction retries exhausted"
                        );
                        return Err(AppError::TransactionConflict {
                            label,
                            attempts: attempt,
                        });
                    }

                    tracing::warn!(
                        label,
                        attempt,
                        error = %error,
                        "Transient transaction conflict, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
