// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite plumbing shared by the disk tier and the redelivery queue.
//!
//! Both open their file in WAL mode with `synchronous = NORMAL`, and retry
//! statements that hit `SQLITE_BUSY`/`SQLITE_LOCKED` with a short capped
//! backoff.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tracing::{debug, info, warn};

use crate::error::{AccessError, Result};
use crate::resilience::retry::{retry, RetryConfig};

const BUSY_RETRY_MAX_ATTEMPTS: u32 = 5;
const BUSY_RETRY_BASE_DELAY_MS: u64 = 10;
const BUSY_RETRY_MAX_DELAY_MS: u64 = 500;

/// Path that opens a private in-memory database (tests, ephemeral engines).
pub const IN_MEMORY: &str = ":memory:";

/// Open a pool on `path`, creating the file if needed.
///
/// Connection failures are retried with the startup preset so a bad path
/// fails within a few seconds.
pub(crate) async fn open_pool(path: &str, label: &str) -> Result<SqlitePool> {
    info!(path, store = label, "Opening SQLite store");

    let (url, max_connections) = if path == IN_MEMORY {
        // Every connection to :memory: is a separate database
        ("sqlite::memory:".to_string(), 1)
    } else {
        (format!("sqlite://{path}?mode=rwc"), 4)
    };

    let options = SqliteConnectOptions::from_str(&url)
        .map_err(|e| AccessError::Configuration(format!("Invalid SQLite path '{path}': {e}")))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    retry(label, &RetryConfig::startup(), || {
        let options = options.clone();
        async move {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                // Recycling the only :memory: connection would drop the database
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
                .map_err(AccessError::from)
        }
    })
    .await
}

fn is_busy(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Run a statement, retrying while SQLite reports the database busy.
pub(crate) async fn with_busy_retry<F, Fut, T>(operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = BUSY_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation, attempts, "SQLite operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_busy(&e) && attempts < BUSY_RETRY_MAX_ATTEMPTS => {
                warn!(operation, attempts, delay_ms, "SQLite busy, retrying");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(BUSY_RETRY_MAX_DELAY_MS);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let pool = open_pool(IN_MEMORY, "test").await.unwrap();
        let one: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(one.0, 1);
    }

    #[tokio::test]
    async fn test_open_file_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let pool = open_pool(path.to_str().unwrap(), "test").await.unwrap();
        sqlx::query("CREATE TABLE t (x INTEGER)").execute(&pool).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_busy_retry_passes_through_other_errors() {
        let pool = open_pool(IN_MEMORY, "test").await.unwrap();
        let err = with_busy_retry("bad_sql", || async { sqlx::query("SELEC nonsense").execute(&pool).await })
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Storage(_)));
    }
}
