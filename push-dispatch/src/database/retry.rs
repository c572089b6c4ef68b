//! Busy-retry for SQLite writes.
//!
//! Delivery tasks finish concurrently and each one writes its subscription's
//! bookkeeping row, so single-row writes can meet `SQLITE_BUSY` under WAL.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::domain::RetryPolicy;
use crate::{Error, Result};

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

fn busy_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 9,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(1),
        jitter: true,
    }
}

/// sqlx reports extended result codes; the primary code is the low byte.
fn is_busy_code(code: &str) -> bool {
    code.parse::<i32>()
        .is_ok_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

fn mentions_lock(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("database is locked") || message.contains("database is busy")
}

impl Error {
    /// Whether SQLite rejected the statement because another writer held the lock.
    pub fn is_sqlite_busy(&self) -> bool {
        match self {
            Error::DatabaseSqlx(sqlx::Error::Database(db_err)) => {
                db_err.code().is_some_and(|code| is_busy_code(&code))
                    || mentions_lock(db_err.message())
            }
            Error::DatabaseSqlx(other) => mentions_lock(&other.to_string()),
            _ => false,
        }
    }
}

/// Run `op`, backing off with jitter while SQLite reports busy or locked.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let policy = busy_policy();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op().await {
            Err(err) if err.is_sqlite_busy() && policy.should_retry(attempts) => {
                let delay = policy.delay_for_attempt(attempts);
                debug!(op = op_name, attempts, ?delay, "SQLite busy, retrying");
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}
