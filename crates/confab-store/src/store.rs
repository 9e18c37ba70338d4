//! Async facade over [`Database`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Shared handle to one database connection.
///
/// Calls are serialized on the connection, run on tokio's blocking pool and
/// fail with [`StoreError::Timeout`] once they exceed the configured
/// deadline. A call that times out is not cancelled; its write may still
/// land.
#[derive(Clone)]
pub struct ChatStore {
    db: Arc<Mutex<Database>>,
    timeout: Duration,
}

impl ChatStore {
    pub fn new(db: Database, timeout: Duration) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `f` against the database.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StoreError::Task(join_err.to_string())),
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "store call timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}
