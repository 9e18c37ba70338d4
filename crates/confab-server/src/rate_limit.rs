//! Per-connection flood control for inbound events.
//!
//! Each connection earns event credit at a steady rate, capped at a burst
//! ceiling, and every inbound event spends one credit. A refused event is
//! answered with how long the client should wait before the next one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use confab_shared::constants::{DEFAULT_EVENT_BURST, DEFAULT_EVENT_RATE};
use confab_shared::types::ConnectionId;

use crate::error::ChatError;

struct Allowance {
    credit: f64,
    updated: Instant,
    /// Events refused since the last accepted one.
    refused: u32,
}

#[derive(Clone)]
pub struct RateLimiter {
    allowances: Arc<Mutex<HashMap<ConnectionId, Allowance>>>,
    per_second: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(per_second: f64, burst: f64) -> Self {
        Self {
            allowances: Arc::new(Mutex::new(HashMap::new())),
            per_second,
            burst: burst.max(1.0),
        }
    }

    /// Spend one event of credit for `conn`.
    pub async fn check(&self, conn: ConnectionId) -> Result<(), ChatError> {
        let now = Instant::now();
        let mut allowances = self.allowances.lock().await;
        let allowance = allowances.entry(conn).or_insert(Allowance {
            credit: self.burst,
            updated: now,
            refused: 0,
        });

        let idle = now.saturating_duration_since(allowance.updated);
        allowance.credit = (allowance.credit + idle.as_secs_f64() * self.per_second).min(self.burst);
        allowance.updated = now;

        if allowance.credit >= 1.0 {
            allowance.credit -= 1.0;
            if allowance.refused > 0 {
                debug!(conn = %conn.short(), refused = allowance.refused, "flood subsided");
                allowance.refused = 0;
            }
            return Ok(());
        }

        allowance.refused += 1;
        if allowance.refused == 1 {
            warn!(conn = %conn.short(), "Inbound event rate exceeded, refusing events");
        }
        let wait = Duration::try_from_secs_f64((1.0 - allowance.credit) / self.per_second)
            .unwrap_or(Duration::MAX);
        Err(ChatError::RateLimited {
            retry_after_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX).max(1),
        })
    }

    /// Drop the allowance of a closed connection.
    pub async fn forget(&self, conn: ConnectionId) {
        self.allowances.lock().await.remove(&conn);
    }

    /// Drop allowances untouched for `max_idle`. Returns how many went.
    pub async fn purge_stale(&self, max_idle: Duration) -> usize {
        let mut allowances = self.allowances.lock().await;
        let before = allowances.len();
        let now = Instant::now();
        allowances.retain(|_, a| now.saturating_duration_since(a.updated) < max_idle);
        before - allowances.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_RATE, DEFAULT_EVENT_BURST)
    }
}
