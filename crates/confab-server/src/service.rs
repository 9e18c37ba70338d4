//! The chat service: an explicitly constructed instance owning the router,
//! its background maintenance and the HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use confab_store::ChatStore;

use crate::api::{self, AppState};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::identity::IdentityResolver;
use crate::rate_limit::RateLimiter;
use crate::registry::ConnectionRegistry;
use crate::router::EventRouter;
use crate::typing::TypingTracker;

/// Flood-control state untouched for this long is dropped by the sweep.
const LIMITER_IDLE: Duration = Duration::from_secs(600);

/// Upper bound on waiting for open connections during `stop`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<std::io::Result<()>>,
    sweeper: JoinHandle<()>,
}

pub struct ChatService {
    state: AppState,
    running: Option<Running>,
}

impl ChatService {
    pub fn new(config: ServerConfig, store: ChatStore, identity: Arc<dyn IdentityResolver>) -> Self {
        let router = EventRouter::new(
            store,
            ConnectionRegistry::new(),
            TypingTracker::new(config.typing_timeout),
            identity,
        );
        let limiter = RateLimiter::new(config.event_rate, config.event_burst);
        Self {
            state: AppState {
                router,
                limiter,
                config: Arc::new(config),
            },
            running: None,
        }
    }

    pub fn router(&self) -> &EventRouter {
        &self.state.router
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// The HTTP application, for embedding or in-process tests.
    pub fn app(&self) -> Router {
        api::build_router(self.state.clone())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bind the listener and start serving plus the maintenance sweep.
    /// Returns the bound address. Starting a running service is a no-op.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(running) = &self.running {
            return Ok(running.addr);
        }

        let listener = tokio::net::TcpListener::bind(self.state.config.http_addr)
            .await
            .map_err(|e| {
                ServerError::Internal(format!("bind {}: {e}", self.state.config.http_addr))
            })?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(api::serve(listener, self.app(), async move {
            let _ = shutdown_rx.await;
        }));
        let sweeper = tokio::spawn(sweep(self.state.clone()));

        info!(
            addr = %addr,
            instance = %self.state.config.instance_name,
            "Chat service started"
        );
        self.running = Some(Running {
            addr,
            shutdown,
            server,
            sweeper,
        });
        Ok(addr)
    }

    /// Stop accepting connections, wait briefly for open ones, and end the
    /// maintenance sweep. Stopping a stopped service is a no-op.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown.send(());
        running.sweeper.abort();

        let mut server = running.server;
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server ended with an error"),
            Ok(Err(e)) => warn!(error = %e, "HTTP server task failed"),
            Err(_) => {
                warn!("Open connections did not close in time, aborting");
                server.abort();
            }
        }
        info!("Chat service stopped");
    }
}

/// Periodic cleanup of expired typing entries, idle chat locks and stale
/// flood-control state.
async fn sweep(state: AppState) {
    let period = state.router.typing().timeout().max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let typing = state.router.typing().purge_stale().await;
        let locks = state.router.purge_idle_locks();
        let allowances = state.limiter.purge_stale(LIMITER_IDLE).await;
        if typing > 0 || locks > 0 || allowances > 0 {
            debug!(typing, locks, allowances, "maintenance sweep");
        }
    }
}
