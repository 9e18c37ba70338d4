//! WebSocket transport.
//!
//! `GET /ws[?token=...]` upgrades to a socket carrying JSON text frames
//! `{"event": ..., "data": ...}` in both directions. Each socket gets:
//!
//! * an **egress** task draining the connection's bounded outbound queue
//!   into the socket, and
//! * an **ingest** loop (on the upgrade task itself) that decodes frames and
//!   hands them to the [`EventRouter`] one at a time.
//!
//! The ingest loop awaits each event to completion before reading the next
//! frame, so a client hanging up never cancels a send that is already on its
//! way to the store.
//!
//! [`EventRouter`]: crate::router::EventRouter

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use confab_shared::error::ProtocolError;
use confab_shared::protocol::{ClientEvent, ServerEvent};
use confab_shared::types::UserId;

use crate::api::AppState;
use crate::error::{ChatError, ServerError};

/// How long the egress task gets to flush after the ingest loop ends.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// `GET /ws` -- upgrade to a chat connection.
///
/// A `token` query parameter authenticates during the upgrade; an invalid
/// one is refused with 401 before any socket exists.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    let max = state.config.max_connections;
    if max > 0 && state.router.registry().connection_count().await >= max {
        warn!(max, "Refusing connection, server at capacity");
        return Err(ServerError::AtCapacity);
    }

    let principal = match params.token.as_deref() {
        Some(token) => Some(
            state
                .router
                .identity()
                .resolve(token)
                .await?
                .ok_or_else(|| ServerError::Unauthorized("invalid session token".into()))?,
        ),
        None => None,
    };

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, principal))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState, principal: Option<UserId>) {
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.outbound_buffer);
    let router = state.router.clone();
    let conn = router.connect(tx).await;

    if let Some(user) = principal {
        if let Err(e) = router.bind_principal(conn, user).await {
            warn!(conn = %conn.short(), error = %e, "Could not bind principal");
        }
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // ── Egress: outbound queue → text frames ─────────────────────────────
    let mut egress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!(event = event.name(), error = %e, "Could not encode event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // ── Ingest: frames → router ──────────────────────────────────────────
    while let Some(frame) = ws_receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                let err = ChatError::from(ProtocolError::MalformedFrame(
                    "binary frames are not supported".into(),
                ));
                router.report(conn, &err).await;
                warn!(conn = %conn.short(), "Binary frame, closing connection");
                break;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn = %conn.short(), error = %e, "Socket error");
                break;
            }
        };

        if let Err(err) = state.limiter.check(conn).await {
            router.report(conn, &err).await;
            continue;
        }

        let outcome = match ClientEvent::decode(&text) {
            Ok(event) => router.handle(conn, event).await,
            Err(e) => {
                let err = ChatError::from(e);
                router.report(conn, &err).await;
                Err(err)
            }
        };

        if let Err(err) = outcome {
            if err.is_fatal() {
                warn!(conn = %conn.short(), error = %err, "Closing connection");
                break;
            }
        }
    }

    // Removing the connection drops the last sender, so egress drains what
    // is queued (including a final error) and then exits.
    router.disconnect(conn).await;
    state.limiter.forget(conn).await;

    if tokio::time::timeout(FLUSH_GRACE, &mut egress).await.is_err() {
        egress.abort();
    }

    info!(conn = %conn.short(), "WebSocket session closed");
}
