//! WebSocket endpoint.
//!
//! `GET /ws` upgrades an authenticated request into a room session. The
//! credential is checked by [`require_auth`] before the upgrade is
//! accepted, so an unauthenticated client never gets a socket.
//!
//! Each accepted socket is split: the write half goes to a
//! [`ConnectionActor`], the read half is driven by [`run_connection`]
//! which feeds frames to the [`SessionCoordinator`].

use crate::actors::{ActorMetrics, ConnectionActor, EventSink};
use crate::auth::{extract_bearer_token, ConnectionAuthenticator, Identity, TokenQuery};
use crate::errors::RcError;
use crate::observability::metrics;
use crate::session::{ServerEvent, SessionCoordinator};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, Request, State,
    },
    http::header::AUTHORIZATION,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Extension, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Largest inbound frame accepted from a client.
const MAX_FRAME_BYTES: usize = 64 * 1024;

/// How long a closed session waits for its writer to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared state for the WebSocket router.
pub struct ServerState {
    pub coordinator: SessionCoordinator,
    pub authenticator: Arc<ConnectionAuthenticator>,
    pub connection_limit: Arc<Semaphore>,
    pub metrics: Arc<ActorMetrics>,
}

impl ServerState {
    #[must_use]
    pub fn new(
        coordinator: SessionCoordinator,
        authenticator: Arc<ConnectionAuthenticator>,
        max_connections: usize,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        Self {
            coordinator,
            authenticator,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            metrics,
        }
    }
}

/// A held connection slot. Released when the session ends.
#[derive(Clone)]
struct ConnectionPermit(#[allow(dead_code)] Arc<OwnedSemaphorePermit>);

/// Build the WebSocket router.
pub fn ws_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_auth,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Admission middleware for `/ws`.
///
/// Takes a connection slot, then validates the bearer credential from the
/// `Authorization` header or the `token` query parameter. On success the
/// [`Identity`] and the slot are stored in request extensions.
///
/// # Response
///
/// - 503 if the connection limit is reached
/// - 401 with `WWW-Authenticate` if the credential is missing or invalid
#[instrument(skip_all, name = "rc.ws.require_auth")]
pub async fn require_auth(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<TokenQuery>,
    mut req: Request,
    next: Next,
) -> Result<Response, RcError> {
    let permit = Arc::clone(&state.connection_limit)
        .try_acquire_owned()
        .map_err(|_| {
            warn!(target: "rc.ws", "Connection limit reached, refusing upgrade");
            RcError::ServiceUnavailable("Connection limit reached".to_string())
        })?;

    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());
    let header_token = extract_bearer_token(authorization).map(str::to_owned);
    let token = header_token.or_else(|| query.into_token()).ok_or_else(|| {
        debug!(target: "rc.ws", "Missing access token");
        metrics::record_auth_failure();
        RcError::Unauthenticated("Missing access token".to_string())
    })?;

    let identity = state.authenticator.authenticate(&token).await?;

    req.extensions_mut().insert(identity);
    req.extensions_mut()
        .insert(ConnectionPermit(Arc::new(permit)));

    Ok(next.run(req).await)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Extension(identity): Extension<Identity>,
    Extension(permit): Extension<ConnectionPermit>,
) -> Response {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_failed_upgrade(|error| {
            warn!(target: "rc.ws", error = %error, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| run_connection(state, identity, socket, permit))
}

/// Drive one upgraded socket until the client goes away or shutdown.
#[instrument(skip_all, name = "rc.ws.connection")]
async fn run_connection(
    state: Arc<ServerState>,
    identity: Identity,
    socket: WebSocket,
    _permit: ConnectionPermit,
) {
    let connection_id = Uuid::new_v4().to_string();
    let (writer, mut reader) = socket.split();
    let cancel_token = state.coordinator.controller().child_token();

    let (connection, task_handle, mut signals) = ConnectionActor::spawn(
        connection_id.clone(),
        identity.user_id.clone(),
        WsEventSink { writer },
        cancel_token.clone(),
        Arc::clone(&state.metrics),
    );

    let mut session = match state
        .coordinator
        .open_session(identity, connection.clone())
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(
                target: "rc.ws",
                connection_id = %connection_id,
                error = %e,
                "Failed to register connection"
            );
            connection.close("registration failed");
            return;
        }
    };

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "rc.ws", connection_id = %connection_id, "Connection cancelled");
                break;
            }

            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    state.coordinator.handle_frame(&mut session, &text).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    state.coordinator.handle_frame(&mut session, "").await;
                }
                // Ping/pong are answered by the transport
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!(target: "rc.ws", connection_id = %connection_id, "Client closed connection");
                    break;
                }
                Some(Err(e)) => {
                    debug!(
                        target: "rc.ws",
                        connection_id = %connection_id,
                        error = %e,
                        "Read failed"
                    );
                    break;
                }
            },

            Some(signal) = signals.recv() => {
                state.coordinator.handle_signal(&mut session, signal);
            }
        }
    }

    state.coordinator.close_session(session).await;

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, task_handle)
        .await
        .is_err()
    {
        connection.cancel();
    }
}

/// Write half of a WebSocket as an [`EventSink`].
struct WsEventSink {
    writer: SplitSink<WebSocket, Message>,
}

#[async_trait::async_trait]
impl EventSink for WsEventSink {
    async fn send_event(&mut self, event: &ServerEvent) -> Result<(), RcError> {
        let frame = event.to_frame()?;
        self.writer
            .send(Message::Text(frame))
            .await
            .map_err(|e| RcError::Internal(format!("websocket write failed: {e}")))
    }

    async fn close(&mut self) {
        if let Err(e) = self.writer.send(Message::Close(None)).await {
            debug!(target: "rc.ws", error = %e, "Close frame not sent");
        }
        if let Err(e) = self.writer.close().await {
            debug!(target: "rc.ws", error = %e, "Socket close failed");
        }
    }
}
