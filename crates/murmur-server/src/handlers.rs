//! Connection handlers for the Murmur server.
//!
//! Each WebSocket session runs in its own task. It decodes inbound frames,
//! answers pings itself, hands every other event to the relay loop, and
//! drains its outbound queue onto the socket.

use crate::config::Config;
use crate::limits::{ConnectionLimiter, ConnectionSlot};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use murmur_core::{ConnectionHandle, ConnectionId, Relay, RelayHandle};
use murmur_protocol::{codec, ClientEvent, ProtocolError, ServerEvent, WireFormat, PROTOCOL_VERSION};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// Sender side of the relay loop.
    pub relay: RelayHandle,
    /// Open-connection cap.
    pub limiter: ConnectionLimiter,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state and start the relay loop.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            relay: Relay::new(config.relay_config()).spawn(),
            limiter: ConnectionLimiter::new(config.limits.max_connections),
            config,
        }
    }
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Murmur relay listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, config).await
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops abnormally.
pub async fn serve(listener: TcpListener, config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config));
    axum::serve(listener, build_app(state)).await?;
    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.relay.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "relay": stats,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unavailable",
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = state.limiter.try_acquire() else {
        warn!(
            max_connections = state.config.limits.max_connections,
            "Connection limit reached, refusing upgrade"
        );
        metrics::record_rejected_connection();
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, slot))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: ConnectionSlot) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    let (handle, mut outbound) = ConnectionHandle::channel(connection_id.clone());

    if let Err(e) = state.relay.attach(handle) {
        error!(connection = %connection_id, error = %e, "Relay unavailable");
        return;
    }

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Text until the client speaks binary.
    let mut format = WireFormat::Json;

    let connected = ServerEvent::connected(
        connection_id.as_str(),
        PROTOCOL_VERSION,
        state.config.heartbeat.interval_ms,
    );
    if let Err(e) = send_event(&mut sender, &connected, format).await {
        warn!(connection = %connection_id, error = %e, "Failed to send connected event");
        detach(&state, connection_id);
        return;
    }

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    'session: loop {
        tokio::select! {
            biased;

            Some(event) = outbound.recv() => {
                if let Err(e) = send_event(&mut sender, &event, format).await {
                    debug!(connection = %connection_id, error = %e, "Send failed");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();
                        metrics::record_event(text.len(), "inbound");

                        match codec::decode_json::<ClientEvent>(&text) {
                            Ok(event) => {
                                if let Err(e) = handle_event(event, &connection_id, &state, &mut sender, format).await {
                                    error!(connection = %connection_id, error = %e, "Event handling error");
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(connection = %connection_id, error = %e, "Malformed event dropped");
                                metrics::record_error("malformed");
                            }
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        format = WireFormat::MessagePack;
                        read_buffer.extend_from_slice(&data);

                        loop {
                            let (decoded, consumed) = next_binary_event(&mut read_buffer);
                            match decoded {
                                Ok(Some(event)) => {
                                    metrics::record_event(consumed, "inbound");
                                    if let Err(e) = handle_event(event, &connection_id, &state, &mut sender, format).await {
                                        error!(connection = %connection_id, error = %e, "Event handling error");
                                        break 'session;
                                    }
                                }
                                Ok(None) => break,
                                Err(ProtocolError::FrameTooLarge(size)) => {
                                    warn!(connection = %connection_id, size, "Oversized frame, discarding buffer");
                                    metrics::record_error("frame_too_large");
                                    read_buffer.clear();
                                    break;
                                }
                                Err(e) => {
                                    // The bad payload has already been consumed.
                                    warn!(connection = %connection_id, error = %e, "Malformed event dropped");
                                    metrics::record_error("malformed");
                                }
                            }
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    detach(&state, connection_id);
}

/// Decode the next buffered binary event and report how many bytes it took.
fn next_binary_event(buf: &mut BytesMut) -> (Result<Option<ClientEvent>, ProtocolError>, usize) {
    let before = buf.len();
    let decoded = codec::decode_from(buf);
    (decoded, before - buf.len())
}

/// Answer pings locally and hand everything else to the relay.
async fn handle_event(
    event: ClientEvent,
    connection_id: &ConnectionId,
    state: &AppState,
    sender: &mut SplitSink<WebSocket, Message>,
    format: WireFormat,
) -> Result<()> {
    match event {
        ClientEvent::Ping { timestamp } => {
            send_event(sender, &ServerEvent::pong(timestamp), format).await?;
        }
        event => {
            trace!(connection = %connection_id, event = event.name(), "Inbound");
            state.relay.inbound(connection_id.clone(), event)?;
        }
    }

    Ok(())
}

/// Encode an event in the connection's format and send it.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    format: WireFormat,
) -> Result<()> {
    let message = match format {
        WireFormat::Json => {
            let text = codec::encode_json(event)?;
            metrics::record_event(text.len(), "outbound");
            Message::Text(text)
        }
        WireFormat::MessagePack => {
            let data = codec::encode(event)?;
            metrics::record_event(data.len(), "outbound");
            Message::Binary(data.to_vec())
        }
    };

    sender.send(message).await?;
    Ok(())
}

fn detach(state: &AppState, connection_id: ConnectionId) {
    debug!(connection = %connection_id, "WebSocket disconnected");
    if let Err(e) = state.relay.detach(connection_id) {
        warn!(error = %e, "Relay unavailable during detach");
    }
}
