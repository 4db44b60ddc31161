//! Connection handlers for Beacon server.
//!
//! This module wires the signaling WebSocket, the heartbeat and peer-list
//! endpoints, and the health check onto the core router.

use crate::client_addr::client_addr;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use beacon_core::{
    ConnectionRegistry, Endpoint, IdentityResolver, IdentityStore, LivenessPolicy, MemoryStore,
    PeerDirectory, PeerView, PresenceStore, RouterConfig, SignalingRouter, SqliteStore,
    StoreError, SystemClock,
};
use beacon_protocol::{EncodedFrame, WireFormat};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The signaling router.
    pub router: Arc<SignalingRouter>,
    /// Masked peer listing.
    pub directory: PeerDirectory,
    /// Liveness policy.
    pub policy: LivenessPolicy,
    /// Server configuration.
    pub config: Config,
    /// Open WebSocket sessions, counted against `limits.max_connections`.
    connections: AtomicUsize,
}

fn split_store<S>(store: Arc<S>) -> (Arc<dyn IdentityStore>, Arc<dyn PresenceStore>)
where
    S: IdentityStore + PresenceStore + 'static,
{
    (store.clone(), store)
}

impl AppState {
    /// Open storage, apply the seed and build the router.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or storage fails.
    pub async fn new(config: Config) -> Result<Self> {
        let policy = config.liveness_policy()?;

        let (identities, presence) = match &config.storage.database {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory {}", parent.display())
                    })?;
                }
                info!("Using SQLite storage: {}", path.display());
                let store = SqliteStore::open(path, policy)
                    .with_context(|| format!("Failed to open database {}", path.display()))?;
                split_store(Arc::new(store))
            }
            None => {
                info!("Using in-memory storage (no persistence)");
                split_store(Arc::new(MemoryStore::with_clock(
                    policy,
                    Arc::new(SystemClock),
                )))
            }
        };

        for seed in &config.storage.seed {
            let identity = identities
                .upsert(seed.clone())
                .await
                .with_context(|| format!("Failed to seed identity {}", seed.canonical_address))?;
            debug!(identity = %identity.canonical_address, id = identity.id, "Seeded identity");
        }
        if !config.storage.seed.is_empty() {
            info!("Seeded {} identities", config.storage.seed.len());
        }

        let registry = Arc::new(ConnectionRegistry::with_queue_capacity(
            config.limits.session_queue_capacity,
        ));
        let router = Arc::new(SignalingRouter::new(
            registry,
            IdentityResolver::new(identities.clone()),
            presence.clone(),
            RouterConfig {
                max_message_size: config.transport.max_message_size,
            },
        ));

        Ok(Self {
            router,
            directory: PeerDirectory::new(presence),
            policy,
            config,
            connections: AtomicUsize::new(0),
        })
    }

    fn try_acquire(self: &Arc<Self>) -> Option<ConnectionPermit> {
        let previous = self.connections.fetch_add(1, Ordering::AcqRel);
        if previous >= self.config.limits.max_connections {
            self.connections.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(ConnectionPermit {
            state: Arc::clone(self),
        })
    }
}

/// A reserved connection slot, released on drop.
struct ConnectionPermit {
    state: Arc<AppState>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.state.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Errors surfaced by the HTTP endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Storage failure.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self, "Request failed");
        metrics::record_error("store");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Build the HTTP application.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_route = format!(
        "{}/:identity",
        state.config.transport.websocket_path.trim_end_matches('/')
    );

    Router::new()
        .route(&ws_route, get(ws_handler))
        .route("/api/heartbeat/", post(heartbeat_handler))
        .route("/api/peers/", get(peers_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone()).await?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = app(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}/<identity>",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router.registry().stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": stats.session_count,
        "identities": stats.identity_count,
    }))
}

/// Heartbeat request body.
#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    /// Canonical address of the reporting peer.
    pub phone: String,
    /// Reported address; the observed client address when absent.
    #[serde(default)]
    pub ip: Option<String>,
    /// Reported port.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Heartbeat handler.
async fn heartbeat_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let address = request
        .ip
        .filter(|ip| !ip.is_empty())
        .or_else(|| client_addr(&headers, Some(peer)));
    let endpoint = address.map(|address| Endpoint {
        address,
        port: request.port,
    });

    metrics::record_heartbeat();
    let updated = state
        .router
        .presence()
        .touch(&request.phone, endpoint)
        .await?;
    debug!(identity = %request.phone, updated, "Heartbeat");

    Ok(Json(serde_json::json!({ "status": "updated" })))
}

/// Peer list query.
#[derive(Debug, Deserialize)]
pub struct PeersQuery {
    /// Caller's canonical address, excluded from the result.
    #[serde(default)]
    pub phone: Option<String>,
}

/// Peer list handler.
async fn peers_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PeersQuery>,
) -> Result<Json<Vec<PeerView>>, ApiError> {
    let exclude = query.phone.as_deref().filter(|p| !p.is_empty());
    let peers = state
        .directory
        .list_peers(state.policy.online_window(), exclude)
        .await?;
    Ok(Json(peers))
}

/// WebSocket query parameters.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Outbound encoding, `json` (default) or `msgpack`.
    #[serde(default)]
    pub format: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(identity): Path<String>,
    Query(params): Query<WsParams>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let format = match params.format.as_deref().map(str::parse::<WireFormat>) {
        None => WireFormat::default(),
        Some(Ok(format)) => format,
        Some(Err(e)) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let Some(permit) = state.try_acquire() else {
        warn!(identity = %identity, "Connection limit reached");
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let addr = client_addr(&headers, Some(peer));
    ws.on_upgrade(move |socket| handle_websocket(socket, state, permit, identity, addr, format))
}

/// Handle a WebSocket connection.
///
/// `on_upgrade` has already accepted the handshake when this runs, so the
/// registry join and presence touch in `open` follow the accept. Signals for
/// this identity that arrive in between are delivery misses.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    _permit: ConnectionPermit,
    identity: String,
    addr: Option<String>,
    format: WireFormat,
) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (mut session, mut deliveries) = state.router.connect(identity, addr, format);
    session.open().await;
    metrics::set_registry_stats(state.router.registry().stats());

    debug!(identity = %session.identity(), session = %session.id(), "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            // Deliveries fanned out to this session
            Some(envelope) = deliveries.recv() => {
                let frame = match session.encode(&envelope) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(session = %session.id(), error = %e, "Failed to encode delivery");
                        metrics::record_error("encode");
                        continue;
                    }
                };
                metrics::record_bytes(frame.len(), "outbound");
                let message = match frame {
                    EncodedFrame::Text(text) => Message::Text(text),
                    EncodedFrame::Binary(data) => Message::Binary(data.to_vec()),
                };
                if sender.send(message).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();
                        metrics::record_bytes(text.len(), "inbound");
                        let outcome = session.receive_text(&text).await;
                        metrics::record_signal(&outcome);
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        metrics::record_bytes(data.len(), "inbound");
                        let outcome = session.receive_binary(&data).await;
                        metrics::record_signal(&outcome);
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(session = %session.id(), "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session = %session.id(), error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(session = %session.id(), "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    session.close().await;
    metrics::set_registry_stats(state.router.registry().stats());

    debug!(identity = %session.identity(), session = %session.id(), "WebSocket disconnected");
}
