//! Relay HTTP + WebSocket server (single port).

use crate::config::{self, RelayConfig, RelayUser};
use crate::relay::groups::{university_mass_group, user_group, GroupRegistry, MASS_GROUP};
use crate::relay::protocol::{
    mass_frame, targeted_frame, ClientFrame, DeliveryReport, MassNotifyParams, NotifyParams,
};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Shared state for the relay (config, delivery groups, shutdown fan-out).
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    pub groups: Arc<GroupRegistry>,
    /// Fires once on shutdown; every socket task closes its connection.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            groups: Arc::new(GroupRegistry::new()),
            shutdown_tx,
        }
    }

    fn user_for_token(&self, token: &str) -> Option<&RelayUser> {
        self.config.users.get(token.trim())
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/notifications", get(ws_handler))
        .route("/notify", post(notify_http))
        .route("/mass-notify", post(mass_notify_http))
        .with_state(state)
}

/// Run the relay until SIGINT/SIGTERM. Refuses non-loopback binds: the relay has no transport security.
pub async fn run_relay(config: RelayConfig) -> Result<()> {
    let bind = config.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        anyhow::bail!(
            "refusing to bind relay to {}; it is a development server and only serves loopback",
            bind
        );
    }
    let bind_addr = format!("{}:{}", bind, config.port);
    let state = RelayState::new(config);
    let shutdown_tx = state.shutdown_tx.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("relay listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("relay server exited")?;
    log::info!("relay stopped");
    Ok(())
}

/// Future that completes on SIGINT or SIGTERM, after telling every socket to close.
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, closing notification sockets");
    let _ = shutdown_tx.send(());
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<RelayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.port,
        "connections": state.groups.len(MASS_GROUP).await,
    }))
}

/// POST /notify — targeted frame to every socket of one user.
async fn notify_http(
    State(state): State<RelayState>,
    Json(params): Json<NotifyParams>,
) -> Result<Json<DeliveryReport>, StatusCode> {
    let user_id = params.user_id.trim();
    if user_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let frame = targeted_frame(&params);
    let delivered = state.groups.send(&user_group(user_id), &frame).await;
    log::info!(
        "notify user {}: {} {} -> {} socket(s)",
        user_id,
        params.target_type,
        params.target_action,
        delivered
    );
    Ok(Json(DeliveryReport { delivered }))
}

/// POST /mass-notify — mass frame to one university's sockets, or to every connected socket.
async fn mass_notify_http(
    State(state): State<RelayState>,
    Json(params): Json<MassNotifyParams>,
) -> Json<DeliveryReport> {
    let group = match params.university_id.as_deref().map(str::trim) {
        Some(university) if !university.is_empty() => university_mass_group(university),
        _ => MASS_GROUP.to_string(),
    };
    let delivered = state.groups.send(&group, &mass_frame(&params.message)).await;
    log::info!("mass notification to {} -> {} socket(s)", group, delivered);
    Json(DeliveryReport { delivered })
}

/// GET /notifications upgrades to WebSocket.
async fn ws_handler(State(state): State<RelayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: RelayState) {
    let socket_id = uuid::Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    state.groups.add(MASS_GROUP, &socket_id, tx.clone()).await;
    log::debug!("socket {} connected", socket_id);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            Some(text) = rx.recv() => {
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => register_client(&state, &socket_id, &tx, &text).await,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    state.groups.discard_all(&socket_id).await;
    log::debug!("socket {} disconnected", socket_id);
}

/// Login and action-request frames both place the socket in its user's groups.
async fn register_client(
    state: &RelayState,
    socket_id: &str,
    tx: &mpsc::UnboundedSender<String>,
    text: &str,
) {
    let Ok(frame) = serde_json::from_str::<ClientFrame>(text) else {
        log::debug!("socket {}: ignoring unparseable frame", socket_id);
        return;
    };
    let Some(ref token) = frame.jwt else {
        return;
    };
    match state.user_for_token(token) {
        Some(user) => {
            state
                .groups
                .add(&user_group(&user.user_id), socket_id, tx.clone())
                .await;
            if let Some(ref university) = user.university_id {
                state
                    .groups
                    .add(&university_mass_group(university), socket_id, tx.clone())
                    .await;
            }
            log::info!(
                "socket {} {} as user {}",
                socket_id,
                if frame.login { "logged in" } else { "re-registered" },
                user.user_id
            );
        }
        None => log::debug!("socket {}: unknown token", socket_id),
    }
}
