// HTTP + WebSocket front end of the remote-control gateway

use crate::config::GatewayConfig;
use crate::error::{WardenError, Result};
use crate::events::{EventKind, ServerEvent};
use crate::gateway::commands::CommandRouter;
use crate::gateway::pairing::{PairingBook, PairingCreated};
use crate::gateway::protocol::{
    ClientMessage, CommandOutcome, CommandRequest, CommandResponse, DeviceInfo, ServerMessage,
};
use crate::gateway::session::SessionRegistry;
use crate::monitor::MonitoringEngine;
use crate::process::ProcessSupervisor;
use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared state behind every route and socket
pub struct Gateway {
    supervisor: Arc<ProcessSupervisor>,
    sessions: Arc<SessionRegistry>,
    pairings: Mutex<PairingBook>,
    commands: CommandRouter,
    device_id: String,
    device_name: String,
}

impl Gateway {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        engine: Arc<MonitoringEngine>,
        config: &GatewayConfig,
        device_id: String,
    ) -> Arc<Self> {
        let sessions = Arc::new(SessionRegistry::new(config.session_queue));
        Arc::new(Self {
            commands: CommandRouter::new(
                Arc::clone(&supervisor),
                engine,
                Arc::clone(&sessions),
                config.deploy_roots.clone(),
            ),
            supervisor,
            sessions,
            pairings: Mutex::new(PairingBook::new(config.pairing_ttl())),
            device_id,
            device_name: config.resolved_device_name(),
        })
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Issue a single-use pairing code for a new device
    pub fn request_pairing(
        &self,
        device_name: &str,
        device_type: Option<String>,
    ) -> Result<PairingCreated> {
        let created = self
            .pairings
            .lock()
            .map_err(|_| WardenError::Internal("pairing book poisoned".to_string()))?
            .request(device_name, device_type);
        tracing::info!(
            device = %device_name,
            pairing_id = %created.pairing_id,
            expires_in = created.expires_in,
            "pairing code issued"
        );
        Ok(created)
    }

    /// Redeem a pairing code and mark the session authenticated
    pub fn authenticate(
        &self,
        session_id: &str,
        code: &str,
        device_info: Option<DeviceInfo>,
    ) -> Result<ServerMessage> {
        let pairing = self
            .pairings
            .lock()
            .map_err(|_| WardenError::Internal("pairing book poisoned".to_string()))?
            .redeem(code)?;

        let client_name = device_info
            .and_then(|info| info.device_name)
            .unwrap_or(pairing.device_name);
        self.sessions
            .authenticate(session_id, &pairing.pairing_id, &client_name)?;
        tracing::info!(session_id = %session_id, device = %client_name, "device paired");

        Ok(ServerMessage::Authenticated {
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            session_id: session_id.to_string(),
        })
    }

    async fn status_update(&self) -> ServerMessage {
        ServerMessage::ServerStatusUpdate {
            servers: self.supervisor.snapshot().await,
        }
    }

    /// Handle one text frame from a session
    pub async fn handle_frame(self: &Arc<Self>, session_id: &str, frame: &str) {
        match serde_json::from_str::<ClientMessage>(frame) {
            Ok(message) => self.handle_message(session_id, message).await,
            Err(e) => {
                let err = WardenError::InvalidParams(format!("Malformed frame: {}", e));
                self.sessions.send_to(session_id, ServerMessage::error(&err));
            }
        }
    }

    pub async fn handle_message(self: &Arc<Self>, session_id: &str, message: ClientMessage) {
        match message {
            ClientMessage::RequestPairing {
                device_name,
                device_type,
            } => {
                let reply = match self.request_pairing(&device_name, device_type) {
                    Ok(created) => ServerMessage::PairingCreated(created),
                    Err(e) => ServerMessage::error(&e),
                };
                self.sessions.send_to(session_id, reply);
            }

            ClientMessage::Authenticate {
                pairing_code,
                device_info,
            } => match self.authenticate(session_id, &pairing_code, device_info) {
                Ok(reply) => {
                    self.sessions.send_to(session_id, reply);
                    let status = self.status_update().await;
                    self.sessions.send_to(session_id, status);
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "authentication failed");
                    self.sessions
                        .send_to(session_id, ServerMessage::AuthError { error: e.to_string() });
                }
            },

            ClientMessage::ServerCommand(request) => {
                if !self.sessions.is_authenticated(session_id) {
                    let err = WardenError::Unauthorized(
                        "Pair this device before sending commands".to_string(),
                    );
                    let reply = CommandResponse::new(&request, CommandOutcome::failed(&err));
                    self.sessions
                        .send_to(session_id, ServerMessage::CommandResponse(reply));
                    return;
                }
                self.spawn_command(session_id.to_string(), request);
            }
        }
    }

    /// Commands run in their own task so a slow start or stop never stalls
    /// the socket reader.
    fn spawn_command(self: &Arc<Self>, session_id: String, request: CommandRequest) {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            tracing::debug!(session_id = %session_id, command = %request.command, "running command");
            let response = gateway.commands.dispatch(&session_id, &request).await;
            gateway
                .sessions
                .send_to(&session_id, ServerMessage::CommandResponse(response));
        });
    }

    /// Forward bus events to subscribed sessions until the bus closes
    pub fn spawn_fanout(self: &Arc<Self>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let mut events = self.supervisor.bus().subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => gateway.fan_out(&event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "gateway lagged behind the event bus");
                        let status = gateway.status_update().await;
                        gateway.sessions.broadcast(EventKind::Status, &status);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn fan_out(&self, event: &ServerEvent) {
        if self.sessions.authenticated_count() == 0 {
            return;
        }
        match event {
            // the status change that accompanies every exit carries the news
            ServerEvent::ProcessExited { .. } => {}
            ServerEvent::Deployed { .. }
            | ServerEvent::Removed { .. }
            | ServerEvent::StatusChanged { .. } => {
                let status = self.status_update().await;
                self.sessions.broadcast(EventKind::Status, &status);
            }
            other => {
                if let Some(message) = ServerMessage::from_event(other) {
                    self.sessions.broadcast(other.kind(), &message);
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairRequest {
    device_name: String,
    #[serde(default)]
    device_type: Option<String>,
}

/// JSON error body for the plain HTTP routes
struct ApiError(WardenError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            WardenError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.0.to_string(), "code": self.0.code() });
        (status, Json(body)).into_response()
    }
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/device-info", get(device_info))
        .route("/pair", post(pair))
        .route("/ws", get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

/// Serve the gateway on `listener` until `shutdown` resolves
pub async fn serve<F>(gateway: Arc<Gateway>, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, device = %gateway.device_name(), "remote-control gateway listening");
    }
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "connectedSessions": gateway.sessions.len(),
    }))
}

async fn device_info(State(gateway): State<Arc<Gateway>>) -> Json<serde_json::Value> {
    Json(json!({
        "deviceId": gateway.device_id,
        "deviceName": gateway.device_name,
    }))
}

async fn pair(
    State(gateway): State<Arc<Gateway>>,
    Json(request): Json<PairRequest>,
) -> std::result::Result<Json<PairingCreated>, ApiError> {
    if request.device_name.trim().is_empty() {
        return Err(ApiError(WardenError::InvalidParams(
            "deviceName is required".to_string(),
        )));
    }
    gateway
        .request_pairing(&request.device_name, request.device_type)
        .map(Json)
        .map_err(ApiError)
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Arc<Gateway>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>) {
    let (session_id, mut rx) = match gateway.sessions.open() {
        Ok(opened) => opened,
        Err(e) => {
            tracing::error!(error = %e, "failed to open session");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode frame");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(Utf8Bytes::from(json))).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => gateway.handle_frame(&session_id, text.as_str()).await,
            Ok(Message::Binary(bin)) => match std::str::from_utf8(bin.as_ref()) {
                Ok(text) => gateway.handle_frame(&session_id, text).await,
                Err(_) => {
                    let err = WardenError::InvalidParams("Frames must be UTF-8 JSON".to_string());
                    gateway.sessions.send_to(&session_id, ServerMessage::error(&err));
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "websocket error");
                break;
            }
            _ => {}
        }
    }

    gateway.sessions.close(&session_id);
    writer.abort();
}
