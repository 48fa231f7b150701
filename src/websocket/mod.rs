//! # WebSocket Module
//!
//! The real-time channel for call control and WebRTC signaling.
//!
//! ## Connection Flow
//!
//! ```text
//! 1. Client connects to /ws/:user
//!              ↓
//! 2. Connection registered in the presence registry
//!              ↓
//! 3. Client drives calls over typed JSON messages:
//!    - call:invite  -> callee rings
//!    - call:answer  -> call active, billing starts
//!    - call:end     -> billing stops, call ends
//!    - webrtc:offer / webrtc:answer / webrtc:ice -> forwarded opaquely
//! 4. Disconnect unregisters the user
//! ```
//!
//! Identity note: the user id in the path is trusted here; verifying
//! it is the identity collaborator's job upstream.
//!
//! The presence registry is the shared "who is online" map mutated by
//! connect/disconnect events from many concurrent sessions and read by
//! invite/relay operations. It lives behind one mutex so a disconnect
//! racing an invite can never leave a stale or duplicate mapping, and
//! it is owned here, by the call-control component, not by ambient
//! global state.

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::Message;
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::BillingStart;
use crate::store::CallStatus;
use crate::AppState;

/// Server-to-client event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WsEventType {
    /// Connection established; payload carries the user's own id.
    #[serde(rename = "online")]
    Online,
    /// A call was created for an invite the client sent.
    #[serde(rename = "call:created")]
    CallCreated,
    /// An incoming call is ringing.
    #[serde(rename = "call:ring")]
    CallRing,
    /// The call went active.
    #[serde(rename = "call:active")]
    CallActive,
    /// The call ended.
    #[serde(rename = "call:ended")]
    CallEnded,
    /// The call failed (e.g. no token to reserve).
    #[serde(rename = "call:failed")]
    CallFailed,
    /// Forwarded WebRTC offer.
    #[serde(rename = "webrtc:offer")]
    WebrtcOffer,
    /// Forwarded WebRTC answer.
    #[serde(rename = "webrtc:answer")]
    WebrtcAnswer,
    /// Forwarded ICE candidate.
    #[serde(rename = "webrtc:ice")]
    WebrtcIce,
    /// Error message.
    #[serde(rename = "error")]
    Error,
}

/// WebSocket message wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMessage<T> {
    /// Event type.
    pub event: WsEventType,
    /// Event data.
    pub data: T,
    /// Timestamp.
    pub timestamp: chrono::DateTime<Utc>,
}

impl<T: Serialize> WsMessage<T> {
    pub fn new(event: WsEventType, data: T) -> Self {
        Self {
            event,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Client-to-server messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "call:invite")]
    #[serde(rename_all = "camelCase")]
    CallInvite { callee_id: Uuid },

    #[serde(rename = "call:answer")]
    #[serde(rename_all = "camelCase")]
    CallAnswer { call_id: Uuid },

    #[serde(rename = "call:end")]
    #[serde(rename_all = "camelCase")]
    CallEnd { call_id: Uuid },

    #[serde(rename = "webrtc:offer")]
    #[serde(rename_all = "camelCase")]
    WebrtcOffer {
        call_id: Uuid,
        to_user_id: Uuid,
        sdp: serde_json::Value,
    },

    #[serde(rename = "webrtc:answer")]
    #[serde(rename_all = "camelCase")]
    WebrtcAnswer {
        call_id: Uuid,
        to_user_id: Uuid,
        sdp: serde_json::Value,
    },

    #[serde(rename = "webrtc:ice")]
    #[serde(rename_all = "camelCase")]
    WebrtcIce {
        call_id: Uuid,
        to_user_id: Uuid,
        candidate: serde_json::Value,
    },
}

/// Online-presence registry: user id -> live connection senders.
///
/// Each user can hold several connections (multiple tabs/devices);
/// a message to a user fans out to all of them.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, Vec<broadcast::Sender<String>>>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new connection for a user. Returns the receiver that
    /// feeds this connection.
    pub async fn register(&self, user: Uuid) -> broadcast::Receiver<String> {
        let mut sessions = self.sessions.lock().await;
        let (tx, rx) = broadcast::channel(100);
        sessions.entry(user).or_default().push(tx);
        info!(
            %user,
            connections = sessions.get(&user).map(|v| v.len()).unwrap_or(0),
            "websocket registered"
        );
        rx
    }

    /// Drop dead connections for a user; the user disappears from the
    /// registry once the last one is gone.
    pub async fn unregister(&self, user: Uuid) {
        let mut sessions = self.sessions.lock().await;
        if let Some(senders) = sessions.get_mut(&user) {
            senders.retain(|tx| tx.receiver_count() > 0);
            if senders.is_empty() {
                sessions.remove(&user);
                info!(%user, "user offline");
            }
        }
    }

    /// Whether the user currently has a live connection.
    pub async fn is_online(&self, user: Uuid) -> bool {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&user)
            .map(|v| v.iter().any(|tx| tx.receiver_count() > 0))
            .unwrap_or(false)
    }

    /// Send an event to every live connection of a user. A user with
    /// no connections is not an error; the message is simply dropped.
    pub async fn send_to_user<T: Serialize>(
        &self,
        user: Uuid,
        event: WsEventType,
        data: T,
    ) -> Result<(), String> {
        let json = WsMessage::new(event, data)
            .to_json()
            .map_err(|e| format!("failed to serialize message: {e}"))?;

        let mut sessions = self.sessions.lock().await;
        if let Some(senders) = sessions.get_mut(&user) {
            senders.retain(|tx| tx.receiver_count() > 0 && tx.send(json.clone()).is_ok());
            if senders.is_empty() {
                sessions.remove(&user);
            }
        } else {
            debug!(%user, "no live connection; event dropped");
        }
        Ok(())
    }

    /// Total live connections across all users.
    pub async fn total_connections(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.values().map(|v| v.len()).sum()
    }
}

/// Configure WebSocket routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws/{user}", web::get().to(websocket_handler));
}

/// WebSocket connection handler.
///
/// ## Endpoint
///
/// `GET /ws/:user`
pub async fn websocket_handler(
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Payload,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse, actix_web::Error> {
    let user = path.into_inner();
    info!(%user, "websocket connection request");

    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;

    let registry = state.presence.clone();
    let mut rx = registry.register(user).await;
    let state = state.get_ref().clone();

    actix_rt::spawn(async move {
        let welcome = WsMessage::new(WsEventType::Online, serde_json::json!({ "me": user }));
        if let Ok(json) = welcome.to_json() {
            let _ = session.text(json).await;
        }

        // Forward registry events to this connection.
        let mut session_clone = session.clone();
        let registry_for_forwarder = registry.clone();
        actix_rt::spawn(async move {
            while let Ok(msg) = rx.recv().await {
                if session_clone.text(msg).await.is_err() {
                    registry_for_forwarder.unregister(user).await;
                    break;
                }
            }
        });

        while let Some(Ok(msg)) = msg_stream.next().await {
            match msg {
                Message::Ping(bytes) => {
                    let _ = session.pong(&bytes).await;
                }
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => handle_client_message(&state, user, message).await,
                    Err(e) => {
                        debug!(%user, %e, "unparseable client message");
                        let reply = WsMessage::new(
                            WsEventType::Error,
                            serde_json::json!({ "message": "unrecognized message" }),
                        );
                        if let Ok(json) = reply.to_json() {
                            let _ = session.text(json).await;
                        }
                    }
                },
                Message::Close(reason) => {
                    info!(%user, ?reason, "websocket closed");
                    break;
                }
                _ => {}
            }
        }

        registry.unregister(user).await;
        info!(%user, "websocket disconnected");
    });

    Ok(response)
}

/// Dispatch one client message.
async fn handle_client_message(state: &Arc<AppState>, user: Uuid, message: ClientMessage) {
    match message {
        ClientMessage::CallInvite { callee_id } => {
            let call = match state.calls.create_ringing(user, callee_id).await {
                Ok(call) => call,
                Err(e) => {
                    warn!(%user, %e, "invite failed");
                    return;
                }
            };
            let _ = state
                .presence
                .send_to_user(
                    callee_id,
                    WsEventType::CallRing,
                    serde_json::json!({ "callId": call.id, "from": user }),
                )
                .await;
            let _ = state
                .presence
                .send_to_user(
                    user,
                    WsEventType::CallCreated,
                    serde_json::json!({ "callId": call.id }),
                )
                .await;
        }

        ClientMessage::CallAnswer { call_id } => {
            let call = match state.calls.mark_active(call_id).await {
                Ok(call) => call,
                Err(e) => {
                    warn!(%user, %call_id, %e, "answer failed");
                    return;
                }
            };

            // The caller pays; billing decides whether today is billable.
            match state.billing.start(call_id, call.caller_id).await {
                Ok(BillingStart::NoBalance) => {
                    for party in [call.caller_id, call.callee_id] {
                        let _ = state
                            .presence
                            .send_to_user(
                                party,
                                WsEventType::CallFailed,
                                serde_json::json!({ "callId": call_id, "reason": "insufficientBalance" }),
                            )
                            .await;
                    }
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%call_id, %e, "billing start failed");
                    return;
                }
            }

            for party in [call.caller_id, call.callee_id] {
                let _ = state
                    .presence
                    .send_to_user(
                        party,
                        WsEventType::CallActive,
                        serde_json::json!({ "callId": call_id }),
                    )
                    .await;
            }
        }

        ClientMessage::CallEnd { call_id } => {
            if let Err(e) = state.billing.stop(call_id).await {
                warn!(%call_id, %e, "billing stop failed");
            }
            match state.calls.end_call(call_id, CallStatus::Ended).await {
                Ok(call) => {
                    for party in [call.caller_id, call.callee_id] {
                        let _ = state
                            .presence
                            .send_to_user(
                                party,
                                WsEventType::CallEnded,
                                serde_json::json!({ "callId": call_id }),
                            )
                            .await;
                    }
                }
                Err(e) => warn!(%call_id, %e, "end failed"),
            }
        }

        // Pure relay: payloads are forwarded untouched, keyed by the
        // online-user lookup.
        ClientMessage::WebrtcOffer {
            call_id,
            to_user_id,
            sdp,
        } => {
            let _ = state
                .presence
                .send_to_user(
                    to_user_id,
                    WsEventType::WebrtcOffer,
                    serde_json::json!({ "callId": call_id, "from": user, "sdp": sdp }),
                )
                .await;
        }
        ClientMessage::WebrtcAnswer {
            call_id,
            to_user_id,
            sdp,
        } => {
            let _ = state
                .presence
                .send_to_user(
                    to_user_id,
                    WsEventType::WebrtcAnswer,
                    serde_json::json!({ "callId": call_id, "from": user, "sdp": sdp }),
                )
                .await;
        }
        ClientMessage::WebrtcIce {
            call_id,
            to_user_id,
            candidate,
        } => {
            let _ = state
                .presence
                .send_to_user(
                    to_user_id,
                    WsEventType::WebrtcIce,
                    serde_json::json!({ "callId": call_id, "from": user, "candidate": candidate }),
                )
                .await;
        }
    }
}
