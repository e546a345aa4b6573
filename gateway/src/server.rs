use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use base64::Engine;
use ckadlab_common::rate_limit::{RateLimiter, middleware::RateLimitLayer};
use ckadlab_core::{Identity, IdentityError, SandboxDriver, SandboxHandle, Session, SessionStatus};
use ckadlab_store::SessionStore;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::args::GatewayArgs;
use crate::connections::SupersessionRegistry;
use crate::protocol::{ClientMessage, ServerMessage, close_code};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub sandbox_driver: Arc<dyn SandboxDriver>,
    pub identity: Arc<dyn Identity>,
    pub registry: SupersessionRegistry,
    pub heartbeat_interval: Duration,
    pub shutdown: CancellationToken,
    /// RATE_LIMIT_AUTH_PER_MINUTE: guards bearer-token verification on
    /// WS connect, independent of the general connection-attempt budget.
    pub auth_limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    token: Option<String>,
    session_id: Uuid,
}

pub async fn run_server(args: GatewayArgs, state: AppState, general_limiter: RateLimiter) -> anyhow::Result<()> {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(healthz))
        .route("/terminal", get(ws_handler))
        .layer(RateLimitLayer::new(general_limiter))
        .layer(cors)
        .with_state(state.clone());

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    info!(%addr, "starting terminal gateway");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let notify_state = state.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        ckadlab_common::shutdown::shutdown_signal().await;
        info!("shutdown signal received, notifying active terminal connections");
        notify_state.shutdown.cancel();
    });

    // §5: notify, wait up to 5s for connections to close on their own, then
    // exit regardless. Each `handle_socket` loop races `state.shutdown`
    // itself and closes promptly once cancelled; this bound only fires if
    // one gets stuck.
    tokio::select! {
        result = server => result.context("gateway server failed")?,
        _ = async {
            ckadlab_common::shutdown::shutdown_signal().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        } => {
            warn!("graceful shutdown grace period elapsed, exiting");
        }
    }
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    "OK"
}

fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let auth_key = format!("auth:{}", client_key(&headers));
    ws.on_upgrade(move |socket| handle_socket(socket, query, state, auth_key))
}

async fn handle_socket(socket: WebSocket, query: ConnectQuery, state: AppState, auth_key: String) {
    let (sender, mut receiver) = socket.split();
    let (send_tx, send_rx) = mpsc::channel::<Message>(64);
    let relay_cancel = CancellationToken::new();
    tokio::spawn(sender_main(sender, send_rx, relay_cancel.clone()));

    if !state.auth_limiter.check(&auth_key).await {
        close_with(&send_tx, close_code::RATE_LIMITED).await;
        return;
    }

    let owner_id = match authenticate(&state, query.token.as_deref()).await {
        Ok(owner_id) => owner_id,
        Err(code) => {
            close_with(&send_tx, code).await;
            return;
        }
    };

    let session = match load_session(&state, query.session_id, owner_id).await {
        Ok(session) => session,
        Err(code) => {
            close_with(&send_tx, code).await;
            return;
        }
    };

    let Some(sandbox_handle) = session.sandbox_handle.clone() else {
        close_with(&send_tx, close_code::SESSION_NOT_ACTIVE).await;
        return;
    };

    let mut pty = match state.sandbox_driver.open_pty(&SandboxHandle(sandbox_handle), 80, 24).await {
        Ok(pty) => pty,
        Err(err) => {
            error!(%err, session_id = %session.id, "failed to open pty");
            close_with(&send_tx, close_code::SESSION_NOT_ACTIVE).await;
            return;
        }
    };

    let eviction_rx = state.registry.register(owner_id, session.id);

    let _ = send_tx
        .send(to_ws_message(&ServerMessage::Connected {
            session_id: session.id,
            message: "terminal attached".to_string(),
        }))
        .await;

    let ckadlab_core::PtyStream {
        reader: pty_reader,
        mut writer,
        resize_tx,
        mut exit_code,
    } = pty;

    // Forward PTY output to the client on its own task; input/resize/ping
    // and the exit/eviction/heartbeat/shutdown races all live in the main
    // loop below, which alone owns `writer`/`resize_tx`.
    let pty_send_tx = send_tx.clone();
    let pty_reader_task = tokio::spawn(async move {
        let mut pty_reader = pty_reader;
        let mut buf = [0u8; 4096];
        loop {
            match tokio::io::AsyncReadExt::read(&mut pty_reader, &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let data = base64::engine::general_purpose::STANDARD.encode(&buf[..n]);
                    if pty_send_tx.send(to_ws_message(&ServerMessage::Output { data })).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut heartbeat = tokio::time::interval(state.heartbeat_interval);
    heartbeat.tick().await;
    // §4.6: the Gateway pings every tick and terminates after two
    // consecutive unanswered pings, independent of client-initiated traffic.
    let mut unanswered_pings: u32 = 0;

    let mut eviction_rx = eviction_rx;
    let mut close_reason = close_code::SERVER_SHUTDOWN;

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                close_reason = close_code::SERVER_SHUTDOWN;
                let _ = send_tx
                    .send(to_ws_message(&ServerMessage::ServerShutdown {
                        message: "server is shutting down".to_string(),
                    }))
                    .await;
                break;
            }
            _ = &mut eviction_rx => {
                close_reason = close_code::SUPERSEDED;
                break;
            }
            _ = heartbeat.tick() => {
                if unanswered_pings >= 2 {
                    close_reason = close_code::HEARTBEAT_TIMEOUT;
                    break;
                }
                if send_tx.send(to_ws_message(&ServerMessage::Ping)).await.is_err() {
                    break;
                }
                unanswered_pings += 1;
            }
            code = &mut exit_code => {
                let code = code.unwrap_or(-1);
                let _ = send_tx.send(to_ws_message(&ServerMessage::Exit { code })).await;
                break;
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Input { data }) => {
                                if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(&data) {
                                    if tokio::io::AsyncWriteExt::write_all(&mut writer, &bytes).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Ok(ClientMessage::Resize { cols, rows }) => {
                                let _ = resize_tx.send((cols, rows)).await;
                            }
                            Ok(ClientMessage::Ping) => {
                                let _ = send_tx.send(to_ws_message(&ServerMessage::Pong)).await;
                            }
                            Ok(ClientMessage::Pong) => {
                                unanswered_pings = 0;
                            }
                            Err(err) => {
                                warn!(%err, "malformed client message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        warn!(%err, "websocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    pty_reader_task.abort();
    // If this connection was itself the one superseded, the registry entry
    // already belongs to the connection that evicted it; removing it here
    // would delete that newer connection's live entry instead of ours.
    if close_reason != close_code::SUPERSEDED {
        state.registry.unregister(owner_id, session.id);
    }
    relay_cancel.cancel();
    close_with(&send_tx, close_reason).await;
}

async fn authenticate(state: &AppState, token: Option<&str>) -> Result<Uuid, u16> {
    let Some(token) = token else {
        return Err(close_code::MISSING_CREDENTIAL);
    };
    state.identity.verify(token).await.map(|v| v.owner_id).map_err(|err| match err {
        IdentityError::Expired => close_code::CREDENTIAL_EXPIRED,
        IdentityError::Invalid => close_code::CREDENTIAL_INVALID,
    })
}

async fn load_session(state: &AppState, session_id: Uuid, owner_id: Uuid) -> Result<Session, u16> {
    let session = state
        .store
        .get(session_id)
        .await
        .map_err(|_| close_code::SESSION_NOT_FOUND)?
        .ok_or(close_code::SESSION_NOT_FOUND)?;
    if session.owner_id != owner_id {
        return Err(close_code::FORBIDDEN);
    }
    if session.status != SessionStatus::Running {
        return Err(close_code::SESSION_NOT_ACTIVE);
    }
    Ok(session)
}

async fn sender_main(mut sender: SplitSink<WebSocket, Message>, mut send_rx: mpsc::Receiver<Message>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = send_rx.recv() => {
                match msg {
                    Some(msg) => {
                        if sender.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

async fn close_with(send_tx: &mpsc::Sender<Message>, code: u16) {
    let _ = send_tx
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: "".into(),
        })))
        .await;
}

fn to_ws_message(msg: &ServerMessage) -> Message {
    Message::Text(serde_json::to_string(msg).unwrap_or_default().into())
}
