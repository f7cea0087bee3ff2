//! The single `/ws?ticket=…` handshake (§4.8, §6): a short-lived ticket
//! buys a socket, never the long-lived access token. Once upgraded, a
//! writer task drains `Hub::register`'s outbound queue into the socket
//! while the accept task reads and dispatches `InboundMessage` frames
//! against the `Coordinator`; both stop as soon as either side closes.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use quiz_cache::QuizCache;
use quiz_errors::AppError;
use quiz_models::events::InboundMessage;
use quiz_repo::{AuthRepo, UserRepo};

use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct WsQuery {
    pub ticket: String,
}

pub async fn ws_handshake<U, A, C>(
    State(state): State<AppState<U, A, C>>,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError>
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    let claims = state.auth.verify_ws_ticket_fresh(&query.ticket).await?;
    let ip = addr.ip();

    // §4.1: the reader enforces a maximum inbound frame size; axum applies
    // this at the protocol layer so an oversized frame never reaches
    // `handle_socket` at all.
    let max_message_size = state.hub.max_message_size();
    Ok(ws
        .max_message_size(max_message_size)
        .max_frame_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, claims.sub, ip)))
}

async fn handle_socket<U, A, C>(socket: WebSocket, state: AppState<U, A, C>, user_id: quiz_models::Id, ip: IpAddr)
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    let session = match state.hub.register(user_id, ip) {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(%user_id, ?err, "ws registration rejected");
            return;
        }
    };
    let connection_id = session.connection_id;

    let (mut sink, mut stream) = socket.split();

    // §5: "socket read idle = 60s with 30s pings" — the writer side pings
    // at half the idle-sweep window so a healthy-but-quiet client's pong
    // refreshes `last_seen` (via `Hub::touch` on the reader side) well
    // before `sweep_idle` would otherwise evict it.
    let ping_interval = state.hub.pong_wait() / 2;
    let write_wait = state.hub.write_wait();
    let mut outbound = session.outbound;
    let writer = tokio::spawn(async move {
        let mut ping_ticker = tokio::time::interval(ping_interval);
        ping_ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                event = outbound.recv() => {
                    let Some(event) = event else { break };
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    match tokio::time::timeout(write_wait, sink.send(Message::Text(text))).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
                _ = ping_ticker.tick() => {
                    match tokio::time::timeout(write_wait, sink.send(Message::Ping(Vec::new()))).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let Ok(frame) = frame else {
            break;
        };
        match frame {
            Message::Text(text) => {
                handle_inbound(&state, connection_id, user_id, &text).await;
            }
            Message::Ping(_) | Message::Pong(_) => {
                state.hub.touch(connection_id, user_id);
            }
            Message::Close(_) => break,
            Message::Binary(_) => {}
        }
    }

    writer.abort();
    state.hub.unregister(connection_id, user_id, ip);
}

async fn handle_inbound<U, A, C>(state: &AppState<U, A, C>, connection_id: quiz_fabric::ConnectionId, user_id: quiz_models::Id, text: &str)
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    state.hub.touch(connection_id, user_id);

    let message = match serde_json::from_str::<InboundMessage>(text) {
        Ok(message) => message,
        Err(err) => {
            state
                .hub
                .send_to_user(
                    user_id,
                    AppError::Validation(format!("unrecognized message: {err}")).to_ws_frame(),
                )
                .await;
            return;
        }
    };

    let result = match message {
        InboundMessage::UserReady { quiz_id } => {
            state.hub.subscribe_to_quiz(connection_id, user_id, quiz_id);
            state.coordinator.mark_ready(user_id).await
        }
        InboundMessage::UserAnswer { question_id, selected_option, timestamp: _ } => {
            state.coordinator.submit_answer(user_id, question_id, selected_option).await
        }
        InboundMessage::UserHeartbeat => Ok(()),
        InboundMessage::UserResync { quiz_id } => {
            state.hub.subscribe_to_quiz(connection_id, user_id, quiz_id);
            match state.coordinator.resync_snapshot(user_id, chrono::Utc::now().timestamp_millis()).await {
                Ok(Some(snapshot)) => {
                    state.hub.send_to_user(user_id, snapshot).await;
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(err) => Err(err),
            }
        }
    };

    if let Err(err) = result {
        state.hub.send_to_user(user_id, err.to_ws_frame()).await;
    }
}
