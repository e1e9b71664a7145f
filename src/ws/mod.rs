pub mod handlers;
pub mod host;
pub mod player;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::bus::BusSubscription;
use crate::protocol::{ClientMessage, ServerMessage, SessionEvent, PROTOCOL_VERSION};
use crate::session::SessionContext;
use crate::state::AppState;
use crate::view::{GameSnapshot, ReliableView};

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!("WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let welcome = ServerMessage::Welcome {
        protocol: PROTOCOL_VERSION.to_string(),
        server_now: chrono::Utc::now().to_rfc3339(),
    };
    if !send(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        return;
    }

    let mut session: Option<SessionContext> = None;
    // Live bus events plus a store-backed view, both set up once the connection joins a game
    let mut events: Option<BusSubscription> = None;
    let mut snapshots: Option<watch::Receiver<Option<GameSnapshot>>> = None;
    let mut _view: Option<ReliableView<GameSnapshot>> = None;
    // Identity counted in the game's presence, released on teardown
    let mut online: Option<SessionContext> = None;

    loop {
        tokio::select! {
            event = next_event(&mut events) => match event {
                Ok(event) => {
                    if !addressed_to(&event, session.as_ref()) {
                        continue;
                    }
                    if !send(&mut sender, &ServerMessage::Event { event }).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Client fell {} events behind on the bus", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    events = None;
                }
            },

            snapshot = next_snapshot(&mut snapshots) => match snapshot {
                Ok(Some(s)) => {
                    let msg = ServerMessage::GameState {
                        game: s.game,
                        players: s.players,
                        taken_avatars: s.taken_avatars,
                        connected: s.connected,
                    };
                    if !send(&mut sender, &msg).await {
                        break;
                    }
                }
                Ok(None) => {}
                Err(_) => {
                    snapshots = None;
                }
            },

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text);

                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                let response =
                                    handlers::handle_message(client_msg, &mut session, &state).await;

                                if online.is_none() {
                                    if let Some(ctx) = &session {
                                        events = Some(state.bus.subscribe(&ctx.channel()).await);
                                        let view = state.watch_game(&ctx.game_id);
                                        snapshots = Some(view.subscribe());
                                        _view = Some(view);
                                        // After subscribing, so this socket sees its own arrival
                                        state.connect(ctx).await;
                                        online = Some(ctx.clone());
                                    }
                                }

                                if let Some(response) = response {
                                    if !send(&mut sender, &response).await {
                                        tracing::error!("Failed to send response");
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to parse client message: {}", e);
                                let error = ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                };
                                let _ = send(&mut sender, &error).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(ctx) = &online {
        state.disconnect(ctx).await;
    }

    match &session {
        Some(ctx) => tracing::info!(
            "WebSocket connection closed for player {} in game {}",
            ctx.player_id,
            ctx.game_code
        ),
        None => tracing::info!("WebSocket connection closed before joining"),
    }
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            true
        }
    }
}

async fn next_event(
    events: &mut Option<BusSubscription>,
) -> Result<SessionEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        // Not joined yet: wait forever
        None => std::future::pending().await,
    }
}

async fn next_snapshot(
    snapshots: &mut Option<watch::Receiver<Option<GameSnapshot>>>,
) -> Result<Option<GameSnapshot>, watch::error::RecvError> {
    match snapshots {
        Some(rx) => {
            rx.changed().await?;
            Ok(rx.borrow_and_update().clone())
        }
        None => std::future::pending().await,
    }
}

/// Signal envelopes only go to their addressee; everything else goes to everyone
fn addressed_to(event: &SessionEvent, session: Option<&SessionContext>) -> bool {
    match (event, session) {
        (SessionEvent::Signal(envelope), Some(ctx)) => envelope.to == ctx.player_id,
        (SessionEvent::Signal(_), None) => false,
        _ => true,
    }
}
