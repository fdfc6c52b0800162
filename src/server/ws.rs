//! WebSocket upgrade handler and message loop.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::AppState;
use crate::session::{ServerEvent, Session};

pub(super) async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Payload(String),
    Unsupported,
    Control,
    Close,
}

fn classify(message: WsMessage) -> Frame {
    match message {
        WsMessage::Text(text) => Frame::Payload(text.as_str().to_string()),
        WsMessage::Binary(_) => Frame::Unsupported,
        WsMessage::Ping(_) | WsMessage::Pong(_) => Frame::Control,
        WsMessage::Close(_) => Frame::Close,
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Forward events to the socket as they are produced
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    tracing::error!("failed to serialize server event: {}", err);
                    continue;
                }
            };

            if sender.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(state.resolver.clone());

    while let Some(Ok(message)) = receiver.next().await {
        match classify(message) {
            Frame::Payload(text) => {
                session.handle(&text, &tx).await;
            }
            Frame::Unsupported => {
                let _ = tx.send(ServerEvent::Error(
                    "payloads must be sent as text frames".to_string(),
                ));
            }
            Frame::Control => {}
            Frame::Close => break,
        }
    }

    drop(tx);
    let _ = send_task.await;

    tracing::debug!(
        "session closed with {} messages of history",
        session.history().len()
    );
}
