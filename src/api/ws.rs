use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::codec::encode;
use crate::state::AppState;
use crate::ws::run_session;

/// Frames buffered in each direction between the socket and the session.
const FRAME_BUFFER: usize = 64;

/// GET /api/v1/ws - Live search session
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
    let (ops_tx, mut ops_rx) = mpsc::channel(FRAME_BUFFER);

    let session = tokio::spawn(run_session(state.backends.clone(), frames_rx, ops_tx));
    let writer = tokio::spawn(async move {
        while let Some(op) = ops_rx.recv().await {
            let text = match encode(&op) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Failed to encode websocket frame: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if frames_tx.send(text.as_str().to_owned()).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    // closing the frame channel ends the session, which cancels its query
    drop(frames_tx);
    let _ = session.await;
    let _ = writer.await;
}
