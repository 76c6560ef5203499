use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::chat::presence;
use crate::state::AppState;
use crate::ws::events::Outbound;
use crate::ws::protocol;
use crate::ws::ConnectionHandle;

/// Ping interval: server sends WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, drains the connection's outbound channel
/// - Reader loop: decodes frames and runs each event to completion, in order
///
/// Any component can reach this client by pushing through the registered
/// [`ConnectionHandle`].
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (handle, rx) = ConnectionHandle::channel();

    // Register and publish presence; also queues this client's snapshot
    presence::join(&state, &user_id, &handle);

    tracing::info!(
        user_id = %user_id,
        connection_id = %handle.id,
        "WebSocket actor started"
    );

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Ping task: sends periodic pings and monitors pong responses
    let ping_conn = handle.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if !ping_conn.send_frame(Message::Ping(vec![1, 2, 3, 4].into())) {
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(connection_id = %ping_conn.id, "Pong timeout, closing connection");
                    ping_conn.close(1001, "Pong timeout");
                    break;
                }
            }
        }
    });

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &handle, &state, &user_id).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(user_id = %user_id, "Ignoring binary frame");
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    handle.send_frame(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();
    ping_handle.abort();

    // No-op if a newer connection already took over this user's session
    presence::leave(&state, &user_id, &handle).await;

    tracing::info!(
        user_id = %user_id,
        connection_id = %handle.id,
        "WebSocket actor stopped"
    );
}

/// Writer task: encodes outbound events as JSON text frames and forwards them
/// to the WebSocket sink. Stops after sending a close frame.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(out) = rx.recv().await {
        let (msg, closing) = match out {
            Outbound::Event(event) => match serde_json::to_string(&event) {
                Ok(json) => (Message::Text(json.into()), false),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode server event");
                    continue;
                }
            },
            Outbound::Frame(frame) => {
                let closing = matches!(frame, Message::Close(_));
                (frame, closing)
            }
        };
        if ws_sender.send(msg).await.is_err() {
            break;
        }
        if closing {
            break;
        }
    }
}

/// Close frame for a rejected handshake.
pub fn close_frame(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}
