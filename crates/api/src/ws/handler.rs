use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use journal_core::types::JobId;
use journal_pipeline::subscribers::{SubscriberMessage, SubscriberRegistry, Subscription};

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

/// GET /api/v1/jobs/{id}/ws
///
/// Authorizes the caller and registers the subscription before upgrading,
/// so an unknown or foreign job is refused with a normal HTTP error.
pub async fn job_ws_handler(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    let subscription = state.engine.subscribe(auth.requester(), job_id).await?;
    let registry = Arc::clone(state.engine.subscribers());

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, subscription, registry)))
}

/// Map a subscriber message to the frame sent to the client.
///
/// Events become JSON text frames; keepalives become Ping frames.
pub fn to_ws_message(message: SubscriberMessage) -> Option<Message> {
    match message {
        SubscriberMessage::Event(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::error!(job_id = %event.job_id, error = %e, "Failed to serialize job event");
                None
            }
        },
        SubscriberMessage::Ping => Some(Message::Ping(Default::default())),
    }
}

/// Pump one subscription into one socket.
///
/// The channel closing (terminal event delivered, or shutdown) ends the
/// stream with a Close frame. Inbound frames are ignored apart from Close.
async fn handle_socket(
    socket: WebSocket,
    subscription: Subscription,
    registry: Arc<SubscriberRegistry>,
) {
    let Subscription {
        id,
        job_id,
        mut receiver,
    } = subscription;
    tracing::info!(job_id = %job_id, subscriber_id = id, "Job WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            let Some(frame) = to_ws_message(message) else {
                continue;
            };
            if sink.send(frame).await.is_err() {
                tracing::debug!(job_id = %job_id, subscriber_id = id, "WebSocket sink closed");
                return;
            }
        }
        let close = Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "stream ended".into(),
        }));
        let _ = sink.send(close).await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(Message::Pong(_)) => {
                    tracing::trace!(job_id = %job_id, subscriber_id = id, "Pong received");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(job_id = %job_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.unsubscribe(job_id, id).await;
    tracing::info!(job_id = %job_id, subscriber_id = id, "Job WebSocket disconnected");
}
