//! `/ws` push channel.
//!
//! Each socket gets a client id, a writer task draining an event channel, and
//! at most one live stream registered in the [`StreamRegistry`](crate::services::StreamRegistry).

use crate::server::AppState;
use crate::services::stream_registry::{run_stream, StreamTask};
use crate::services::{LookupParams, StreamEvent, StreamStatus};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const EVENT_BUFFER: usize = 32;

/// Messages a client may send
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    StartStreaming(LookupParams),
    StopStreaming,
}

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[instrument(skip_all, fields(client_id))]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4().to_string();
    tracing::Span::current().record("client_id", client_id.as_str());
    info!("Client connected");

    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode stream event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let _ = events_tx
        .send(StreamEvent::Status {
            status: StreamStatus::Connected,
            client_id: client_id.clone(),
        })
        .await;

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_client_message(&state, &client_id, text.as_str(), &events_tx).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Socket error");
                break;
            }
        }
    }

    state.registry.stop(&client_id).await;
    drop(events_tx);
    writer.abort();
    info!("Client disconnected");
}

/// Apply one client message. Replies go through `events`.
pub async fn handle_client_message(
    state: &AppState,
    client_id: &str,
    text: &str,
    events: &mpsc::Sender<StreamEvent>,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            let _ = events
                .send(StreamEvent::LiveDataError {
                    error: format!("Invalid message: {}", e),
                })
                .await;
            return;
        }
    };

    match message {
        ClientMessage::StartStreaming(params) => {
            if let Err(e) = params.symbol().and_then(|_| params.expiry()) {
                let _ = events
                    .send(StreamEvent::LiveDataError { error: e.to_string() })
                    .await;
                return;
            }

            let (generation, stop) = state.registry.start(client_id).await;
            let _ = events
                .send(StreamEvent::Status {
                    status: StreamStatus::StreamingStarted,
                    client_id: client_id.to_string(),
                })
                .await;

            tokio::spawn(run_stream(StreamTask {
                registry: state.registry.clone(),
                query: state.query.clone(),
                client_id: client_id.to_string(),
                generation,
                params,
                interval: state.stream_interval,
                stop,
                events: events.clone(),
            }));
        }
        ClientMessage::StopStreaming => {
            state.registry.stop(client_id).await;
            let _ = events
                .send(StreamEvent::Status {
                    status: StreamStatus::StreamingStopped,
                    client_id: client_id.to_string(),
                })
                .await;
        }
    }
}
