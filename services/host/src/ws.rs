//! `/audio` websocket: the robot's speaker and microphone over the network.
//!
//! Binary frames from the client are microphone PCM16 at 24 kHz. The server
//! sends synthesized speech as binary frames and `{"type":"mic","open":..}`
//! text frames whenever the microphone gate changes.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{Span, debug, info, instrument, trace, warn};
use uuid::Uuid;

use crate::{audio::HubFrame, models::AudioControl, state::AppState};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn audio_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_audio_socket(socket, state))
}

fn control_frame(control: &AudioControl) -> Option<Message> {
    serde_json::to_string(control)
        .ok()
        .map(|text| Message::Text(text.into()))
}

#[instrument(name = "audio_client", skip_all, fields(client_id))]
async fn handle_audio_socket(socket: WebSocket, state: Arc<AppState>) {
    Span::current().record("client_id", tracing::field::display(Uuid::new_v4()));
    info!("Audio client connected");

    let (mut socket_tx, mut socket_rx) = socket.split();
    let mut frames = state.audio.subscribe();

    let mic_open = state.snapshot.borrow().mic_open;
    if let Some(msg) = control_frame(&AudioControl::Mic { open: mic_open }) {
        if socket_tx.send(msg).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            msg = socket_rx.next() => match msg {
                Some(Ok(Message::Binary(pcm))) => {
                    state.audio.push_mic(pcm);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Audio client socket error");
                    break;
                }
            },
            frame = frames.recv() => {
                let msg = match frame {
                    Ok(HubFrame::Pcm(pcm)) => Some(Message::Binary(pcm)),
                    Ok(HubFrame::Mic { open }) => control_frame(&AudioControl::Mic { open }),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Audio client lagging, frames skipped");
                        None
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Some(msg) = msg {
                    if socket_tx.send(msg).await.is_err() {
                        trace!("Audio client send failed");
                        break;
                    }
                }
            }
        }
    }
    info!("Audio client disconnected");
}
