//! The WebSocket transport task and its handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use pepper_realtime_types::FrameSink;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode},
};
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;

pub const NORMAL_CLOSURE: u16 = 1000;
pub const USER_DISCONNECT_REASON: &str = "User initiated disconnect";

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid handshake request: {0}")]
    Request(String),
    #[error("Invalid header value for {0}")]
    Header(String),
    #[error("Failed to connect to realtime backend: {0}")]
    Connect(String),
}

/// Lifecycle and data callbacks from the connection, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Text(String),
    Closing { code: u16, reason: String },
    Closed { code: u16, reason: String },
    Failure(String),
}

#[derive(Debug)]
enum Command {
    Frame(String),
    Close { code: u16, reason: String },
}

/// Cheap, cloneable handle for sending frames and closing the connection.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<Command>,
    open: Arc<AtomicBool>,
}

impl TransportHandle {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Closes the connection. Calling this more than once is harmless.
    pub fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }
}

impl FrameSink for TransportHandle {
    fn send_frame(&self, frame: String) -> bool {
        if !self.is_open() {
            return false;
        }
        self.commands.send(Command::Frame(frame)).is_ok()
    }
}

pub struct Transport;

impl Transport {
    /// Opens the connection and spawns the I/O task.
    ///
    /// The first event on the returned receiver is always `Open`. The task
    /// never reconnects; after `Closed` or `Failure` the receiver ends.
    pub async fn connect(
        endpoint: &Endpoint,
    ) -> Result<(TransportHandle, mpsc::Receiver<TransportEvent>), TransportError> {
        let request = endpoint.request()?;
        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!(provider = ?endpoint.provider, model = %endpoint.model, "Connected to realtime backend.");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let open = Arc::new(AtomicBool::new(true));
        let _ = event_tx.send(TransportEvent::Open).await;

        tokio::spawn(run(ws_stream, cmd_rx, event_tx, open.clone()));

        Ok((
            TransportHandle {
                commands: cmd_tx,
                open,
            },
            event_rx,
        ))
    }
}

async fn run<S>(
    ws_stream: S,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
) where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut close_code = NORMAL_CLOSURE;
    let mut close_reason = String::new();
    let mut commands_open = true;

    loop {
        tokio::select! {
            biased;
            cmd = commands.recv(), if commands_open => {
                match cmd {
                    Some(Command::Frame(text)) => {
                        if let Err(e) = ws_tx.send(Message::Text(text)).await {
                            open.store(false, Ordering::SeqCst);
                            let _ = events.send(TransportEvent::Failure(e.to_string())).await;
                            return;
                        }
                    }
                    Some(Command::Close { code, reason }) => {
                        debug!(code, %reason, "Closing realtime connection");
                        close_code = code;
                        close_reason = reason.clone();
                        let frame = CloseFrame { code: CloseCode::from(code), reason: reason.clone().into() };
                        if ws_tx.send(Message::Close(Some(frame))).await.is_err() {
                            let _ = events.send(TransportEvent::Closed { code, reason }).await;
                            return;
                        }
                        let _ = events.send(TransportEvent::Closing { code, reason }).await;
                    }
                    None => {
                        // Every handle is gone; nobody can observe further traffic.
                        commands_open = false;
                        if open.swap(false, Ordering::SeqCst) {
                            let frame = CloseFrame {
                                code: CloseCode::from(NORMAL_CLOSURE),
                                reason: USER_DISCONNECT_REASON.into(),
                            };
                            let _ = ws_tx.send(Message::Close(Some(frame))).await;
                        }
                    }
                }
            },
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(TransportEvent::Text(text)).await.is_err() {
                            debug!("Transport event receiver dropped");
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let was_open = open.swap(false, Ordering::SeqCst);
                        if let Some(frame) = frame {
                            close_code = u16::from(frame.code);
                            close_reason = frame.reason.to_string();
                        }
                        if was_open {
                            // Peer-initiated close: answer it and report the link gone.
                            info!(code = close_code, reason = %close_reason, "Realtime backend closed the connection");
                            let _ = ws_tx.flush().await;
                            let _ = events
                                .send(TransportEvent::Closing { code: close_code, reason: close_reason.clone() })
                                .await;
                            let _ = events
                                .send(TransportEvent::Closed { code: close_code, reason: close_reason })
                                .await;
                            return;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        open.store(false, Ordering::SeqCst);
                        warn!(error = %e, "Realtime connection failed");
                        let _ = events.send(TransportEvent::Failure(e.to_string())).await;
                        return;
                    }
                    None => {
                        open.store(false, Ordering::SeqCst);
                        let _ = events
                            .send(TransportEvent::Closed { code: close_code, reason: close_reason })
                            .await;
                        return;
                    }
                }
            },
        }
    }
}
