//! Realtime session lifecycle.
//!
//! One task owns the coordinator and is the only place its inputs are
//! applied. A session runs until the link drops, a restart is requested or
//! the host shuts down; the supervisor then reconnects with backoff and
//! builds a fresh coordinator.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pepper_core::{
    AudioOutput, Coordinator, CoordinatorInput, CoordinatorSnapshot, Dispatcher, LocationProvider,
    MicrophoneGate, PlaybackEvent, RobotActuator, SessionSettings, ToolContext, ToolRegistry,
};
use pepper_realtime::transport::{NORMAL_CLOSURE, USER_DISCONNECT_REASON};
use pepper_realtime::{Endpoint, Transport, TransportError, TransportEvent};
use pepper_realtime_types::decoder::Decoder;
use pepper_realtime_types::{ClientEvent, FrameSink};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{Span, debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::audio::{AudioHub, ClientMicrophone};

const RESTART_REASON: &str = "Session restart";

/// Requests from the control surface to the session task.
#[derive(Debug)]
pub enum HostCommand {
    Apply(CoordinatorInput),
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The backend went away. `established` is set if the session got as far
    /// as `session.updated`.
    LinkLost { established: bool },
    Restart,
    Shutdown,
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Everything that outlives a single realtime session.
pub struct Host {
    pub endpoint: Endpoint,
    pub settings: SessionSettings,
    pub registry: Arc<ToolRegistry>,
    pub actuator: Arc<dyn RobotActuator>,
    pub locations: Arc<dyn LocationProvider>,
    pub audio: Arc<dyn AudioOutput>,
    pub hub: AudioHub,
    pub snapshot: Arc<watch::Sender<CoordinatorSnapshot>>,
    pub workers: usize,
}

/// Receiving ends the session task drains.
pub struct HostChannels {
    pub commands: mpsc::UnboundedReceiver<HostCommand>,
    pub playback: mpsc::UnboundedReceiver<PlaybackEvent>,
    pub mic: mpsc::Receiver<Bytes>,
    pub shutdown: watch::Receiver<bool>,
}

/// The frame to send for one captured microphone chunk.
///
/// The gate closes once the user's utterance is committed and stays closed
/// while the robot answers. Silence of the same length goes out meanwhile,
/// so the robot never hears itself and the input stream stays continuous.
/// Nothing is sent before the session is ready or while muted.
pub fn mic_frame(ready: bool, gate_open: bool, muted: bool, pcm: &[u8]) -> Option<ClientEvent> {
    if !ready || muted {
        return None;
    }
    if gate_open {
        Some(ClientEvent::audio_append(pcm))
    } else {
        Some(ClientEvent::audio_append(&vec![0u8; pcm.len()]))
    }
}

/// Runs sessions until shutdown, reconnecting after link loss.
pub async fn supervise(host: Host, mut io: HostChannels) {
    let mut backoff = Backoff::default();
    loop {
        if *io.shutdown.borrow() {
            break;
        }
        let end = match run_session(&host, &mut io).await {
            Ok(end) => end,
            Err(e) => {
                error!(error = %e, "Could not open realtime session");
                publish_link_error(&host.snapshot, &e.to_string());
                SessionEnd::LinkLost { established: false }
            }
        };
        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Restart => {
                info!("Restarting realtime session");
                backoff.reset();
                continue;
            }
            SessionEnd::LinkLost { established } => {
                if established {
                    backoff.reset();
                }
            }
        }

        let delay = backoff.next_delay();
        warn!(?delay, "Realtime link lost, reconnecting");
        match wait_for_retry(delay, &mut io).await {
            SessionEnd::Shutdown => break,
            SessionEnd::Restart => backoff.reset(),
            SessionEnd::LinkLost { .. } => {}
        }
    }
    info!("Session supervisor stopped");
}

fn publish_link_error(snapshot: &watch::Sender<CoordinatorSnapshot>, message: &str) {
    snapshot.send_modify(|s| {
        s.ready = false;
        s.link_lost = true;
        s.mic_open = false;
        s.last_error = Some(format!("Disconnected: {}", message));
    });
}

/// Sleeps out the backoff delay. Inputs that arrive meanwhile have no
/// session to act on and are dropped; a restart cuts the wait short.
async fn wait_for_retry(delay: Duration, io: &mut HostChannels) -> SessionEnd {
    let deadline = tokio::time::sleep_until(Instant::now() + delay);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            biased;
            changed = io.shutdown.changed() => {
                if changed.is_err() || *io.shutdown.borrow() {
                    return SessionEnd::Shutdown;
                }
            }
            cmd = io.commands.recv() => match cmd {
                Some(HostCommand::Restart) => return SessionEnd::Restart,
                Some(HostCommand::Apply(input)) => debug!(?input, "No session, input dropped"),
                None => return SessionEnd::Shutdown,
            },
            Some(_) = io.playback.recv() => {}
            Some(_) = io.mic.recv() => {}
            _ = &mut deadline => return SessionEnd::LinkLost { established: false },
        }
    }
}

#[instrument(name = "realtime_session", skip_all, fields(session_id))]
async fn run_session(host: &Host, io: &mut HostChannels) -> Result<SessionEnd, TransportError> {
    Span::current().record("session_id", tracing::field::display(Uuid::new_v4()));
    let (handle, mut events) = Transport::connect(&host.endpoint).await?;

    let (updates_tx, mut updates) = mpsc::unbounded_channel();
    let (outcomes_tx, mut outcomes) = mpsc::unbounded_channel();
    let ctx = ToolContext::new(host.actuator.clone(), host.locations.clone(), updates_tx);
    let dispatcher = Dispatcher::new(host.registry.clone(), ctx, outcomes_tx, host.workers);
    let mic = MicrophoneGate::new(Box::new(ClientMicrophone::new(host.hub.clone())));
    let coordinator = Coordinator::new(
        Arc::new(handle.clone()),
        host.audio.clone(),
        mic,
        dispatcher,
    )
    .with_snapshot_channel(host.snapshot.clone());
    let mut decoder = Decoder::new(coordinator);
    let mut established = false;

    let end = loop {
        tokio::select! {
            biased;
            changed = io.shutdown.changed() => {
                if changed.is_err() || *io.shutdown.borrow() {
                    break SessionEnd::Shutdown;
                }
            }
            cmd = io.commands.recv() => match cmd {
                Some(HostCommand::Apply(input)) => decoder.listener_mut().apply(input),
                Some(HostCommand::Restart) => {
                    handle.close(NORMAL_CLOSURE, RESTART_REASON);
                    decoder.listener_mut().apply(CoordinatorInput::Disconnected {
                        reason: RESTART_REASON.to_string(),
                    });
                    break SessionEnd::Restart;
                }
                None => break SessionEnd::Shutdown,
            },
            event = events.recv() => match event {
                Some(TransportEvent::Open) => {
                    decoder.listener_mut().configure(&host.settings);
                }
                Some(TransportEvent::Text(text)) => decoder.handle(&text),
                Some(TransportEvent::Closing { code, reason }) => {
                    debug!(code, %reason, "Realtime connection closing");
                }
                Some(TransportEvent::Closed { code, reason }) => {
                    decoder.listener_mut().apply(CoordinatorInput::Disconnected {
                        reason: format!("connection closed ({}) {}", code, reason),
                    });
                }
                Some(TransportEvent::Failure(e)) => {
                    decoder.listener_mut().apply(CoordinatorInput::Disconnected { reason: e });
                }
                None => {
                    decoder.listener_mut().apply(CoordinatorInput::Disconnected {
                        reason: "connection task ended".to_string(),
                    });
                }
            },
            Some(request) = updates.recv() => {
                decoder.listener_mut().apply(CoordinatorInput::Interruption(request));
            }
            Some(outcome) = outcomes.recv() => {
                decoder.listener_mut().apply(CoordinatorInput::ToolOutcome(outcome));
            }
            Some(event) = io.playback.recv() => {
                decoder.listener_mut().apply(CoordinatorInput::Playback(event));
            }
            Some(pcm) = io.mic.recv() => {
                let coordinator = decoder.listener();
                let frame = mic_frame(
                    coordinator.is_ready(),
                    coordinator.mic_state().is_open(),
                    coordinator.is_muted(),
                    &pcm,
                );
                if let Some(frame) = frame {
                    if !handle.send_event(&frame) {
                        decoder.listener_mut().apply(CoordinatorInput::Disconnected {
                            reason: "failed to send input_audio_buffer.append".to_string(),
                        });
                    }
                }
            }
        }

        let coordinator = decoder.listener();
        established |= coordinator.is_ready();
        if coordinator.is_link_lost() {
            break SessionEnd::LinkLost { established };
        }
    };

    if end == SessionEnd::Shutdown {
        decoder.listener_mut().apply(CoordinatorInput::Disconnected {
            reason: USER_DISCONNECT_REASON.to_string(),
        });
    }
    handle.close(NORMAL_CLOSURE, USER_DISCONNECT_REASON);
    info!(?end, "Realtime session ended");
    Ok(end)
}
