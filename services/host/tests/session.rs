//! Host session against a loopback realtime backend.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use pepper_core::{
    AudioQueue, CoordinatorInput, CoordinatorSnapshot, InMemoryLocations, InterruptionRequest,
    InterruptionSource, SimulatedActuator, ToolRegistry, Turn, audio::RecordingDevice,
};
use pepper_host::audio::AudioHub;
use pepper_host::session::{Host, HostChannels, HostCommand, supervise};
use pepper_realtime::{Endpoint, Provider};
use pepper_core::SessionSettings;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

type Backend = WebSocketStream<TcpStream>;

struct Running {
    listener: TcpListener,
    commands: mpsc::UnboundedSender<HostCommand>,
    hub: AudioHub,
    snapshot: watch::Receiver<CoordinatorSnapshot>,
    shutdown: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
}

async fn start() -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (mic_tx, mic_rx) = mpsc::channel(16);
    let hub = AudioHub::new(mic_tx);
    let (playback_tx, playback_rx) = mpsc::unbounded_channel();
    let audio = AudioQueue::new(Box::new(RecordingDevice::default()), Some(playback_tx)).unwrap();
    let (commands, commands_rx) = mpsc::unbounded_channel();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let snapshot = Arc::new(watch::channel(CoordinatorSnapshot::default()).0);
    let snapshot_rx = snapshot.subscribe();

    let host = Host {
        endpoint: Endpoint::new(
            Provider::Custom { url },
            "test-model",
            SecretString::from("test-key".to_string()),
        ),
        settings: SessionSettings::default(),
        registry: Arc::new(ToolRegistry::with_builtins()),
        actuator: Arc::new(SimulatedActuator::new(100.0)),
        locations: Arc::new(InMemoryLocations::default()),
        audio: Arc::new(audio),
        hub: hub.clone(),
        snapshot,
        workers: 2,
    };
    let channels = HostChannels {
        commands: commands_rx,
        playback: playback_rx,
        mic: mic_rx,
        shutdown: shutdown_rx,
    };
    let supervisor = tokio::spawn(supervise(host, channels));

    Running {
        listener,
        commands,
        hub,
        snapshot: snapshot_rx,
        shutdown,
        supervisor,
    }
}

/// Accepts the host's connection and completes session configuration.
async fn accept_session(listener: &TcpListener) -> Backend {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    let update = next_frame(&mut ws).await.unwrap();
    assert_eq!(update["type"], "session.update");
    assert_eq!(update["session"]["turn_detection"]["create_response"], false);
    send(&mut ws, json!({"type": "session.updated", "session": {}})).await;
    ws
}

async fn next_frame(ws: &mut Backend) -> Option<Value> {
    loop {
        match timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => {}
        }
    }
}

async fn send(ws: &mut Backend, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// Pushes one captured chunk and returns the PCM the backend received for it.
async fn stream_chunk(host: &Running, backend: &mut Backend, pcm: &[u8]) -> Vec<u8> {
    assert!(host.hub.push_mic(Bytes::from(pcm.to_vec())));
    let append = next_frame(backend).await.unwrap();
    assert_eq!(append["type"], "input_audio_buffer.append");
    base64::engine::general_purpose::STANDARD
        .decode(append["audio"].as_str().unwrap())
        .unwrap()
}

async fn wait_for(
    snapshot: &mut watch::Receiver<CoordinatorSnapshot>,
    f: impl FnMut(&CoordinatorSnapshot) -> bool,
) {
    timeout(WAIT, snapshot.wait_for(f)).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_session_streams_mic_and_answers_injected_text() {
    let mut host = start().await;
    let mut backend = accept_session(&host.listener).await;
    wait_for(&mut host.snapshot, |s| s.ready && s.mic_open).await;

    let pcm = vec![7u8; 960];
    assert_eq!(stream_chunk(&host, &mut backend, &pcm).await, pcm);

    let request = InterruptionRequest::append_and_respond(InterruptionSource::System, "Hello there");
    host.commands
        .send(HostCommand::Apply(CoordinatorInput::Interruption(request)))
        .unwrap();
    let item = next_frame(&mut backend).await.unwrap();
    assert_eq!(item["type"], "conversation.item.create");
    assert_eq!(item["item"]["content"][0]["text"], "Hello there");
    assert_eq!(next_frame(&mut backend).await.unwrap()["type"], "response.create");

    send(
        &mut backend,
        json!({"type": "response.created", "response": {"id": "r1", "status": "in_progress"}}),
    )
    .await;
    wait_for(&mut host.snapshot, |s| !s.mic_open).await;
    send(
        &mut backend,
        json!({"type": "response.done", "response": {"id": "r1", "status": "completed"}}),
    )
    .await;
    wait_for(&mut host.snapshot, |s| s.mic_open).await;

    host.shutdown.send(true).unwrap();
    timeout(WAIT, host.supervisor).await.unwrap().unwrap();
    assert!(next_frame(&mut backend).await.is_none());
}

#[tokio::test]
async fn test_restart_and_reconnect_after_link_loss() {
    let mut host = start().await;
    let mut backend = accept_session(&host.listener).await;
    wait_for(&mut host.snapshot, |s| s.ready).await;

    host.commands.send(HostCommand::Restart).unwrap();
    assert!(next_frame(&mut backend).await.is_none());
    let backend = accept_session(&host.listener).await;
    wait_for(&mut host.snapshot, |s| s.ready && !s.link_lost).await;

    drop(backend);
    wait_for(&mut host.snapshot, |s| s.link_lost && !s.ready && !s.mic_open).await;
    let _backend = accept_session(&host.listener).await;
    wait_for(&mut host.snapshot, |s| s.ready && !s.link_lost).await;

    host.shutdown.send(true).unwrap();
    timeout(WAIT, host.supervisor).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_user_utterance_streams_until_committed() {
    let mut host = start().await;
    let mut backend = accept_session(&host.listener).await;
    wait_for(&mut host.snapshot, |s| s.ready && s.mic_open).await;

    send(
        &mut backend,
        json!({"type": "input_audio_buffer.speech_started", "item_id": "u1"}),
    )
    .await;
    wait_for(&mut host.snapshot, |s| s.turn == Turn::Thinking).await;
    let voice = vec![7u8; 960];
    assert_eq!(stream_chunk(&host, &mut backend, &voice).await, voice);

    send(
        &mut backend,
        json!({"type": "input_audio_buffer.committed", "item_id": "u1"}),
    )
    .await;
    assert_eq!(next_frame(&mut backend).await.unwrap()["type"], "response.create");
    wait_for(&mut host.snapshot, |s| !s.mic_open).await;
    assert_eq!(stream_chunk(&host, &mut backend, &voice).await, vec![0u8; 960]);

    host.shutdown.send(true).unwrap();
    timeout(WAIT, host.supervisor).await.unwrap().unwrap();
}
