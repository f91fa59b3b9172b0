//! Turn coordinator.
//!
//! The coordinator is the only owner of conversational state. Backend
//! events, interruptions, tool outcomes, playback changes and control
//! commands all arrive as a [`CoordinatorInput`] and are applied, one at a
//! time, by the task that owns the coordinator. Tool tasks and the audio
//! player never touch this state; they only send inputs.
//!
//! The microphone is open while the session is ready, the user has not muted
//! it and nothing from the robot is pending or playing: in `Listening`, and
//! in `Thinking` until the user's utterance is committed. The gate is
//! recomputed after every input.

use std::collections::VecDeque;
use std::sync::Arc;

use pepper_realtime_types::decoder::PARSE_ERROR;
use pepper_realtime_types::{ClientEvent, Event, FrameSink, Listener, ResponseStatus};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::audio::{AudioOutput, PlaybackEvent};
use crate::interruption::{InterruptionRequest, InterruptionSource};
use crate::mic::{MicState, MicrophoneGate};
use crate::settings::SessionSettings;
use crate::tools::{Dispatcher, ToolOutcome};
use crate::transcript::Transcript;
use crate::turn::{ResponseState, Turn};

/// Subtracted from the played-position estimate when truncating, so the
/// truncation point never lies beyond what the backend has generated.
pub const TRUNCATE_SAFETY_MARGIN_MS: u64 = 500;

/// How many answered user items are remembered. Commit and transcript events
/// for one item arrive close together, so a short window is enough.
const ANSWERED_ITEMS_KEPT: usize = 16;

#[derive(Debug)]
pub enum CoordinatorInput {
    Event(Event),
    Interruption(InterruptionRequest),
    ToolOutcome(ToolOutcome),
    Playback(PlaybackEvent),
    MuteToggle,
    StatusTap,
    Disconnected { reason: String },
}

/// What the control surface sees after each transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoordinatorSnapshot {
    pub turn: Turn,
    pub muted: bool,
    pub mic_open: bool,
    pub ready: bool,
    pub link_lost: bool,
    pub response_state: ResponseState,
    pub transcript: Transcript,
    /// Last user-visible status message for a backend error or disconnect.
    pub last_error: Option<String>,
}

pub struct Coordinator {
    sink: Arc<dyn FrameSink>,
    audio: Arc<dyn AudioOutput>,
    mic: MicrophoneGate,
    dispatcher: Dispatcher,

    state: ResponseState,
    phase: Turn,
    muted: bool,
    transcript: Transcript,

    /// `response.create` sent, `response.created` not seen yet.
    awaiting_response: bool,
    /// A response was asked for while another was outstanding.
    deferred_response: bool,
    /// The pending response was overtaken by an interruption and is cancelled
    /// as soon as it is created.
    superseded_pending: bool,
    /// User speech detected, no response requested for it yet.
    user_speaking: bool,
    /// The current response asked for a tool.
    current_called_tool: bool,
    /// Most recent user items that already triggered a response.
    answered_items: VecDeque<String>,
    /// A response requested by an async update is pending or streaming.
    async_update_active: bool,
    async_updates: VecDeque<InterruptionRequest>,

    ready: bool,
    link_lost: bool,
    last_error: Option<String>,
    snapshot: Arc<watch::Sender<CoordinatorSnapshot>>,
}

impl Coordinator {
    pub fn new(
        sink: Arc<dyn FrameSink>,
        audio: Arc<dyn AudioOutput>,
        mut mic: MicrophoneGate,
        dispatcher: Dispatcher,
    ) -> Self {
        mic.set(false);
        let (snapshot, _) = watch::channel(CoordinatorSnapshot::default());
        let snapshot = Arc::new(snapshot);
        Self {
            sink,
            audio,
            mic,
            dispatcher,
            state: ResponseState::default(),
            phase: Turn::Listening,
            muted: false,
            transcript: Transcript::default(),
            awaiting_response: false,
            deferred_response: false,
            superseded_pending: false,
            user_speaking: false,
            current_called_tool: false,
            answered_items: VecDeque::new(),
            async_update_active: false,
            async_updates: VecDeque::new(),
            ready: false,
            link_lost: false,
            last_error: None,
            snapshot,
        }
    }

    /// Publishes snapshots on a channel that outlives this coordinator, so
    /// observers keep their subscription across reconnects.
    pub fn with_snapshot_channel(mut self, sender: Arc<watch::Sender<CoordinatorSnapshot>>) -> Self {
        self.snapshot = sender;
        self.publish();
        self
    }

    // --- Accessors ---

    /// The turn as reported to the user. `Muted` overrides the phase.
    pub fn turn(&self) -> Turn {
        if self.muted { Turn::Muted } else { self.phase }
    }

    /// The phase tracked underneath the mute flag.
    pub fn phase(&self) -> Turn {
        self.phase
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Set once the link failed. The owner should tear the session down.
    pub fn is_link_lost(&self) -> bool {
        self.link_lost
    }

    pub fn response_state(&self) -> &ResponseState {
        &self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn mic_state(&self) -> MicState {
        self.mic.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            turn: self.turn(),
            muted: self.muted,
            mic_open: self.mic.is_open(),
            ready: self.ready,
            link_lost: self.link_lost,
            response_state: self.state.clone(),
            transcript: self.transcript.clone(),
            last_error: self.last_error.clone(),
        }
    }

    /// Sends `session.update` with the enabled, currently available tools.
    pub fn configure(&mut self, settings: &SessionSettings) -> bool {
        let tools = self
            .dispatcher
            .registry()
            .definitions(self.dispatcher.context(), settings.enabled_tools.as_deref());
        info!(
            voice = %settings.voice,
            tools = tools.len(),
            "Configuring realtime session"
        );
        let sent = self.send(ClientEvent::session_update(settings.session_config(tools)));
        self.settle();
        self.publish();
        sent
    }

    /// Applies one input. This is the only way state changes.
    pub fn apply(&mut self, input: CoordinatorInput) {
        if self.link_lost {
            trace!(?input, "Link lost, input ignored");
            return;
        }
        let quiet = matches!(&input, CoordinatorInput::Event(Event::AudioDelta { .. }));
        match input {
            CoordinatorInput::Event(event) => self.on_event(event),
            CoordinatorInput::Interruption(request) => self.on_interruption(request),
            CoordinatorInput::ToolOutcome(outcome) => self.on_tool_outcome(outcome),
            CoordinatorInput::Playback(event) => debug!(?event, "Playback state changed"),
            CoordinatorInput::MuteToggle => self.set_muted(!self.muted),
            CoordinatorInput::StatusTap => self.on_status_tap(),
            CoordinatorInput::Disconnected { reason } => self.on_disconnected(&reason),
        }
        self.settle();
        if !quiet {
            self.publish();
        }
    }

    // --- Backend events ---

    fn on_event(&mut self, event: Event) {
        if self.state.is_cancelled(event.response_id()) {
            trace!(event = event.name(), "Dropping event for cancelled response");
            return;
        }
        match event {
            Event::SessionCreated { session_id, model } => {
                info!(?session_id, ?model, "Realtime session created");
            }
            Event::SessionUpdated => {
                if !self.ready {
                    info!("Session configured, listening");
                }
                self.ready = true;
            }
            Event::ResponseCreated { response_id } => self.on_response_created(response_id),
            Event::ResponseDone {
                response_id,
                status,
                error,
            } => self.on_response_done(&response_id, status, error.as_deref()),
            Event::AudioDelta { audio, .. } => self.audio.enqueue(audio),
            Event::AudioDone { response_id } => debug!(?response_id, "Audio stream done"),
            Event::TranscriptDelta { response_id, delta } => {
                self.on_transcript_delta(response_id, &delta)
            }
            Event::TranscriptDone {
                response_id,
                transcript,
            } => {
                if response_id == self.state.last_chat_bubble_response_id {
                    self.transcript.robot_done(response_id.as_deref(), &transcript);
                }
            }
            Event::UserSpeechStarted { item_id } => self.on_user_speech_started(item_id),
            Event::UserSpeechStopped { item_id } => debug!(?item_id, "User speech stopped"),
            Event::AudioBufferCommitted { item_id } => {
                debug!(item_id = %item_id, "Audio buffer committed");
                self.answer_user_item(&item_id);
            }
            Event::UserTranscriptCompleted {
                item_id,
                transcript,
            } => {
                self.transcript.user_transcript(&item_id, &transcript);
                self.answer_user_item(&item_id);
            }
            Event::UserTranscriptFailed { item_id, error } => {
                warn!(item_id = %item_id, error = %error, "User transcription failed");
                self.transcript.user_transcript_failed(&item_id);
            }
            Event::UserItemCreated { item_id, .. } => {
                debug!(item_id = %item_id, "User item created");
            }
            Event::AssistantItemAdded { item_id, .. } => {
                self.update(|s| s.with_assistant_item(Some(item_id)));
            }
            Event::FunctionCallRequested {
                call_id,
                name,
                arguments,
                ..
            } => self.on_function_call(&call_id, &name, &arguments),
            Event::RateLimitsUpdated { rate_limits } => {
                debug!(%rate_limits, "Rate limits updated");
            }
            Event::Error { code, message, .. } => self.on_backend_error(code.as_deref(), &message),
            Event::Unknown { event_type, raw } => {
                if event_type == PARSE_ERROR {
                    warn!(raw = %raw, "Unparsable frame ignored");
                } else {
                    debug!(event_type = %event_type, "Unhandled event type");
                }
            }
        }
    }

    fn on_response_created(&mut self, response_id: String) {
        self.awaiting_response = false;
        if self.superseded_pending {
            self.superseded_pending = false;
            info!(response_id = %response_id, "Cancelling superseded response");
            if !self.send(ClientEvent::response_cancel()) {
                return;
            }
            self.update(|s| s.with_cancelled(Some(response_id)));
            if self.deferred_response {
                self.request_response();
            }
            return;
        }
        if let Some(previous) = &self.state.current_response_id {
            warn!(previous = %previous, response_id = %response_id, "Response created while another is current");
        }
        debug!(response_id = %response_id, "Response created");
        self.audio.on_response_boundary();
        self.current_called_tool = false;
        self.update(|s| s.with_current(Some(response_id)));
    }

    fn on_response_done(&mut self, response_id: &str, status: ResponseStatus, error: Option<&str>) {
        if !self.state.is_current(response_id) {
            debug!(response_id, "Ignoring response.done for a response that is not current");
            return;
        }
        if status.is_failure() {
            warn!(response_id, ?status, error, "Response ended unsuccessfully");
        } else {
            info!(response_id, ?status, "Response done");
        }
        // The follow-up to a tool call is a later response; keep the flag
        // for it when this response is the one that asked for the tool.
        let keep_expecting = self.current_called_tool;
        self.current_called_tool = false;
        self.update(|s| {
            let expecting = keep_expecting && s.is_expecting_final_answer_after_tool_call;
            s.with_current(None).with_expecting_final_answer(expecting)
        });

        if self.deferred_response {
            self.request_response();
        }
        self.drain_async_updates();
    }

    fn on_transcript_delta(&mut self, response_id: Option<String>, delta: &str) {
        let force_new = self.state.is_expecting_final_answer_after_tool_call
            || self.state.last_chat_bubble_response_id != response_id;
        self.transcript
            .robot_delta(response_id.as_deref(), delta, force_new);
        self.update(|s| s.with_chat_bubble(response_id).with_expecting_final_answer(false));
    }

    fn on_user_speech_started(&mut self, item_id: Option<String>) {
        if self.muted {
            debug!(?item_id, "Ignoring user speech while muted");
            return;
        }
        if self.is_speaking() {
            info!("User barged in");
            self.interrupt_speech();
        }
        if let Some(item_id) = &item_id {
            self.transcript.user_placeholder(item_id);
        }
        self.user_speaking = true;
    }

    /// Requests a response for a user item, once per item.
    fn answer_user_item(&mut self, item_id: &str) {
        if self.muted {
            debug!(item_id, "Muted, not answering user item");
            return;
        }
        if self.answered_items.iter().any(|id| id == item_id) {
            return;
        }
        if self.answered_items.len() == ANSWERED_ITEMS_KEPT {
            self.answered_items.pop_front();
        }
        self.answered_items.push_back(item_id.to_string());
        self.user_speaking = false;
        self.request_response();
    }

    fn on_function_call(&mut self, call_id: &str, name: &str, arguments: &str) {
        info!(call_id, tool = name, "Function call requested");
        self.current_called_tool = true;
        self.update(|s| s.with_expecting_final_answer(true));
        if self.dispatcher.dispatch(call_id, name, arguments) {
            self.transcript.function_call(call_id, name, arguments);
        }
    }

    fn on_backend_error(&mut self, code: Option<&str>, message: &str) {
        let benign = code == Some("response_cancel_not_active")
            || (code == Some("invalid_value") && message.contains("already shorter than"));
        if benign {
            debug!(?code, message, "Ignoring benign backend error");
            return;
        }
        error!(code = code.unwrap_or("unknown"), message, "Backend error");
        self.last_error = Some(message.to_string());

        // A pending response.create is the most likely thing to have failed.
        if self.awaiting_response {
            self.awaiting_response = false;
            self.superseded_pending = false;
        }
        let current = self.state.current_response_id.clone();
        match current {
            Some(id) if message.contains(id.as_str()) => {
                self.on_response_done(&id, ResponseStatus::Failed, Some(message));
            }
            _ => {
                if self.deferred_response {
                    self.request_response();
                }
                self.drain_async_updates();
            }
        }
    }

    // --- Interruptions ---

    fn on_interruption(&mut self, request: InterruptionRequest) {
        if request.source == InterruptionSource::AsyncUpdate
            && request.request_response
            && self.async_update_active
            && self.response_outstanding()
        {
            debug!(queued = self.async_updates.len() + 1, "Queueing async update");
            self.async_updates.push_back(request);
            return;
        }
        info!(source = ?request.source, policy = ?request.policy(), "Interruption");

        if request.cancels_speech() && self.is_speaking() {
            self.interrupt_speech();
            if !request.request_response {
                self.deferred_response = false;
            }
        }
        if let Some(muted) = request.mute {
            self.set_muted(muted);
        }
        if let Some(payload) = request.payload.as_deref() {
            if self.send(ClientEvent::user_text(payload)) {
                self.transcript.user_text(payload);
            }
        }
        if request.request_response {
            self.request_response();
            if request.source == InterruptionSource::AsyncUpdate {
                self.async_update_active = true;
            }
        }
        self.drain_async_updates();
    }

    /// Stops whatever the robot is saying: cancel, truncate, flush audio.
    fn interrupt_speech(&mut self) {
        let generating = self.state.current_response_id.is_some();
        let playing = self.audio.is_playing();

        if let Some(id) = self.state.current_response_id.clone() {
            info!(response_id = %id, "Cancelling response");
            if !self.send(ClientEvent::response_cancel()) {
                return;
            }
            self.update(|s| s.with_cancelled(Some(id)).with_current(None));
        } else if self.awaiting_response {
            debug!("Pending response superseded");
            self.superseded_pending = true;
        }

        if generating || playing {
            if let Some(item_id) = self.state.last_assistant_item_id.clone() {
                let audio_end_ms = self
                    .audio
                    .played_ms()
                    .saturating_sub(TRUNCATE_SAFETY_MARGIN_MS);
                debug!(item_id = %item_id, audio_end_ms, "Truncating assistant audio");
                self.send(ClientEvent::truncate(item_id, audio_end_ms));
            }
        }
        self.audio.clear();
    }

    fn on_status_tap(&mut self) {
        if self.is_speaking() {
            self.on_interruption(InterruptionRequest::interrupt_and_mute(
                InterruptionSource::StatusTap,
            ));
        } else {
            self.set_muted(!self.muted);
        }
    }

    fn set_muted(&mut self, muted: bool) {
        if self.muted != muted {
            info!(muted, "Microphone mute changed");
            self.muted = muted;
        }
    }

    // --- Tools ---

    fn on_tool_outcome(&mut self, outcome: ToolOutcome) {
        debug!(call_id = %outcome.call_id, tool = %outcome.name, succeeded = outcome.succeeded, "Tool finished");
        self.transcript
            .function_result(&outcome.call_id, &outcome.output);
        if self.send(ClientEvent::function_call_output(
            outcome.call_id,
            outcome.output,
        )) {
            self.request_response();
        }
    }

    // --- Link ---

    fn on_disconnected(&mut self, reason: &str) {
        if self.link_lost {
            return;
        }
        warn!(reason, "Realtime link lost, resetting turn state");
        self.link_lost = true;
        self.ready = false;
        self.state = ResponseState::default();
        self.awaiting_response = false;
        self.deferred_response = false;
        self.superseded_pending = false;
        self.user_speaking = false;
        self.current_called_tool = false;
        self.answered_items.clear();
        self.async_update_active = false;
        self.async_updates.clear();
        self.audio.clear();
        self.last_error = Some(format!("Disconnected: {}", reason));
    }

    fn send(&mut self, event: ClientEvent) -> bool {
        if self.link_lost {
            return false;
        }
        let kind = event.kind();
        if self.sink.send_event(&event) {
            debug!(frame = kind, "Frame sent");
            true
        } else {
            self.on_disconnected(&format!("failed to send {}", kind));
            false
        }
    }

    // --- Helpers ---

    /// Sends `response.create`, or defers it while another response is
    /// outstanding. Any number of deferred requests collapse into one.
    fn request_response(&mut self) {
        if self.awaiting_response || self.state.current_response_id.is_some() {
            debug!("Response in flight, deferring response.create");
            self.deferred_response = true;
            return;
        }
        if self.send(ClientEvent::response_create()) {
            self.awaiting_response = true;
            self.deferred_response = false;
            self.user_speaking = false;
        }
    }

    /// Applies the next queued async update once nothing is outstanding.
    fn drain_async_updates(&mut self) {
        if self.response_outstanding() {
            return;
        }
        self.async_update_active = false;
        if let Some(next) = self.async_updates.pop_front() {
            self.on_interruption(next);
        }
    }

    fn response_outstanding(&self) -> bool {
        self.awaiting_response
            || self.deferred_response
            || self.state.current_response_id.is_some()
    }

    fn is_speaking(&self) -> bool {
        self.state.current_response_id.is_some() || self.awaiting_response || self.audio.is_playing()
    }

    fn update(&mut self, f: impl FnOnce(ResponseState) -> ResponseState) {
        self.state = f(std::mem::take(&mut self.state));
    }

    /// Derives the phase and drives the microphone gate from it.
    fn settle(&mut self) {
        let phase = if self.link_lost {
            Turn::Listening
        } else if self.state.current_response_id.is_some() || self.audio.is_playing() {
            Turn::Speaking
        } else if self.awaiting_response || self.user_speaking {
            Turn::Thinking
        } else {
            Turn::Listening
        };
        if phase != self.phase {
            debug!(from = ?self.phase, to = ?phase, "Turn changed");
            self.phase = phase;
        }
        let capturing = match self.phase {
            Turn::Listening => true,
            // The user's utterance is still streaming in. A pending response
            // that will be cancelled on creation does not count.
            Turn::Thinking => {
                self.user_speaking && (!self.awaiting_response || self.superseded_pending)
            }
            _ => false,
        };
        let open = self.ready && !self.link_lost && !self.muted && capturing;
        self.mic.set(open);
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}

impl Listener for Coordinator {
    fn on_event(&mut self, event: Event) {
        self.apply(CoordinatorInput::Event(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mic::NoopMicrophone;
    use crate::tools::dispatcher::DEFAULT_WORKERS;
    use crate::tools::testing::simulated_context;
    use crate::tools::ToolRegistry;
    use crate::transcript::TranscriptEntry;
    use bytes::Bytes;
    use pepper_realtime_types::{MemorySink, decode};
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[derive(Default)]
    struct FakeAudioState {
        chunks: Vec<Bytes>,
        playing: bool,
        played_ms: u64,
        clears: usize,
    }

    #[derive(Default)]
    struct FakeAudio {
        state: Mutex<FakeAudioState>,
    }

    impl FakeAudio {
        fn finish(&self) {
            self.state.lock().unwrap().playing = false;
        }
        fn set_played(&self, ms: u64) {
            self.state.lock().unwrap().played_ms = ms;
        }
        fn chunks(&self) -> usize {
            self.state.lock().unwrap().chunks.len()
        }
        fn clears(&self) -> usize {
            self.state.lock().unwrap().clears
        }
    }

    impl AudioOutput for FakeAudio {
        fn enqueue(&self, pcm: Bytes) {
            let mut state = self.state.lock().unwrap();
            state.chunks.push(pcm);
            state.playing = true;
        }
        fn clear(&self) {
            let mut state = self.state.lock().unwrap();
            state.chunks.clear();
            state.playing = false;
            state.clears += 1;
        }
        fn is_playing(&self) -> bool {
            self.state.lock().unwrap().playing
        }
        fn played_ms(&self) -> u64 {
            self.state.lock().unwrap().played_ms
        }
        fn on_response_boundary(&self) {
            self.state.lock().unwrap().played_ms = 0;
        }
    }

    struct Harness {
        coordinator: Coordinator,
        sink: Arc<MemorySink>,
        audio: Arc<FakeAudio>,
        outcomes: mpsc::UnboundedReceiver<ToolOutcome>,
        updates: mpsc::UnboundedReceiver<InterruptionRequest>,
    }

    impl Harness {
        fn new() -> Self {
            let sink = Arc::new(MemorySink::new());
            let audio = Arc::new(FakeAudio::default());
            let (ctx, updates) = simulated_context();
            let (tx, outcomes) = mpsc::unbounded_channel();
            let dispatcher =
                Dispatcher::new(Arc::new(ToolRegistry::with_builtins()), ctx, tx, DEFAULT_WORKERS);
            let mut coordinator = Coordinator::new(
                sink.clone(),
                audio.clone(),
                MicrophoneGate::new(Box::new(NoopMicrophone)),
                dispatcher,
            );
            coordinator.apply(CoordinatorInput::Event(Event::SessionUpdated));
            Self {
                coordinator,
                sink,
                audio,
                outcomes,
                updates,
            }
        }

        fn event(&mut self, event: Event) {
            self.coordinator.apply(CoordinatorInput::Event(event));
        }

        fn frame(&mut self, raw: &str) {
            self.event(decode(raw));
        }

        fn interrupt(&mut self, request: InterruptionRequest) {
            self.coordinator.apply(CoordinatorInput::Interruption(request));
        }

        fn created(&mut self, id: &str) {
            self.event(Event::ResponseCreated {
                response_id: id.into(),
            });
        }

        fn done(&mut self, id: &str) {
            self.event(Event::ResponseDone {
                response_id: id.into(),
                status: ResponseStatus::Completed,
                error: None,
            });
        }

        fn audio_delta(&mut self, id: &str) {
            self.event(Event::AudioDelta {
                response_id: Some(id.into()),
                item_id: None,
                audio: Bytes::from_static(&[0u8; 480]),
            });
        }

        fn kinds(&self) -> Vec<String> {
            self.sink.kinds()
        }

        fn take_kinds(&self) -> Vec<String> {
            let kinds = self.sink.kinds();
            self.sink.take();
            kinds
        }

        fn mic_open(&self) -> bool {
            self.coordinator.mic_state().is_open()
        }

        /// Texts of injected user messages, in send order.
        fn injected(&self) -> Vec<String> {
            self.sink
                .json()
                .iter()
                .filter(|f| f["type"] == "conversation.item.create" && f["item"]["type"] == "message")
                .filter_map(|f| f["item"]["content"][0]["text"].as_str().map(str::to_owned))
                .collect()
        }
    }

    fn robot_texts(transcript: &Transcript) -> Vec<String> {
        transcript
            .entries()
            .iter()
            .filter_map(|e| match e {
                TranscriptEntry::Robot { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_streamed_transcript_ends_listening() {
        let mut h = Harness::new();
        assert!(h.mic_open());

        h.frame(r#"{"type":"response.created","response":{"id":"r1"}}"#);
        assert_eq!(h.coordinator.turn(), Turn::Speaking);
        assert!(!h.mic_open());

        h.frame(r#"{"type":"response.audio_transcript.delta","delta":"Hel","response_id":"r1"}"#);
        h.frame(r#"{"type":"response.audio_transcript.delta","delta":"lo","response_id":"r1"}"#);
        h.frame(r#"{"type":"response.done","response":{"id":"r1","status":"completed"}}"#);

        assert_eq!(robot_texts(h.coordinator.transcript()), vec!["Hello"]);
        assert_eq!(h.coordinator.turn(), Turn::Listening);
        assert_eq!(h.coordinator.response_state().current_response_id, None);
        assert!(h.mic_open());
    }

    #[test]
    fn test_touch_interrupts_speaking_response() {
        let mut h = Harness::new();
        h.created("r1");
        h.event(Event::AssistantItemAdded {
            item_id: "item_1".into(),
            response_id: Some("r1".into()),
        });
        h.audio_delta("r1");
        h.audio.set_played(1200);
        h.sink.take();

        h.interrupt(InterruptionRequest::interrupt_and_respond(
            InterruptionSource::Touch,
            "[User touched my head]",
        ));

        assert_eq!(
            h.kinds(),
            vec![
                "response.cancel",
                "conversation.item.truncate",
                "conversation.item.create",
                "response.create"
            ]
        );
        let truncate = &h.sink.json()[1];
        assert_eq!(truncate["item_id"], "item_1");
        assert_eq!(truncate["audio_end_ms"], 700);
        assert_eq!(h.injected(), vec!["[User touched my head]"]);
        assert_eq!(
            h.coordinator.response_state().cancelled_response_id.as_deref(),
            Some("r1")
        );
        assert_eq!(h.audio.clears(), 1);
        assert_eq!(h.audio.chunks(), 0);

        // Late audio for the cancelled response is dropped.
        h.audio_delta("r1");
        assert_eq!(h.audio.chunks(), 0);
        assert!(!h.coordinator.audio.is_playing());
    }

    #[tokio::test]
    async fn test_unbounded_tool_acknowledges_then_updates() {
        let mut h = Harness::new();
        h.created("r1");
        h.event(Event::FunctionCallRequested {
            call_id: "c1".into(),
            name: "move_pepper".into(),
            arguments: r#"{"distance_forward": 1.0}"#.into(),
            response_id: Some("r1".into()),
        });
        assert!(h.coordinator.response_state().is_expecting_final_answer_after_tool_call);

        let outcome = timeout(Duration::from_secs(5), h.outcomes.recv())
            .await
            .unwrap()
            .unwrap();
        h.coordinator.apply(CoordinatorInput::ToolOutcome(outcome));

        let frames = h.sink.json();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["item"]["type"], "function_call_output");
        assert_eq!(frames[0]["item"]["call_id"], "c1");
        let output: Value =
            serde_json::from_str(frames[0]["item"]["output"].as_str().unwrap()).unwrap();
        assert_eq!(output["status"], "Movement started");
        h.sink.take();

        // The follow-up response waits for r1 to finish.
        h.done("r1");
        assert_eq!(h.take_kinds(), vec!["response.create"]);

        let update = timeout(Duration::from_secs(5), h.updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.source, InterruptionSource::AsyncUpdate);
        h.interrupt(update);
        let injected = h.injected();
        assert_eq!(injected.len(), 1);
        assert!(injected[0].starts_with("[MOVEMENT COMPLETED]"));
    }

    #[test]
    fn test_unparsable_frame_changes_nothing() {
        let mut h = Harness::new();
        let before = h.coordinator.snapshot();
        h.frame("{ not json");
        assert_eq!(h.coordinator.snapshot(), before);
        assert!(h.sink.frames().is_empty());
    }

    #[test]
    fn test_user_speech_requests_one_response() {
        let mut h = Harness::new();
        h.frame(r#"{"type":"input_audio_buffer.speech_started","item_id":"u1"}"#);
        assert_eq!(h.coordinator.turn(), Turn::Thinking);
        // The utterance itself must still reach the backend.
        assert!(h.mic_open());

        h.frame(r#"{"type":"input_audio_buffer.committed","item_id":"u1"}"#);
        assert!(!h.mic_open());
        h.frame(r#"{"type":"conversation.item.input_audio_transcription.completed","item_id":"u1","transcript":" hi there "}"#);
        assert_eq!(h.kinds(), vec!["response.create"]);
        assert_eq!(h.coordinator.turn(), Turn::Thinking);
        assert!(!h.mic_open());
        assert_eq!(
            h.coordinator.transcript().entries()[0],
            TranscriptEntry::User {
                item_id: Some("u1".into()),
                text: "hi there".into()
            }
        );
    }

    #[test]
    fn test_barge_in_reopens_microphone_for_the_user() {
        let mut h = Harness::new();
        h.created("r1");
        h.audio_delta("r1");
        assert!(!h.mic_open());

        h.event(Event::UserSpeechStarted {
            item_id: Some("u2".into()),
        });
        assert_eq!(h.take_kinds(), vec!["response.cancel"]);
        assert_eq!(h.coordinator.turn(), Turn::Thinking);
        assert!(h.mic_open());

        h.event(Event::AudioBufferCommitted {
            item_id: "u2".into(),
        });
        assert_eq!(h.take_kinds(), vec!["response.create"]);
        assert!(!h.mic_open());
    }

    #[test]
    fn test_speech_over_pending_response_keeps_microphone_open() {
        let mut h = Harness::new();
        h.interrupt(InterruptionRequest::append_and_respond(
            InterruptionSource::System,
            "Say hello",
        ));
        h.sink.take();
        assert!(!h.mic_open());

        h.event(Event::UserSpeechStarted {
            item_id: Some("u1".into()),
        });
        assert!(h.mic_open());

        // The superseded response is cancelled as soon as it exists.
        h.created("r1");
        assert_eq!(h.take_kinds(), vec!["response.cancel"]);
        assert!(h.mic_open());
    }

    #[test]
    fn test_late_item_for_cancelled_response_ignored() {
        let mut h = Harness::new();
        h.created("r1");
        h.event(Event::AssistantItemAdded {
            item_id: "item_1".into(),
            response_id: Some("r1".into()),
        });
        h.coordinator.apply(CoordinatorInput::StatusTap);
        assert_eq!(
            h.coordinator.response_state().cancelled_response_id.as_deref(),
            Some("r1")
        );

        h.frame(r#"{"type":"response.output_item.added","response_id":"r1","item":{"id":"item_late","type":"message","role":"assistant"}}"#);
        assert_eq!(
            h.coordinator.response_state().last_assistant_item_id.as_deref(),
            Some("item_1")
        );
    }

    #[test]
    fn test_answered_items_stay_bounded() {
        let mut h = Harness::new();
        for i in 0..(ANSWERED_ITEMS_KEPT * 3) {
            let item = format!("u{}", i);
            let response = format!("r{}", i);
            h.event(Event::AudioBufferCommitted {
                item_id: item.clone(),
            });
            h.event(Event::UserTranscriptCompleted {
                item_id: item,
                transcript: "again".into(),
            });
            h.created(&response);
            h.done(&response);
        }
        assert_eq!(h.coordinator.answered_items.len(), ANSWERED_ITEMS_KEPT);
        let creates = h.kinds().iter().filter(|k| *k == "response.create").count();
        assert_eq!(creates, ANSWERED_ITEMS_KEPT * 3);
    }

    #[test]
    fn test_muted_keeps_microphone_closed() {
        let mut h = Harness::new();
        h.coordinator.apply(CoordinatorInput::MuteToggle);
        assert_eq!(h.coordinator.turn(), Turn::Muted);
        assert!(!h.mic_open());

        h.event(Event::UserSpeechStarted {
            item_id: Some("u1".into()),
        });
        h.event(Event::AudioBufferCommitted {
            item_id: "u1".into(),
        });
        assert!(h.sink.frames().is_empty());
        assert!(h.coordinator.transcript().entries().is_empty());
        assert_eq!(h.coordinator.phase(), Turn::Listening);

        h.created("r1");
        assert_eq!(h.coordinator.phase(), Turn::Speaking);
        assert!(!h.mic_open());
        h.done("r1");
        assert_eq!(h.coordinator.turn(), Turn::Muted);
        assert!(!h.mic_open());

        h.coordinator.apply(CoordinatorInput::MuteToggle);
        assert_eq!(h.coordinator.turn(), Turn::Listening);
        assert!(h.mic_open());
    }

    #[test]
    fn test_playback_drain_holds_speaking() {
        let mut h = Harness::new();
        h.created("r1");
        h.audio_delta("r1");
        h.done("r1");
        assert_eq!(h.coordinator.turn(), Turn::Speaking);
        assert!(!h.mic_open());

        h.audio.finish();
        h.coordinator
            .apply(CoordinatorInput::Playback(PlaybackEvent::Finished));
        assert_eq!(h.coordinator.turn(), Turn::Listening);
        assert!(h.mic_open());
    }

    #[test]
    fn test_deferred_response_flushed_once() {
        let mut h = Harness::new();
        h.created("r1");
        h.interrupt(InterruptionRequest::append_and_respond(
            InterruptionSource::System,
            "first",
        ));
        h.interrupt(InterruptionRequest::append_and_respond(
            InterruptionSource::System,
            "second",
        ));
        assert_eq!(
            h.take_kinds(),
            vec!["conversation.item.create", "conversation.item.create"]
        );

        h.done("r1");
        h.done("r1");
        assert_eq!(h.take_kinds(), vec!["response.create"]);
    }

    #[test]
    fn test_interrupt_without_response_only_injects() {
        let mut h = Harness::new();
        h.interrupt(InterruptionRequest::interrupt_and_respond(
            InterruptionSource::Touch,
            "[User touched my hand]",
        ));
        assert_eq!(h.kinds(), vec!["conversation.item.create", "response.create"]);
        assert_eq!(h.audio.clears(), 0);
        assert_eq!(h.coordinator.response_state().cancelled_response_id, None);

        h.sink.take();
        h.interrupt(InterruptionRequest::silent_update(
            InterruptionSource::System,
            "[Battery at 40%]",
        ));
        assert_eq!(h.kinds(), vec!["conversation.item.create"]);
    }

    #[test]
    fn test_pending_response_superseded() {
        let mut h = Harness::new();
        h.event(Event::AudioBufferCommitted {
            item_id: "u1".into(),
        });
        assert_eq!(h.take_kinds(), vec!["response.create"]);

        h.interrupt(InterruptionRequest::interrupt_and_respond(
            InterruptionSource::Touch,
            "[User touched my head]",
        ));
        assert_eq!(h.take_kinds(), vec!["conversation.item.create"]);

        h.created("r2");
        assert_eq!(h.take_kinds(), vec!["response.cancel", "response.create"]);
        assert_eq!(
            h.coordinator.response_state().cancelled_response_id.as_deref(),
            Some("r2")
        );
        assert_eq!(h.coordinator.response_state().current_response_id, None);

        h.audio_delta("r2");
        assert_eq!(h.audio.chunks(), 0);

        h.created("r3");
        assert!(h.coordinator.response_state().is_current("r3"));
    }

    #[test]
    fn test_async_updates_answered_in_order() {
        let mut h = Harness::new();
        h.interrupt(InterruptionRequest::interrupt_and_respond(
            InterruptionSource::AsyncUpdate,
            "[MOVEMENT COMPLETED] first",
        ));
        h.interrupt(InterruptionRequest::interrupt_and_respond(
            InterruptionSource::AsyncUpdate,
            "[TURN COMPLETED] second",
        ));
        assert_eq!(h.injected(), vec!["[MOVEMENT COMPLETED] first"]);
        assert_eq!(h.take_kinds(), vec!["conversation.item.create", "response.create"]);

        h.created("r1");
        assert!(h.sink.frames().is_empty());
        h.done("r1");
        assert_eq!(h.injected(), vec!["[TURN COMPLETED] second"]);
        assert_eq!(h.take_kinds(), vec!["conversation.item.create", "response.create"]);
    }

    #[test]
    fn test_backend_errors() {
        let mut h = Harness::new();
        h.created("r1");
        h.frame(r#"{"type":"error","error":{"code":"response_cancel_not_active","message":"no active response"}}"#);
        assert!(h.coordinator.snapshot().last_error.is_none());
        assert!(h.coordinator.response_state().is_current("r1"));

        h.frame(r#"{"type":"error","error":{"code":"server_error","message":"Response r1 failed"}}"#);
        assert_eq!(h.coordinator.response_state().current_response_id, None);
        assert_eq!(h.coordinator.turn(), Turn::Listening);
        assert_eq!(
            h.coordinator.snapshot().last_error.as_deref(),
            Some("Response r1 failed")
        );
    }

    #[test]
    fn test_status_tap() {
        let mut h = Harness::new();
        h.coordinator.apply(CoordinatorInput::StatusTap);
        assert!(h.coordinator.is_muted());
        h.coordinator.apply(CoordinatorInput::StatusTap);
        assert!(!h.coordinator.is_muted());

        h.created("r1");
        h.coordinator.apply(CoordinatorInput::StatusTap);
        assert_eq!(h.kinds(), vec!["response.cancel"]);
        assert!(h.coordinator.is_muted());
        assert_eq!(h.coordinator.turn(), Turn::Muted);
        assert!(!h.mic_open());
    }

    #[test]
    fn test_failed_send_resets_state() {
        let mut h = Harness::new();
        h.created("r1");
        h.audio_delta("r1");
        h.sink.close();

        h.interrupt(InterruptionRequest::interrupt_and_respond(
            InterruptionSource::Touch,
            "[User touched my head]",
        ));
        assert!(h.coordinator.is_link_lost());
        assert_eq!(h.coordinator.response_state(), &ResponseState::default());
        assert_eq!(h.coordinator.turn(), Turn::Listening);
        assert!(!h.mic_open());
        assert!(!h.coordinator.audio.is_playing());

        h.created("r2");
        assert_eq!(h.coordinator.response_state().current_response_id, None);
    }

    #[test]
    fn test_snapshot_published() {
        let mut h = Harness::new();
        let rx = h.coordinator.subscribe();
        h.created("r1");
        assert_eq!(rx.borrow().turn, Turn::Speaking);
        assert!(!rx.borrow().mic_open);
    }

    #[test]
    fn test_follow_up_bubble_after_tool_call() {
        let mut h = Harness::new();
        h.created("r1");
        h.event(Event::TranscriptDelta {
            response_id: Some("r1".into()),
            delta: "Let me move.".into(),
        });
        // r1 asked for a tool.
        h.coordinator.current_called_tool = true;
        h.coordinator
            .update(|s| s.with_expecting_final_answer(true));
        h.done("r1");
        assert!(h.coordinator.response_state().is_expecting_final_answer_after_tool_call);

        h.created("r2");
        h.event(Event::TranscriptDelta {
            response_id: Some("r2".into()),
            delta: "Done.".into(),
        });
        assert_eq!(robot_texts(h.coordinator.transcript()), vec!["Let me move.", "Done."]);
        assert!(!h.coordinator.response_state().is_expecting_final_answer_after_tool_call);
    }
}
