//! Requests to break into, or quietly add to, the conversation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptionSource {
    Touch,
    StatusTap,
    AsyncUpdate,
    System,
}

/// How a request treats speech that is already in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionPolicy {
    /// Stop current speech, inject, respond.
    InterruptAndRespond,
    /// Inject now, respond once current speech has finished.
    AppendAndRespond,
    /// Inject without asking for a response.
    SilentUpdate,
}

/// One request from a touch sensor, the status indicator, a finished tool,
/// or the host itself. Consumed immediately by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptionRequest {
    pub source: InterruptionSource,
    /// Text injected as a user message. `None` injects nothing.
    pub payload: Option<String>,
    pub request_response: bool,
    pub allow_during_speech: bool,
    /// Microphone mute state to apply after the request, if any.
    pub mute: Option<bool>,
}

impl InterruptionRequest {
    pub fn new(source: InterruptionSource, policy: InterruptionPolicy, payload: impl Into<String>) -> Self {
        let (request_response, allow_during_speech) = match policy {
            InterruptionPolicy::InterruptAndRespond => (true, true),
            InterruptionPolicy::AppendAndRespond => (true, false),
            InterruptionPolicy::SilentUpdate => (false, false),
        };
        Self {
            source,
            payload: Some(payload.into()),
            request_response,
            allow_during_speech,
            mute: None,
        }
    }

    pub fn interrupt_and_respond(source: InterruptionSource, payload: impl Into<String>) -> Self {
        Self::new(source, InterruptionPolicy::InterruptAndRespond, payload)
    }

    pub fn append_and_respond(source: InterruptionSource, payload: impl Into<String>) -> Self {
        Self::new(source, InterruptionPolicy::AppendAndRespond, payload)
    }

    pub fn silent_update(source: InterruptionSource, payload: impl Into<String>) -> Self {
        Self::new(source, InterruptionPolicy::SilentUpdate, payload)
    }

    /// Stops current speech and mutes, without injecting anything.
    pub fn interrupt_and_mute(source: InterruptionSource) -> Self {
        Self {
            source,
            payload: None,
            request_response: false,
            allow_during_speech: true,
            mute: Some(true),
        }
    }

    pub fn policy(&self) -> InterruptionPolicy {
        match (self.request_response, self.allow_during_speech) {
            (true, true) => InterruptionPolicy::InterruptAndRespond,
            (true, false) => InterruptionPolicy::AppendAndRespond,
            (false, _) => InterruptionPolicy::SilentUpdate,
        }
    }

    /// Whether in-flight speech is cut off.
    pub fn cancels_speech(&self) -> bool {
        self.allow_during_speech
    }
}
