//! The inbound event union produced by the decoder.

use bytes::Bytes;
use serde_json::Value;

/// Final status reported by `response.done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Completed,
    Cancelled,
    Failed,
    Incomplete,
    Unknown,
}

impl ResponseStatus {
    pub fn from_wire(status: &str) -> Self {
        match status {
            "completed" => ResponseStatus::Completed,
            "cancelled" => ResponseStatus::Cancelled,
            "failed" => ResponseStatus::Failed,
            "incomplete" => ResponseStatus::Incomplete,
            _ => ResponseStatus::Unknown,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ResponseStatus::Failed)
    }
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SessionCreated {
        session_id: Option<String>,
        model: Option<String>,
    },
    SessionUpdated,
    ResponseCreated {
        response_id: String,
    },
    ResponseDone {
        response_id: String,
        status: ResponseStatus,
        error: Option<String>,
    },
    AudioDelta {
        response_id: Option<String>,
        item_id: Option<String>,
        audio: Bytes,
    },
    AudioDone {
        response_id: Option<String>,
    },
    TranscriptDelta {
        response_id: Option<String>,
        delta: String,
    },
    TranscriptDone {
        response_id: Option<String>,
        transcript: String,
    },
    UserSpeechStarted {
        item_id: Option<String>,
    },
    UserSpeechStopped {
        item_id: Option<String>,
    },
    AudioBufferCommitted {
        item_id: String,
    },
    UserTranscriptCompleted {
        item_id: String,
        transcript: String,
    },
    UserTranscriptFailed {
        item_id: String,
        error: String,
    },
    UserItemCreated {
        item_id: String,
        item: Value,
    },
    AssistantItemAdded {
        item_id: String,
        response_id: Option<String>,
    },
    FunctionCallRequested {
        call_id: String,
        name: String,
        arguments: String,
        response_id: Option<String>,
    },
    RateLimitsUpdated {
        rate_limits: Value,
    },
    Error {
        code: Option<String>,
        message: String,
        event_id: Option<String>,
    },
    Unknown {
        event_type: String,
        raw: String,
    },
}

impl Event {
    /// The backend response this event belongs to, if it carries one.
    ///
    /// Used by the coordinator to drop late traffic for a cancelled response.
    pub fn response_id(&self) -> Option<&str> {
        match self {
            Event::ResponseCreated { response_id } | Event::ResponseDone { response_id, .. } => {
                Some(response_id)
            }
            Event::AudioDelta { response_id, .. }
            | Event::AudioDone { response_id }
            | Event::TranscriptDelta { response_id, .. }
            | Event::TranscriptDone { response_id, .. }
            | Event::AssistantItemAdded { response_id, .. }
            | Event::FunctionCallRequested { response_id, .. } => response_id.as_deref(),
            _ => None,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Event::SessionCreated { .. } => "SessionCreated",
            Event::SessionUpdated => "SessionUpdated",
            Event::ResponseCreated { .. } => "ResponseCreated",
            Event::ResponseDone { .. } => "ResponseDone",
            Event::AudioDelta { .. } => "AudioDelta",
            Event::AudioDone { .. } => "AudioDone",
            Event::TranscriptDelta { .. } => "TranscriptDelta",
            Event::TranscriptDone { .. } => "TranscriptDone",
            Event::UserSpeechStarted { .. } => "UserSpeechStarted",
            Event::UserSpeechStopped { .. } => "UserSpeechStopped",
            Event::AudioBufferCommitted { .. } => "AudioBufferCommitted",
            Event::UserTranscriptCompleted { .. } => "UserTranscriptCompleted",
            Event::UserTranscriptFailed { .. } => "UserTranscriptFailed",
            Event::UserItemCreated { .. } => "UserItemCreated",
            Event::AssistantItemAdded { .. } => "AssistantItemAdded",
            Event::FunctionCallRequested { .. } => "FunctionCallRequested",
            Event::RateLimitsUpdated { .. } => "RateLimitsUpdated",
            Event::Error { .. } => "Error",
            Event::Unknown { .. } => "Unknown",
        }
    }

    /// Deltas arrive many times per second and are kept out of debug logs.
    pub fn is_high_frequency(&self) -> bool {
        matches!(
            self,
            Event::AudioDelta { .. } | Event::TranscriptDelta { .. }
        )
    }
}
