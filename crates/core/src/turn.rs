//! Conversational turn and response bookkeeping.
//!
//! [`ResponseState`] is a value type. The coordinator never edits it in
//! place; each transition derives the next snapshot with one of the `with_*`
//! builders and swaps it in whole.

use serde::Serialize;

/// Who currently holds the floor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Turn {
    /// Microphone open, no response in flight.
    #[default]
    Listening,
    /// The user has the floor: an utterance is in progress or committed and
    /// the backend has not started answering yet. The microphone stays open
    /// until the utterance is committed.
    Thinking,
    /// A response is streaming or its audio is still draining.
    Speaking,
    /// The user silenced the microphone. Reported on top of the other phases.
    Muted,
}

/// Snapshot of everything the coordinator knows about backend responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResponseState {
    /// The response currently being generated or spoken.
    pub current_response_id: Option<String>,
    /// Last response explicitly cancelled. Late events for it are dropped.
    pub cancelled_response_id: Option<String>,
    /// Response bound to the transcript bubble currently being filled.
    pub last_chat_bubble_response_id: Option<String>,
    /// Set between a tool dispatch and the model's follow-up response.
    pub is_expecting_final_answer_after_tool_call: bool,
    /// Most recent assistant message item, used as the truncation target.
    pub last_assistant_item_id: Option<String>,
}

impl ResponseState {
    pub fn with_current(self, id: Option<String>) -> Self {
        Self {
            current_response_id: id,
            ..self
        }
    }

    pub fn with_cancelled(self, id: Option<String>) -> Self {
        Self {
            cancelled_response_id: id,
            ..self
        }
    }

    pub fn with_chat_bubble(self, id: Option<String>) -> Self {
        Self {
            last_chat_bubble_response_id: id,
            ..self
        }
    }

    pub fn with_expecting_final_answer(self, expecting: bool) -> Self {
        Self {
            is_expecting_final_answer_after_tool_call: expecting,
            ..self
        }
    }

    pub fn with_assistant_item(self, id: Option<String>) -> Self {
        Self {
            last_assistant_item_id: id,
            ..self
        }
    }

    /// True when `response_id` names the cancelled response.
    pub fn is_cancelled(&self, response_id: Option<&str>) -> bool {
        match (response_id, self.cancelled_response_id.as_deref()) {
            (Some(id), Some(cancelled)) => id == cancelled,
            _ => false,
        }
    }

    pub fn is_current(&self, response_id: &str) -> bool {
        self.current_response_id.as_deref() == Some(response_id)
    }
}
