//! Request and response bodies for the control surface.

use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug)]
pub struct TouchPayload {
    pub sensor: String,
}

fn default_true() -> bool {
    true
}

/// Typed text or a system injection.
#[derive(Deserialize, Debug)]
pub struct MessagePayload {
    pub text: String,
    #[serde(default = "default_true")]
    pub request_response: bool,
    /// Cut off speech in progress.
    #[serde(default)]
    pub allow_interrupt: bool,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ControlResponse {
    pub status: String,
}

impl ControlResponse {
    pub fn accepted() -> Self {
        Self {
            status: "accepted".to_string(),
        }
    }

    pub fn debounced() -> Self {
        Self {
            status: "debounced".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

/// Text frames sent to `/audio` clients. PCM goes out as binary frames.
#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioControl {
    Mic { open: bool },
}
