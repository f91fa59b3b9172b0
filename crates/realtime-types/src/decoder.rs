//! Stateless decoder turning raw text frames into [`Event`]s.
//!
//! Decoding never fails. Invalid JSON, a missing `type`, or an audio payload
//! that is not valid base64 all come out as `Event::Unknown` with
//! `event_type == "parse_error"`.

use base64::Engine;
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::event::{Event, ResponseStatus};

pub const PARSE_ERROR: &str = "parse_error";

/// Receives decoded events, one per frame, in arrival order.
pub trait Listener {
    fn on_event(&mut self, event: Event);
}

impl<F> Listener for F
where
    F: FnMut(Event),
{
    fn on_event(&mut self, event: Event) {
        self(event)
    }
}

impl Listener for Vec<Event> {
    fn on_event(&mut self, event: Event) {
        self.push(event);
    }
}

/// Feeds every frame to a single listener.
pub struct Decoder<L: Listener> {
    listener: L,
}

impl<L: Listener> Decoder<L> {
    pub fn new(listener: L) -> Self {
        Self { listener }
    }

    pub fn handle(&mut self, raw: &str) {
        let event = decode(raw);
        if event.is_high_frequency() {
            trace!(event = event.name(), "Inbound frame");
        } else {
            debug!(event = event.name(), "Inbound frame");
        }
        self.listener.on_event(event);
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn into_inner(self) -> L {
        self.listener
    }
}

fn parse_error(raw: &str) -> Event {
    Event::Unknown {
        event_type: PARSE_ERROR.to_string(),
        raw: raw.to_string(),
    }
}

fn string_at(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn string_or_empty(v: &Value, key: &str) -> String {
    string_at(v, key).unwrap_or_default()
}

/// Decodes a single frame.
pub fn decode(raw: &str) -> Event {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Failed to parse inbound frame");
            return parse_error(raw);
        }
    };
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        warn!("Inbound frame without a type tag");
        return parse_error(raw);
    };

    match kind {
        "session.created" => {
            let session = value.get("session").cloned().unwrap_or(Value::Null);
            Event::SessionCreated {
                session_id: string_at(&session, "id"),
                model: string_at(&session, "model"),
            }
        }
        "session.updated" => Event::SessionUpdated,
        "response.created" => Event::ResponseCreated {
            response_id: response_object_id(&value),
        },
        "response.done" => {
            let response = value.get("response").cloned().unwrap_or(Value::Null);
            let status = response
                .get("status")
                .and_then(Value::as_str)
                .map(ResponseStatus::from_wire)
                .unwrap_or(ResponseStatus::Unknown);
            let error = response
                .pointer("/status_details/error/message")
                .and_then(Value::as_str)
                .map(str::to_owned);
            Event::ResponseDone {
                response_id: response_object_id(&value),
                status,
                error,
            }
        }
        "response.audio.delta" | "response.output_audio.delta" => {
            let payload = value.get("delta").and_then(Value::as_str).unwrap_or("");
            match base64::engine::general_purpose::STANDARD.decode(payload) {
                Ok(pcm) => Event::AudioDelta {
                    response_id: string_at(&value, "response_id"),
                    item_id: string_at(&value, "item_id"),
                    audio: Bytes::from(pcm),
                },
                Err(e) => {
                    warn!(error = %e, "Audio delta is not valid base64");
                    parse_error(raw)
                }
            }
        }
        "response.audio.done" | "response.output_audio.done" => Event::AudioDone {
            response_id: string_at(&value, "response_id"),
        },
        "response.audio_transcript.delta" | "response.output_audio_transcript.delta" => {
            Event::TranscriptDelta {
                response_id: string_at(&value, "response_id"),
                delta: string_or_empty(&value, "delta"),
            }
        }
        "response.audio_transcript.done" | "response.output_audio_transcript.done" => {
            Event::TranscriptDone {
                response_id: string_at(&value, "response_id"),
                transcript: string_or_empty(&value, "transcript"),
            }
        }
        "response.output_item.added" => {
            let item = value.get("item").cloned().unwrap_or(Value::Null);
            let is_assistant_message = item.get("type").and_then(Value::as_str) == Some("message")
                && item.get("role").and_then(Value::as_str) == Some("assistant");
            match string_at(&item, "id") {
                Some(item_id) if is_assistant_message => Event::AssistantItemAdded {
                    item_id,
                    response_id: string_at(&value, "response_id"),
                },
                _ => unknown(kind, raw),
            }
        }
        "response.output_item.done" => {
            let item = value.get("item").cloned().unwrap_or(Value::Null);
            if item.get("type").and_then(Value::as_str) == Some("function_call") {
                Event::FunctionCallRequested {
                    call_id: string_or_empty(&item, "call_id"),
                    name: string_or_empty(&item, "name"),
                    arguments: string_at(&item, "arguments").unwrap_or_else(|| "{}".into()),
                    response_id: string_at(&value, "response_id"),
                }
            } else {
                unknown(kind, raw)
            }
        }
        "conversation.item.created" => {
            let item = value.get("item").cloned().unwrap_or(Value::Null);
            match (
                item.get("role").and_then(Value::as_str),
                string_at(&item, "id"),
            ) {
                (Some("user"), Some(item_id)) => Event::UserItemCreated { item_id, item },
                _ => unknown(kind, raw),
            }
        }
        "input_audio_buffer.speech_started" => Event::UserSpeechStarted {
            item_id: string_at(&value, "item_id"),
        },
        "input_audio_buffer.speech_stopped" => Event::UserSpeechStopped {
            item_id: string_at(&value, "item_id"),
        },
        "input_audio_buffer.committed" => Event::AudioBufferCommitted {
            item_id: string_or_empty(&value, "item_id"),
        },
        "conversation.item.input_audio_transcription.completed" => {
            Event::UserTranscriptCompleted {
                item_id: string_or_empty(&value, "item_id"),
                transcript: string_or_empty(&value, "transcript"),
            }
        }
        "conversation.item.input_audio_transcription.failed" => Event::UserTranscriptFailed {
            item_id: string_or_empty(&value, "item_id"),
            error: value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("Transcription failed")
                .to_string(),
        },
        "rate_limits.updated" => Event::RateLimitsUpdated {
            rate_limits: value.get("rate_limits").cloned().unwrap_or(Value::Null),
        },
        "error" => {
            let error = value.get("error").filter(|e| e.is_object());
            Event::Error {
                code: error.and_then(|e| string_at(e, "code")),
                message: error
                    .and_then(|e| string_at(e, "message"))
                    .unwrap_or_else(|| "Unknown error".to_string()),
                event_id: error.and_then(|e| string_at(e, "event_id")),
            }
        }
        other => unknown(other, raw),
    }
}

fn response_object_id(value: &Value) -> String {
    value
        .pointer("/response/id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn unknown(kind: &str, raw: &str) -> Event {
    Event::Unknown {
        event_type: kind.to_string(),
        raw: raw.to_string(),
    }
}
