//! Voice interaction for a Pepper robot over a realtime speech backend.
//!
//! - [`types`]: realtime wire events and the inbound decoder.
//! - [`realtime`]: the websocket transport and provider endpoints.
//! - [`core`]: turn coordination, audio, microphone gating and tools.

pub use pepper_core as core;
pub use pepper_realtime as realtime;
pub use pepper_realtime_types as types;
