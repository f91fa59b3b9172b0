//! Wire types for the realtime speech backend.
//!
//! This crate is I/O free: it holds the outbound `ClientEvent` frames, the
//! inbound `Event` union, the frame decoder, and the two seams (`Listener`,
//! `FrameSink`) the rest of the workspace plugs into.

pub mod client;
pub mod decoder;
pub mod event;
pub mod sink;

pub use client::*;
pub use decoder::{Decoder, Listener, decode};
pub use event::{Event, ResponseStatus};
pub use sink::{FrameSink, MemorySink};
