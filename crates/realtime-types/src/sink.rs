//! Outbound frame seam.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::ClientEvent;

/// Anything that can put a text frame on the wire.
///
/// `send_frame` returns `false` when the channel is not open; callers treat
/// that as a soft failure.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: String) -> bool;

    fn send_event(&self, event: &ClientEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(frame) => self.send_frame(frame),
            Err(e) => {
                warn!(kind = event.kind(), error = %e, "Failed to serialise outbound frame");
                false
            }
        }
    }
}

/// In-memory sink that records every frame. It can be closed to simulate a
/// dropped link.
#[derive(Debug)]
pub struct MemorySink {
    frames: Mutex<Vec<String>>,
    open: AtomicBool,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
        }
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Recorded frames parsed back to JSON.
    pub fn json(&self) -> Vec<serde_json::Value> {
        self.frames()
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }

    /// The `type` tags of recorded frames, in send order.
    pub fn kinds(&self) -> Vec<String> {
        self.json()
            .iter()
            .filter_map(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_owned))
            .collect()
    }

    pub fn take(&self) -> Vec<String> {
        self.frames
            .lock()
            .map(|mut f| std::mem::take(&mut *f))
            .unwrap_or_default()
    }
}

impl FrameSink for MemorySink {
    fn send_frame(&self, frame: String) -> bool {
        if !self.open.load(Ordering::SeqCst) {
            return false;
        }
        match self.frames.lock() {
            Ok(mut frames) => {
                frames.push(frame);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_and_closes() {
        let sink = MemorySink::new();
        assert!(sink.send_event(&ClientEvent::response_create()));
        assert_eq!(sink.kinds(), vec!["response.create"]);

        sink.close();
        assert!(!sink.send_event(&ClientEvent::response_cancel()));
        assert_eq!(sink.frames().len(), 1);
    }
}
