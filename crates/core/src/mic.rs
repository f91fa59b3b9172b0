//! Microphone gating.
//!
//! The device has no echo cancellation, so the microphone may only be open
//! while the coordinator is listening and the user has not muted it. Only the
//! coordinator drives the gate; capture code reads the shared flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// The physical capture device.
pub trait Microphone: Send {
    fn set_open(&mut self, open: bool);
}

/// Capture device with nothing to switch; the host streams audio in and
/// consults [`MicState`] instead.
#[derive(Debug, Default)]
pub struct NoopMicrophone;

impl Microphone for NoopMicrophone {
    fn set_open(&mut self, _open: bool) {}
}

/// Read-only view of the gate for capture code.
#[derive(Debug, Clone, Default)]
pub struct MicState(Arc<AtomicBool>);

impl MicState {
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct MicrophoneGate {
    device: Box<dyn Microphone>,
    state: MicState,
    last: Option<bool>,
}

impl MicrophoneGate {
    /// Starts closed. The device is told on the first `set`.
    pub fn new(device: Box<dyn Microphone>) -> Self {
        Self {
            device,
            state: MicState::default(),
            last: None,
        }
    }

    /// Returns `true` when the device state actually changed.
    pub fn set(&mut self, open: bool) -> bool {
        if self.last == Some(open) {
            return false;
        }
        debug!(open, "Microphone gate");
        self.last = Some(open);
        self.state.0.store(open, Ordering::SeqCst);
        self.device.set_open(open);
        true
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn state(&self) -> MicState {
        self.state.clone()
    }
}
