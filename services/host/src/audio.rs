//! Audio plumbing between the coordinator and `/audio` websocket clients.
//!
//! Playback slices and microphone gate changes fan out on a broadcast
//! channel. Microphone PCM from clients funnels into one bounded channel the
//! session reads.

use bytes::Bytes;
use pepper_core::{Microphone, NullDevice, PlaybackDevice};
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

const HUB_CAPACITY: usize = 512;
pub const MIC_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    /// Synthesized speech, PCM16 mono 24 kHz.
    Pcm(Bytes),
    Mic { open: bool },
}

#[derive(Debug, Clone)]
pub struct AudioHub {
    out: broadcast::Sender<HubFrame>,
    mic_in: mpsc::Sender<Bytes>,
}

impl AudioHub {
    pub fn new(mic_in: mpsc::Sender<Bytes>) -> Self {
        let (out, _) = broadcast::channel(HUB_CAPACITY);
        Self { out, mic_in }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubFrame> {
        self.out.subscribe()
    }

    pub fn publish(&self, frame: HubFrame) {
        // No subscribers is fine.
        let _ = self.out.send(frame);
    }

    /// Queues captured PCM for the session. Returns `false` if the frame
    /// was dropped.
    pub fn push_mic(&self, pcm: Bytes) -> bool {
        match self.mic_in.try_send(pcm) {
            Ok(()) => true,
            Err(e) => {
                trace!(error = %e, "Microphone frame dropped");
                false
            }
        }
    }
}

/// Playback device that paces in real time and streams each slice to the
/// connected clients.
pub struct HubDevice {
    hub: AudioHub,
    pace: NullDevice,
}

impl HubDevice {
    pub fn new(hub: AudioHub) -> Self {
        Self {
            hub,
            pace: NullDevice,
        }
    }
}

impl PlaybackDevice for HubDevice {
    fn write(&mut self, pcm: &[u8]) {
        self.hub.publish(HubFrame::Pcm(Bytes::copy_from_slice(pcm)));
        self.pace.write(pcm);
    }
}

/// Tells clients when to capture.
pub struct ClientMicrophone {
    hub: AudioHub,
}

impl ClientMicrophone {
    pub fn new(hub: AudioHub) -> Self {
        Self { hub }
    }
}

impl Microphone for ClientMicrophone {
    fn set_open(&mut self, open: bool) {
        self.hub.publish(HubFrame::Mic { open });
    }
}
