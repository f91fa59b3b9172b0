//! Audio output queue for synthesized speech.
//!
//! Audio is PCM16 mono at 24 kHz. A dedicated player thread pulls roughly
//! 20 ms slices from the queue and writes them to a [`PlaybackDevice`].
//!
//! `clear()` is synchronous. It bumps a generation counter under the queue
//! lock and then waits for the device lock, so a slice that was already being
//! written finishes before `clear()` returns and every later slice sees the
//! new generation and is discarded.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error};

pub const SAMPLE_RATE: u32 = 24_000;
/// 24 kHz, 16 bit, mono.
pub const BYTES_PER_MS: u64 = 48;
pub const SLICE_MS: u64 = 20;
const SLICE_BYTES: usize = (BYTES_PER_MS * SLICE_MS) as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started,
    Finished,
}

/// Output as the coordinator sees it.
pub trait AudioOutput: Send + Sync {
    fn enqueue(&self, pcm: Bytes);
    /// Drops everything buffered. Nothing enqueued before the call is heard
    /// after it returns.
    fn clear(&self);
    fn is_playing(&self) -> bool;
    /// Milliseconds played since the last response boundary.
    fn played_ms(&self) -> u64;
    fn on_response_boundary(&self);
}

/// The sink the player thread writes to. `write` may block to pace output.
pub trait PlaybackDevice: Send {
    fn write(&mut self, pcm: &[u8]);
    /// Discards anything the device itself has buffered.
    fn flush(&mut self) {}
}

/// Paces output in real time and discards it.
#[derive(Debug, Default)]
pub struct NullDevice;

impl PlaybackDevice for NullDevice {
    fn write(&mut self, pcm: &[u8]) {
        thread::sleep(Duration::from_micros(pcm.len() as u64 * 1000 / BYTES_PER_MS));
    }
}

/// Keeps everything written, optionally sleeping per slice.
#[derive(Debug, Clone, Default)]
pub struct RecordingDevice {
    written: Arc<Mutex<Vec<u8>>>,
    pace: Duration,
}

impl RecordingDevice {
    pub fn paced(pace: Duration) -> Self {
        Self {
            written: Arc::default(),
            pace,
        }
    }

    pub fn written(&self) -> Vec<u8> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PlaybackDevice for RecordingDevice {
    fn write(&mut self, pcm: &[u8]) {
        if !self.pace.is_zero() {
            thread::sleep(self.pace);
        }
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(pcm);
    }
}

#[derive(Default)]
struct QueueState {
    chunks: VecDeque<Bytes>,
    generation: u64,
    playing: bool,
    played_bytes: u64,
    shutdown: bool,
}

impl QueueState {
    fn next_slice(&mut self) -> Option<Bytes> {
        let mut chunk = self.chunks.pop_front()?;
        if chunk.len() > SLICE_BYTES {
            let rest = chunk.split_off(SLICE_BYTES);
            self.chunks.push_front(rest);
        }
        Some(chunk)
    }
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
    device: Mutex<Box<dyn PlaybackDevice>>,
    events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device(&self) -> MutexGuard<'_, Box<dyn PlaybackDevice>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

pub struct AudioQueue {
    shared: Arc<Shared>,
    player: Option<thread::JoinHandle<()>>,
}

impl AudioQueue {
    /// Spawns the player thread. Playback state changes are reported on
    /// `events` when given.
    pub fn new(
        device: Box<dyn PlaybackDevice>,
        events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Condvar::new(),
            device: Mutex::new(device),
            events,
        });
        let player_shared = shared.clone();
        let player = thread::Builder::new()
            .name("audio-player".into())
            .spawn(move || player_loop(player_shared))?;
        Ok(Self {
            shared,
            player: Some(player),
        })
    }
}

fn player_loop(shared: Arc<Shared>) {
    loop {
        let (slice, generation) = {
            let mut state = shared.state();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(slice) = state.next_slice() {
                    break (slice, state.generation);
                }
                if state.playing {
                    state.playing = false;
                    shared.emit(PlaybackEvent::Finished);
                }
                state = shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let mut device = shared.device();
        if shared.state().generation != generation {
            continue;
        }
        device.write(&slice);
        drop(device);
        shared.state().played_bytes += slice.len() as u64;
    }
}

impl AudioOutput for AudioQueue {
    fn enqueue(&self, pcm: Bytes) {
        if pcm.is_empty() {
            return;
        }
        let mut state = self.shared.state();
        state.chunks.push_back(pcm);
        if !state.playing {
            state.playing = true;
            self.shared.emit(PlaybackEvent::Started);
        }
        drop(state);
        self.shared.wake.notify_one();
    }

    fn clear(&self) {
        {
            let mut state = self.shared.state();
            state.generation += 1;
            state.chunks.clear();
            state.playing = false;
        }
        // Waits out a slice that is mid-write.
        self.shared.device().flush();
        debug!("Audio queue cleared");
    }

    fn is_playing(&self) -> bool {
        self.shared.state().playing
    }

    fn played_ms(&self) -> u64 {
        self.shared.state().played_bytes / BYTES_PER_MS
    }

    fn on_response_boundary(&self) {
        self.shared.state().played_bytes = 0;
    }
}

impl Drop for AudioQueue {
    fn drop(&mut self) {
        self.shared.state().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(player) = self.player.take() {
            if player.join().is_err() {
                error!("Audio player thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_plays_everything_and_reports_finished() {
        let device = RecordingDevice::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = AudioQueue::new(Box::new(device.clone()), Some(tx)).unwrap();

        queue.enqueue(Bytes::from(vec![1u8; 2000]));
        queue.enqueue(Bytes::from(vec![2u8; 400]));

        // The player may drain the first chunk before the second arrives.
        let mut events = Vec::new();
        while device.written().len() < 2400
            || queue.is_playing()
            || events.last() != Some(&PlaybackEvent::Finished)
        {
            events.push(timeout(WAIT, rx.recv()).await.unwrap().unwrap());
        }
        assert_eq!(events[0], PlaybackEvent::Started);
        assert!(!queue.is_playing());

        let written = device.written();
        assert_eq!(written.len(), 2400);
        assert_eq!(written[1999], 1);
        assert_eq!(written[2000], 2);
        assert_eq!(queue.played_ms(), 50);
    }

    #[tokio::test]
    async fn test_clear_stops_buffered_audio() {
        let device = RecordingDevice::paced(Duration::from_millis(5));
        let queue = AudioQueue::new(Box::new(device.clone()), None).unwrap();

        queue.enqueue(Bytes::from(vec![0u8; SLICE_BYTES * 100]));
        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.clear();
        assert!(!queue.is_playing());

        let at_clear = device.written().len();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(device.written().len(), at_clear);
        assert!(at_clear < SLICE_BYTES * 100);
    }

    #[tokio::test]
    async fn test_response_boundary_resets_position() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = AudioQueue::new(Box::new(RecordingDevice::default()), Some(tx)).unwrap();

        queue.enqueue(Bytes::from(vec![0u8; 4800]));
        let _ = timeout(WAIT, rx.recv()).await.unwrap();
        let _ = timeout(WAIT, rx.recv()).await.unwrap();
        assert_eq!(queue.played_ms(), 100);

        queue.on_response_boundary();
        assert_eq!(queue.played_ms(), 0);
    }

    #[tokio::test]
    async fn test_audio_after_clear_plays() {
        let device = RecordingDevice::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = AudioQueue::new(Box::new(device.clone()), Some(tx)).unwrap();

        queue.clear();
        queue.enqueue(Bytes::from(vec![9u8; 960]));
        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some(PlaybackEvent::Started));
        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some(PlaybackEvent::Finished));
        assert_eq!(device.written(), vec![9u8; 960]);
    }
}
