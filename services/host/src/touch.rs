//! Touch sensors: message table and per-sensor debouncing.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const TOUCH_DEBOUNCE: Duration = Duration::from_millis(500);

const SENSOR_MESSAGES: &[(&str, &str)] = &[
    ("Head/Touch", "[User touched my head]"),
    ("LHand/Touch", "[User touched my left hand]"),
    ("RHand/Touch", "[User touched my right hand]"),
    ("Bumper/FrontLeft", "[User touched my front left bumper]"),
    ("Bumper/FrontRight", "[User touched my front right bumper]"),
    ("Bumper/Back", "[User touched my back bumper]"),
];

/// The text injected into the conversation for a touch on `sensor`.
pub fn touch_message(sensor: &str) -> String {
    SENSOR_MESSAGES
        .iter()
        .find(|(name, _)| *name == sensor)
        .map(|(_, message)| message.to_string())
        .unwrap_or_else(|| format!("[User touched sensor: {}]", sensor))
}

/// Accepts at most one touch per sensor within the window.
#[derive(Debug)]
pub struct TouchDebouncer {
    window: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl Default for TouchDebouncer {
    fn default() -> Self {
        Self::new(TOUCH_DEBOUNCE)
    }
}

impl TouchDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::default(),
        }
    }

    pub fn accept(&self, sensor: &str, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match last.get(sensor) {
            Some(previous) if now.saturating_duration_since(*previous) < self.window => false,
            _ => {
                last.insert(sensor.to_string(), now);
                true
            }
        }
    }
}
