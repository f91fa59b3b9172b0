//! Robot actuation seam.
//!
//! Locomotion, turning, navigation, gaze, mapping and animation are opaque
//! asynchronous actions. [`RobotActuator::start`] returns an [`ActionHandle`]
//! immediately; the handle resolves to an [`ActionOutcome`] when the robot
//! is done.
//!
//! Mapping is open-ended: its handle reports `started` once the robot has
//! localized itself and resolves only after [`RobotActuator::finish_mapping`].

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::info;

use crate::locations::SavedLocation;

#[derive(Debug, Clone, PartialEq)]
pub enum RobotAction {
    /// Positive forward is ahead, positive sideways is to the left.
    Move {
        forward_m: f64,
        sideways_m: f64,
        speed_mps: f64,
    },
    /// Positive radians turn left.
    Turn { radians: f64, speed_rps: f64 },
    NavigateTo { location: SavedLocation },
    /// Point the gaze at a position in the robot's base frame (meters,
    /// x forward, y left, z up) and hold it for `duration`.
    LookAt {
        x: f64,
        y: f64,
        z: f64,
        whole_body: bool,
        duration: Duration,
    },
    /// Scan and map the surroundings until told to finish.
    Mapping,
    Animation { name: String },
}

/// Robot position in map coordinates. `theta` is the heading in radians,
/// positive to the left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose {
    /// Where the robot stands after `action` completes.
    pub fn after(self, action: &RobotAction) -> Pose {
        match action {
            RobotAction::Move {
                forward_m,
                sideways_m,
                ..
            } => {
                let (sin, cos) = self.theta.sin_cos();
                Pose {
                    x: self.x + forward_m * cos - sideways_m * sin,
                    y: self.y + forward_m * sin + sideways_m * cos,
                    theta: self.theta,
                }
            }
            RobotAction::Turn { radians, .. } => {
                let theta = (self.theta + radians + std::f64::consts::PI)
                    .rem_euclid(std::f64::consts::TAU)
                    - std::f64::consts::PI;
                Pose { theta, ..self }
            }
            RobotAction::NavigateTo { location } => Pose {
                x: location.x,
                y: location.y,
                theta: location.theta,
            },
            RobotAction::Mapping => Pose::default(),
            RobotAction::LookAt { .. } | RobotAction::Animation { .. } => self,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    /// What a handle resolves to when the actuator drops it unfinished.
    pub fn cancelled() -> Self {
        Self::failed("Action was cancelled")
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActuationError {
    #[error("Robot is not ready")]
    NotReady,
    #[error("Action rejected: {0}")]
    Rejected(String),
    #[error("Unknown animation: {0}")]
    UnknownAnimation(String),
}

/// Caller's side of a started action.
#[derive(Debug)]
pub struct ActionHandle {
    started: Option<oneshot::Receiver<()>>,
    done: oneshot::Receiver<ActionOutcome>,
}

/// Actuator's side of a started action.
#[derive(Debug)]
pub struct ActionCompleter {
    started: Option<oneshot::Sender<()>>,
    done: oneshot::Sender<ActionOutcome>,
}

impl ActionHandle {
    pub fn pair() -> (ActionHandle, ActionCompleter) {
        let (started_tx, started_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        (
            ActionHandle {
                started: Some(started_rx),
                done: done_rx,
            },
            ActionCompleter {
                started: Some(started_tx),
                done: done_tx,
            },
        )
    }

    /// An action that has already finished.
    pub fn resolved(outcome: ActionOutcome) -> Self {
        let (handle, completer) = Self::pair();
        completer.complete(outcome);
        handle
    }

    /// Waits until the actuator reports the action physically started.
    /// Returns `false` if it finished or was dropped without starting.
    pub async fn started(&mut self) -> bool {
        match self.started.take() {
            Some(rx) => rx.await.is_ok(),
            None => true,
        }
    }

    pub async fn outcome(self) -> ActionOutcome {
        self.done.await.unwrap_or_else(|_| ActionOutcome::cancelled())
    }
}

impl ActionCompleter {
    pub fn mark_started(&mut self) {
        if let Some(tx) = self.started.take() {
            let _ = tx.send(());
        }
    }

    pub fn complete(mut self, outcome: ActionOutcome) {
        if outcome.success {
            self.mark_started();
        }
        let _ = self.done.send(outcome);
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait RobotActuator: Send + Sync {
    /// Starts `action` and returns at once.
    fn start(&self, action: RobotAction) -> Result<ActionHandle, ActuationError>;

    /// Current position on the active map.
    fn pose(&self) -> Pose;

    /// Ends the running mapping action and saves the map. Its handle then
    /// resolves with the result.
    fn finish_mapping(&self) -> Result<(), ActuationError>;
}

pub const ANIMATIONS: &[&str] = &[
    "hello", "wave", "bow", "applause", "dance", "happy", "sad", "thinking", "shrug", "yes", "no",
];

/// Stand-in actuator for running without a robot. Movements take time
/// proportional to their length, scaled by `time_scale`.
#[derive(Debug)]
pub struct SimulatedActuator {
    time_scale: f64,
    ready: AtomicBool,
    next_failure: Mutex<Option<String>>,
    pose: Arc<Mutex<Pose>>,
    mapping: Mutex<Option<oneshot::Sender<()>>>,
}

impl Default for SimulatedActuator {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl SimulatedActuator {
    pub fn new(time_scale: f64) -> Self {
        Self {
            time_scale,
            ready: AtomicBool::new(true),
            next_failure: Mutex::new(None),
            pose: Arc::new(Mutex::new(Pose::default())),
            mapping: Mutex::new(None),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Makes the next started action fail with `error`.
    pub fn fail_next(&self, error: impl Into<String>) {
        if let Ok(mut next) = self.next_failure.lock() {
            *next = Some(error.into());
        }
    }

    fn duration_of(&self, action: &RobotAction) -> Duration {
        let secs = match action {
            RobotAction::Move {
                forward_m,
                sideways_m,
                speed_mps,
            } => forward_m.hypot(*sideways_m) / speed_mps.max(0.1),
            RobotAction::Turn { radians, speed_rps } => radians.abs() / speed_rps.max(0.1),
            RobotAction::NavigateTo { location } => location.x.hypot(location.y) / 0.35,
            RobotAction::LookAt { duration, .. } => duration.as_secs_f64(),
            // Scanning before the robot is localized.
            RobotAction::Mapping => 3.0,
            RobotAction::Animation { .. } => 3.0,
        };
        Duration::from_secs_f64((secs * self.time_scale).max(0.0))
    }

    fn start_mapping(
        &self,
        scan: Duration,
        failure: Option<String>,
        mut completer: ActionCompleter,
    ) {
        let (stop_tx, stop_rx) = oneshot::channel();
        if let Ok(mut current) = self.mapping.lock() {
            if current.replace(stop_tx).is_some() {
                info!("Replacing running mapping");
            }
        }
        if let Ok(mut pose) = self.pose.lock() {
            *pose = pose.after(&RobotAction::Mapping);
        }
        tokio::spawn(async move {
            tokio::time::sleep(scan).await;
            if let Some(error) = failure {
                completer.complete(ActionOutcome::failed(error));
                return;
            }
            completer.mark_started();
            let outcome = match stop_rx.await {
                Ok(()) => ActionOutcome::succeeded(),
                Err(_) => ActionOutcome::failed("Mapping was replaced by a new one"),
            };
            completer.complete(outcome);
        });
    }
}

impl RobotActuator for SimulatedActuator {
    fn start(&self, action: RobotAction) -> Result<ActionHandle, ActuationError> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(ActuationError::NotReady);
        }
        if let RobotAction::Animation { name } = &action {
            if !ANIMATIONS.contains(&name.as_str()) {
                return Err(ActuationError::UnknownAnimation(name.clone()));
            }
        }
        let failure = self.next_failure.lock().ok().and_then(|mut f| f.take());
        let duration = self.duration_of(&action);
        info!(?action, ?duration, "Simulating robot action");

        let (handle, mut completer) = ActionHandle::pair();
        if action == RobotAction::Mapping {
            self.start_mapping(duration, failure, completer);
            return Ok(handle);
        }
        let pose = self.pose.clone();
        tokio::spawn(async move {
            completer.mark_started();
            tokio::time::sleep(duration).await;
            let outcome = match failure {
                Some(error) => ActionOutcome::failed(error),
                None => ActionOutcome::succeeded(),
            };
            if outcome.success {
                if let Ok(mut pose) = pose.lock() {
                    *pose = pose.after(&action);
                }
            }
            completer.complete(outcome);
        });
        Ok(handle)
    }

    fn pose(&self) -> Pose {
        self.pose.lock().map(|p| *p).unwrap_or_default()
    }

    fn finish_mapping(&self) -> Result<(), ActuationError> {
        let stop = self.mapping.lock().ok().and_then(|mut m| m.take());
        match stop.map(|stop| stop.send(())) {
            Some(Ok(())) => Ok(()),
            _ => Err(ActuationError::Rejected("No active mapping to finish".into())),
        }
    }
}
