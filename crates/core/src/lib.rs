//! Turn coordination and tool orchestration for a voice-driven robot.
//!
//! The [`Coordinator`] owns the conversation: who holds the floor, which
//! backend response is live, when the microphone may listen. Tools run on the
//! [`Dispatcher`]'s worker pool and report back as coordinator inputs, as do
//! the audio player and the robot's sensors.

pub mod actuator;
pub mod audio;
pub mod coordinator;
pub mod interruption;
pub mod locations;
pub mod mic;
pub mod settings;
pub mod tools;
pub mod transcript;
pub mod turn;

pub use actuator::{ActionHandle, ActionOutcome, ActuationError, RobotAction, RobotActuator, SimulatedActuator};
pub use audio::{AudioOutput, AudioQueue, NullDevice, PlaybackDevice, PlaybackEvent};
pub use coordinator::{Coordinator, CoordinatorInput, CoordinatorSnapshot};
pub use interruption::{InterruptionPolicy, InterruptionRequest, InterruptionSource};
pub use locations::{InMemoryLocations, LocationProvider, SavedLocation};
pub use mic::{MicState, Microphone, MicrophoneGate, NoopMicrophone};
pub use settings::{SessionSettings, VadSettings};
pub use tools::{Dispatcher, Tool, ToolContext, ToolError, ToolOutcome, ToolRegistry};
pub use transcript::{Transcript, TranscriptEntry};
pub use turn::{ResponseState, Turn};
