//! Tools the model can call, and the machinery that runs them.
//!
//! A tool is either *bounded*, returning its real result from `execute`, or
//! *unbounded*, returning a short acknowledgement at once and reporting the
//! eventual outcome later through [`ToolContext::send_async_update`]. The
//! async update is not tied to the original call; it arrives as fresh
//! conversational context through the coordinator.

pub mod animation;
pub mod datetime;
pub mod dispatcher;
pub mod gaze;
pub mod mapping;
pub mod movement;
pub mod navigation;
pub mod registry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::actuator::{ActuationError, RobotActuator};
use crate::interruption::{InterruptionRequest, InterruptionSource};
use crate::locations::LocationProvider;

pub use dispatcher::Dispatcher;
pub use registry::{BuiltinTool, ToolRegistry};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Tool '{0}' is not available")]
    Unavailable(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Robot action failed: {0}")]
    Actuation(#[from] ActuationError),
    #[error("Timed out: {0}")]
    TimedOut(String),
    #[error("Tool execution failed: {0}")]
    Internal(String),
}

impl ToolError {
    /// The error-shaped result sent back to the model.
    pub fn to_json(&self) -> String {
        error_json(&self.to_string())
    }
}

pub fn error_json(message: &str) -> String {
    json!({ "error": message }).to_string()
}

/// Result of one function call, ready to become a `function_call_output`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub output: String,
    pub succeeded: bool,
}

/// What a tool may touch while it runs.
#[derive(Clone)]
pub struct ToolContext {
    pub actuator: Arc<dyn RobotActuator>,
    pub locations: Arc<dyn LocationProvider>,
    robot_ready: Arc<AtomicBool>,
    updates: mpsc::UnboundedSender<InterruptionRequest>,
}

impl ToolContext {
    pub fn new(
        actuator: Arc<dyn RobotActuator>,
        locations: Arc<dyn LocationProvider>,
        updates: mpsc::UnboundedSender<InterruptionRequest>,
    ) -> Self {
        Self {
            actuator,
            locations,
            robot_ready: Arc::new(AtomicBool::new(true)),
            updates,
        }
    }

    pub fn robot_ready(&self) -> bool {
        self.robot_ready.load(Ordering::SeqCst)
    }

    pub fn set_robot_ready(&self, ready: bool) {
        self.robot_ready.store(ready, Ordering::SeqCst);
    }

    /// Reports something that happened after the call returned. With
    /// `request_response` the model is asked to speak about it right away,
    /// cutting into current speech; otherwise it is only told.
    pub fn send_async_update(&self, message: impl Into<String>, request_response: bool) {
        let request = if request_response {
            InterruptionRequest::interrupt_and_respond(InterruptionSource::AsyncUpdate, message)
        } else {
            InterruptionRequest::silent_update(InterruptionSource::AsyncUpdate, message)
        };
        if self.updates.send(request).is_err() {
            warn!("Async tool update dropped: session is gone");
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Function definition in the realtime `session.update` tool format.
    fn definition(&self, ctx: &ToolContext) -> Value;

    fn is_available(&self, _ctx: &ToolContext) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Builds a function definition from an argument struct's JSON schema.
pub fn function_definition<A: JsonSchema>(name: &str, description: &str) -> Value {
    let mut parameters = serde_json::to_value(schemars::schema_for!(A)).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut parameters {
        map.remove("$schema");
        map.remove("title");
        map.remove("description");
    }
    json!({
        "type": "function",
        "name": name,
        "description": description,
        "parameters": parameters,
    })
}

/// Deserialises tool arguments. A `null` payload is treated as `{}`.
pub fn parse_args<A: DeserializeOwned>(args: Value) -> Result<A, ToolError> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
