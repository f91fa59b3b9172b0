//! `look_at_position`: point the gaze at a 3D position for a while.

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::animation::START_TIMEOUT;
use super::{Tool, ToolContext, ToolError, function_definition, parse_args};
use crate::actuator::RobotAction;

const MIN_DURATION_S: f64 = 1.0;
const MAX_DURATION_S: f64 = 15.0;

fn default_duration() -> f64 {
    3.0
}

#[derive(Deserialize, JsonSchema, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MovementPolicy {
    #[default]
    HeadOnly,
    WholeBody,
}

impl MovementPolicy {
    fn as_str(self) -> &'static str {
        match self {
            MovementPolicy::HeadOnly => "head_only",
            MovementPolicy::WholeBody => "whole_body",
        }
    }
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct LookAtArgs {
    #[schemars(
        description = "Distance forward (positive) or backward (negative) from robot base in meters",
        range(min = -5.0, max = 5.0)
    )]
    pub x: f64,
    #[schemars(
        description = "Distance left (positive) or right (negative) from robot base in meters",
        range(min = -5.0, max = 5.0)
    )]
    pub y: f64,
    #[schemars(
        description = "Distance up (positive) or down (negative) from robot base in meters. Ground=0, eye-level=1.2, ceiling=2.5+",
        range(min = -2.0, max = 5.0)
    )]
    pub z: f64,
    #[serde(default)]
    #[schemars(description = "Move only the head, or turn the whole body if needed")]
    pub movement_policy: MovementPolicy,
    #[serde(default = "default_duration")]
    #[schemars(
        description = "Seconds to hold the gaze before returning to normal (1-15)",
        range(min = 1.0, max = 15.0)
    )]
    pub duration: f64,
}

#[derive(Debug, Default)]
pub struct LookAtTool;

impl LookAtTool {
    pub const NAME: &'static str = "look_at_position";
}

#[async_trait]
impl Tool for LookAtTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn definition(&self, _ctx: &ToolContext) -> Value {
        function_definition::<LookAtArgs>(
            Self::NAME,
            "Make Pepper look at a specific 3D position relative to the robot's base frame. X: forward(+)/backward(-), Y: left(+)/right(-), Z: up(+)/down(-). Robot base is at ground level (Z=0). Returns as soon as the gaze is aligned, then returns to normal gaze after the given duration.",
        )
    }

    fn is_available(&self, ctx: &ToolContext) -> bool {
        ctx.robot_ready()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: LookAtArgs = parse_args(args)?;
        if args.x == 0.0 && args.y == 0.0 && args.z == 0.0 {
            return Err(ToolError::InvalidArguments(
                "Please provide non-zero coordinates for x, y, or z.".into(),
            ));
        }
        if !(MIN_DURATION_S..=MAX_DURATION_S).contains(&args.duration) {
            return Err(ToolError::InvalidArguments(format!(
                "Duration must be between {} and {} seconds",
                MIN_DURATION_S, MAX_DURATION_S
            )));
        }
        let policy = args.movement_policy.as_str();
        info!(x = args.x, y = args.y, z = args.z, policy, duration = args.duration, "Executing tool 'look_at_position'");

        let mut handle = ctx.actuator.start(RobotAction::LookAt {
            x: args.x,
            y: args.y,
            z: args.z,
            whole_body: args.movement_policy == MovementPolicy::WholeBody,
            duration: Duration::from_secs_f64(args.duration),
        })?;
        match tokio::time::timeout(START_TIMEOUT, handle.started()).await {
            Ok(true) => {}
            Ok(false) => {
                let outcome = handle.outcome().await;
                return Err(ToolError::Internal(format!(
                    "LookAt failed: {}",
                    outcome.error.unwrap_or_else(|| "gaze could not be aligned".into())
                )));
            }
            Err(_) => {
                warn!("LookAt did not start in time");
                return Err(ToolError::TimedOut(format!(
                    "LookAt failed to start within {} seconds",
                    START_TIMEOUT.as_secs()
                )));
            }
        }

        // The gaze returns to normal on its own.
        drop(handle);

        Ok(json!({
            "status": "LookAt aligned successfully",
            "x": args.x,
            "y": args.y,
            "z": args.z,
            "movement_policy": policy,
            "duration": args.duration,
            "message": format!(
                "Successfully looking at position ({:.2}, {:.2}, {:.2}) for {:.1} seconds.",
                args.x, args.y, args.z, args.duration
            ),
        })
        .to_string())
    }
}
