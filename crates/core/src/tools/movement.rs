//! `move_pepper` and `turn_pepper`: unbounded locomotion tools.
//!
//! Both acknowledge immediately and report completion or failure later as an
//! async update.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{Tool, ToolContext, ToolError, function_definition, parse_args};
use crate::actuator::{ActionOutcome, RobotAction};

const MAX_DISTANCE_M: f64 = 4.0;
const MIN_SPEED_MPS: f64 = 0.1;
const MAX_SPEED_MPS: f64 = 0.55;
const DEFAULT_SPEED_MPS: f64 = 0.4;

const MIN_TURN_DEG: f64 = 15.0;
const MAX_TURN_DEG: f64 = 180.0;
const MIN_TURN_SPEED: f64 = 0.1;
const MAX_TURN_SPEED: f64 = 1.0;
const DEFAULT_TURN_SPEED: f64 = 0.5;

fn default_speed() -> f64 {
    DEFAULT_SPEED_MPS
}

fn default_turn_speed() -> f64 {
    DEFAULT_TURN_SPEED
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct MoveArgs {
    #[serde(default)]
    #[schemars(
        description = "Distance to move forward (positive) or backward (negative) in meters (-4.0 to 4.0). Optional, defaults to 0.",
        range(min = -4.0, max = 4.0)
    )]
    pub distance_forward: f64,
    #[serde(default)]
    #[schemars(
        description = "Distance to move left (positive) or right (negative) in meters (-4.0 to 4.0). Optional, defaults to 0.",
        range(min = -4.0, max = 4.0)
    )]
    pub distance_sideways: f64,
    #[serde(default = "default_speed")]
    #[schemars(description = "Optional maximum speed in m/s (0.1-0.55)", range(min = 0.1, max = 0.55))]
    pub speed: f64,
}

#[derive(Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnDirection {
    Left,
    Right,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct TurnArgs {
    #[schemars(description = "Direction to turn: 'left' or 'right'")]
    pub direction: TurnDirection,
    #[schemars(description = "Angle to turn in degrees (15-180)", range(min = 15.0, max = 180.0))]
    pub degrees: f64,
    #[serde(default = "default_turn_speed")]
    #[schemars(description = "Optional turning speed in radians per second (0.1-1.0)", range(min = 0.1, max = 1.0))]
    pub speed: f64,
}

/// Human-readable summary used in acknowledgements and async updates.
pub fn describe_movement(forward: f64, sideways: f64) -> String {
    let mut parts = Vec::new();
    if forward != 0.0 {
        let dir = if forward > 0.0 { "forward" } else { "backward" };
        parts.push(format!("{:.1} meters {}", forward.abs(), dir));
    }
    if sideways != 0.0 {
        let dir = if sideways > 0.0 { "left" } else { "right" };
        parts.push(format!("{:.1} meters to the {}", sideways.abs(), dir));
    }
    parts.join(" and ")
}

/// Maps low-level locomotion errors to something the model can relay.
pub fn translate_movement_error(error: Option<&str>) -> &'static str {
    let Some(error) = error.filter(|e| !e.is_empty()) else {
        return "My path is blocked by an obstacle.";
    };
    let e = error.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| e.contains(w));
    if has(&["obstacle", "blocked", "collision", "bump"]) {
        "My path is blocked by an obstacle in front of me."
    } else if has(&["unreachable", "no path", "path planning", "navigation failed"]) {
        "No safe path could be found to reach that location."
    } else if has(&["timeout", "too long"]) {
        "Movement took too long and was stopped. There are likely obstacles blocking the path."
    } else if has(&["safety", "emergency"]) {
        "Movement stopped for safety reasons - there's something in the path."
    } else if has(&["cancelled", "interrupted"]) {
        "My movement was interrupted or cancelled."
    } else {
        "An obstacle was encountered and movement cannot continue in that direction."
    }
}

fn movement_update(description: &str, outcome: &ActionOutcome) -> String {
    if outcome.success {
        return format!(
            "[MOVEMENT COMPLETED] You have successfully moved {} and arrived at your destination. Please inform the user that you have completed the movement.",
            description
        );
    }
    format!(
        "[MOVEMENT FAILED] You couldn't complete the movement {}. {} Please inform the user about this problem and offer alternative solutions or ask if they want you to try a different direction.",
        description,
        translate_movement_error(outcome.error.as_deref())
    )
}

#[derive(Debug, Default)]
pub struct MoveTool;

impl MoveTool {
    pub const NAME: &'static str = "move_pepper";
}

#[async_trait]
impl Tool for MoveTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn definition(&self, _ctx: &ToolContext) -> Value {
        function_definition::<MoveArgs>(
            Self::NAME,
            "Move Pepper robot in a specific direction for a given distance. Use this when the user asks Pepper to move around the room. Call the function directly without announcing it. You can combine forward/backward and sideways movements.",
        )
    }

    fn is_available(&self, ctx: &ToolContext) -> bool {
        ctx.robot_ready()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: MoveArgs = parse_args(args)?;
        if args.distance_forward == 0.0 && args.distance_sideways == 0.0 {
            return Err(ToolError::InvalidArguments(
                "Please provide a non-zero distance for 'distance_forward' or 'distance_sideways'.".into(),
            ));
        }
        if args.distance_forward.abs() > MAX_DISTANCE_M || args.distance_sideways.abs() > MAX_DISTANCE_M {
            return Err(ToolError::InvalidArguments(format!(
                "Distances must be between -{0} and {0} meters.",
                MAX_DISTANCE_M
            )));
        }
        let speed = args.speed.clamp(MIN_SPEED_MPS, MAX_SPEED_MPS);
        info!(forward = args.distance_forward, sideways = args.distance_sideways, speed, "Executing tool 'move_pepper'");

        let handle = ctx.actuator.start(RobotAction::Move {
            forward_m: args.distance_forward,
            sideways_m: args.distance_sideways,
            speed_mps: speed,
        })?;

        let description = describe_movement(args.distance_forward, args.distance_sideways);
        let updates = ctx.clone();
        let update_description = description.clone();
        tokio::spawn(async move {
            let outcome = handle.outcome().await;
            info!(success = outcome.success, error = ?outcome.error, "Movement finished");
            updates.send_async_update(movement_update(&update_description, &outcome), true);
        });

        Ok(json!({
            "status": "Movement started",
            "distance_forward": args.distance_forward,
            "distance_sideways": args.distance_sideways,
            "speed": speed,
            "message": format!("Movement started. Pepper is now moving {}.", description),
        })
        .to_string())
    }
}

#[derive(Debug, Default)]
pub struct TurnTool;

impl TurnTool {
    pub const NAME: &'static str = "turn_pepper";
}

#[async_trait]
impl Tool for TurnTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn definition(&self, _ctx: &ToolContext) -> Value {
        function_definition::<TurnArgs>(
            Self::NAME,
            "Turn Pepper robot left or right on the spot by a given angle. Call the function directly without announcing it.",
        )
    }

    fn is_available(&self, ctx: &ToolContext) -> bool {
        ctx.robot_ready()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: TurnArgs = parse_args(args)?;
        if !(MIN_TURN_DEG..=MAX_TURN_DEG).contains(&args.degrees) {
            return Err(ToolError::InvalidArguments(format!(
                "Degrees must be between {} and {}.",
                MIN_TURN_DEG, MAX_TURN_DEG
            )));
        }
        let speed = args.speed.clamp(MIN_TURN_SPEED, MAX_TURN_SPEED);
        let radians = match args.direction {
            TurnDirection::Left => args.degrees.to_radians(),
            TurnDirection::Right => -args.degrees.to_radians(),
        };
        let direction = match args.direction {
            TurnDirection::Left => "left",
            TurnDirection::Right => "right",
        };
        info!(direction, degrees = args.degrees, speed, "Executing tool 'turn_pepper'");

        let handle = ctx.actuator.start(RobotAction::Turn {
            radians,
            speed_rps: speed,
        })?;

        let updates = ctx.clone();
        let degrees = args.degrees;
        tokio::spawn(async move {
            let outcome = handle.outcome().await;
            let message = if outcome.success {
                format!(
                    "[TURN COMPLETED] You have turned {:.0} degrees to the {}. Please inform the user that you have completed the turn.",
                    degrees, direction
                )
            } else {
                format!(
                    "[TURN FAILED] You couldn't turn {:.0} degrees to the {}. {} Please inform the user about this problem.",
                    degrees,
                    direction,
                    translate_movement_error(outcome.error.as_deref())
                )
            };
            updates.send_async_update(message, true);
        });

        Ok(json!({
            "status": "Turn started",
            "direction": direction,
            "degrees": args.degrees,
            "speed": speed,
        })
        .to_string())
    }
}
