//! `navigate_to_location` drives to a saved location;
//! `save_current_location` remembers where the robot stands.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::movement::translate_movement_error;
use super::{Tool, ToolContext, ToolError, function_definition, parse_args};
use crate::actuator::RobotAction;
use crate::locations::SavedLocation;

#[derive(Deserialize, JsonSchema, Debug)]
pub struct NavigateArgs {
    #[schemars(description = "Name of the saved location to navigate to")]
    pub location_name: String,
}

#[derive(Debug, Default)]
pub struct NavigateTool;

impl NavigateTool {
    pub const NAME: &'static str = "navigate_to_location";
}

#[async_trait]
impl Tool for NavigateTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    /// The description lists the saved locations so the model can pick one.
    fn definition(&self, ctx: &ToolContext) -> Value {
        let names = ctx.locations.names();
        let mut description = String::from(
            "Navigate Pepper to a previously saved location on the map. Call the function directly without announcing it.",
        );
        if names.is_empty() {
            description.push_str(" No locations have been saved yet.");
        } else {
            description.push_str(&format!(" Available locations: {}.", names.join(", ")));
        }
        function_definition::<NavigateArgs>(Self::NAME, &description)
    }

    fn is_available(&self, ctx: &ToolContext) -> bool {
        ctx.robot_ready()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: NavigateArgs = parse_args(args)?;
        let Some(location) = ctx.locations.find(&args.location_name) else {
            let known = ctx.locations.names();
            return Err(ToolError::InvalidArguments(format!(
                "Location '{}' not found. Available locations: {}",
                args.location_name,
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            )));
        };
        info!(location = %location.name, "Executing tool 'navigate_to_location'");

        let name = location.name.clone();
        let handle = ctx.actuator.start(RobotAction::NavigateTo { location })?;

        let updates = ctx.clone();
        let target = name.clone();
        tokio::spawn(async move {
            let outcome = handle.outcome().await;
            let message = if outcome.success {
                format!(
                    "[NAVIGATION COMPLETED] You have arrived at {}. Please inform the user that you have reached the destination.",
                    target
                )
            } else {
                format!(
                    "[NAVIGATION FAILED] You couldn't reach {}. {} Please inform the user about this problem.",
                    target,
                    translate_movement_error(outcome.error.as_deref())
                )
            };
            updates.send_async_update(message, true);
        });

        Ok(json!({
            "status": "Navigation started",
            "location": name,
            "message": format!("Navigation started. Pepper is now moving to {}.", name),
        })
        .to_string())
    }
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct SaveLocationArgs {
    #[schemars(description = "Name for this location (e.g. 'kitchen', 'printer', 'entrance')")]
    pub location_name: String,
    #[serde(default)]
    #[schemars(description = "Optional description of this location")]
    pub description: String,
}

#[derive(Debug, Default)]
pub struct SaveLocationTool;

impl SaveLocationTool {
    pub const NAME: &'static str = "save_current_location";
}

#[async_trait]
impl Tool for SaveLocationTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn definition(&self, _ctx: &ToolContext) -> Value {
        function_definition::<SaveLocationArgs>(
            Self::NAME,
            "Save Pepper's current position with a name for future navigation. Use this when the user wants to save a location like 'kitchen', 'printer', 'entrance', etc. Call the function directly without announcing it.",
        )
    }

    fn is_available(&self, ctx: &ToolContext) -> bool {
        ctx.robot_ready()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: SaveLocationArgs = parse_args(args)?;
        let name = args.location_name.trim();
        if name.is_empty() {
            return Err(ToolError::InvalidArguments("Location name is required".into()));
        }
        let pose = ctx.actuator.pose();
        info!(location = name, x = pose.x, y = pose.y, theta = pose.theta, "Executing tool 'save_current_location'");

        let saved = ctx.locations.save(SavedLocation {
            name: name.to_string(),
            x: pose.x,
            y: pose.y,
            theta: pose.theta,
        });
        if !saved {
            return Err(ToolError::Internal("Location could not be saved".into()));
        }

        let description = args.description.trim();
        let suffix = if description.is_empty() {
            String::new()
        } else {
            format!(" ({})", description)
        };
        Ok(json!({
            "status": "Location saved successfully",
            "location_name": name,
            "message": format!(
                "Location '{}' has been successfully saved{}. Navigation to this location is now available.",
                name, suffix
            ),
        })
        .to_string())
    }
}
