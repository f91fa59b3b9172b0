//! `create_environment_map` and `finish_environment_map`.
//!
//! Mapping is the longest-running tool pair. Creating a map acknowledges at
//! once; scanning, localization and the saved map are reported later as
//! async updates from the task that owns the mapping handle. Finishing only
//! tells the robot to stop and save.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Tool, ToolContext, ToolError, function_definition, parse_args};
use crate::actuator::RobotAction;

/// The single map the robot keeps.
pub const ACTIVE_MAP_NAME: &str = "default_map";

#[derive(Deserialize, JsonSchema, Debug, Default)]
pub struct NoArgs {}

#[derive(Debug, Default)]
pub struct CreateMapTool;

impl CreateMapTool {
    pub const NAME: &'static str = "create_environment_map";
}

#[async_trait]
impl Tool for CreateMapTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn definition(&self, _ctx: &ToolContext) -> Value {
        function_definition::<NoArgs>(
            Self::NAME,
            "Create a detailed map of the current environment that Pepper can use for navigation. Starting a new map forgets all saved locations. Call the function directly without announcing it.",
        )
    }

    fn is_available(&self, ctx: &ToolContext) -> bool {
        ctx.robot_ready()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let _: NoArgs = parse_args(args)?;
        info!(map = ACTIVE_MAP_NAME, "Executing tool 'create_environment_map'");

        let mut handle = ctx.actuator.start(RobotAction::Mapping)?;
        let cleared = ctx.locations.clear();
        if !cleared.is_empty() {
            info!(?cleared, "Cleared saved locations for the new map");
        }

        let updates = ctx.clone();
        tokio::spawn(async move {
            updates.send_async_update(
                "[MAPPING STATUS] Pepper is scanning the environment to determine its position. Please wait...",
                false,
            );
            if handle.started().await {
                updates.send_async_update(
                    "[MAPPING STATUS] Localization complete! Pepper is now ready to be guided through the environment. Please give movement commands like 'move forward 2 meters', 'turn left 90 degrees', etc. You can also say 'save current location as [name]' to mark important spots. When done exploring, say 'finish the map' to complete the mapping process.",
                    true,
                );
            }
            let outcome = handle.outcome().await;
            let message = if outcome.success {
                format!(
                    "[MAP SAVED] Map '{}' has been saved and Pepper is localized on it. Navigation to saved locations is now available.",
                    ACTIVE_MAP_NAME
                )
            } else {
                let error = outcome.error.unwrap_or_else(|| "unknown error".into());
                warn!(%error, "Mapping ended without a map");
                format!("[MAPPING ERROR] Mapping ended without saving a map: {}", error)
            };
            updates.send_async_update(message, true);
        });

        Ok(json!({
            "status": "Mapping process initiated",
            "cleared_locations": cleared,
            "message": "Pepper is preparing to create a new map. It will first scan the environment to localize itself. You will be notified when it's ready.",
        })
        .to_string())
    }
}

#[derive(Debug, Default)]
pub struct FinishMapTool;

impl FinishMapTool {
    pub const NAME: &'static str = "finish_environment_map";
}

#[async_trait]
impl Tool for FinishMapTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn definition(&self, _ctx: &ToolContext) -> Value {
        function_definition::<NoArgs>(
            Self::NAME,
            "Complete and save the current mapping process. Call the function directly without announcing it.",
        )
    }

    fn is_available(&self, ctx: &ToolContext) -> bool {
        ctx.robot_ready()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let _: NoArgs = parse_args(args)?;
        info!(map = ACTIVE_MAP_NAME, "Executing tool 'finish_environment_map'");
        ctx.actuator.finish_mapping()?;

        Ok(json!({
            "status": "Map finalization started",
            "message": format!(
                "Map '{}' is being finalized and saved now. Pepper will notify when it's ready.",
                ACTIVE_MAP_NAME
            ),
        })
        .to_string())
    }
}
