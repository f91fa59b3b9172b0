//! `play_animation`: gestures with a bounded wait for the start signal.

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Tool, ToolContext, ToolError, function_definition, parse_args};
use crate::actuator::{ANIMATIONS, RobotAction};

pub const START_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize, JsonSchema, Debug)]
pub struct AnimationArgs {
    #[schemars(description = "Name of the animation to play")]
    pub name: String,
}

#[derive(Debug, Default)]
pub struct AnimationTool;

impl AnimationTool {
    pub const NAME: &'static str = "play_animation";
}

#[async_trait]
impl Tool for AnimationTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn definition(&self, _ctx: &ToolContext) -> Value {
        function_definition::<AnimationArgs>(
            Self::NAME,
            &format!(
                "Play a body animation or gesture on Pepper. Available animations: {}.",
                ANIMATIONS.join(", ")
            ),
        )
    }

    fn is_available(&self, ctx: &ToolContext) -> bool {
        ctx.robot_ready()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: AnimationArgs = parse_args(args)?;
        let name = args.name.trim().to_lowercase();
        info!(animation = %name, "Executing tool 'play_animation'");

        let mut handle = ctx.actuator.start(RobotAction::Animation { name: name.clone() })?;
        match tokio::time::timeout(START_TIMEOUT, handle.started()).await {
            Ok(true) => {}
            Ok(false) => {
                let outcome = handle.outcome().await;
                return Err(ToolError::Internal(
                    outcome.error.unwrap_or_else(|| "Animation did not start".into()),
                ));
            }
            Err(_) => {
                warn!(animation = %name, "Animation did not start in time");
                return Err(ToolError::TimedOut(format!(
                    "animation '{}' did not start within {} seconds",
                    name,
                    START_TIMEOUT.as_secs()
                )));
            }
        }

        // Completion is not reported back.
        drop(handle);

        Ok(json!({
            "status": "Animation started",
            "animation": name,
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{ActionHandle, ActionOutcome, MockRobotActuator};
    use crate::tools::testing::{context_with, simulated_context};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_plays_known_animation() {
        let (ctx, _rx) = simulated_context();
        let out = AnimationTool.execute(json!({"name": "Wave"}), &ctx).await.unwrap();
        assert!(out.contains("\"animation\":\"wave\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_timeout() {
        let completers = Arc::new(Mutex::new(Vec::new()));
        let keep = completers.clone();
        let mut actuator = MockRobotActuator::new();
        actuator.expect_start().returning(move |_| {
            let (handle, completer) = ActionHandle::pair();
            keep.lock().unwrap().push(completer);
            Ok(handle)
        });
        let (ctx, _rx) = context_with(Arc::new(actuator));

        let err = AnimationTool.execute(json!({"name": "bow"}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::TimedOut(_)));
        assert_eq!(completers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_before_start() {
        let mut actuator = MockRobotActuator::new();
        actuator
            .expect_start()
            .returning(|_| Ok(ActionHandle::resolved(ActionOutcome::failed("Motors are hot"))));
        let (ctx, _rx) = context_with(Arc::new(actuator));
        let err = AnimationTool.execute(json!({"name": "bow"}), &ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool execution failed: Motors are hot");
    }
}
