//! Tool registry.
//!
//! Built-in tools are tagged variants of [`BuiltinTool`]. The registry holds
//! them, plus anything else registered, behind the common [`Tool`] interface.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::animation::AnimationTool;
use super::datetime::DateTimeTool;
use super::gaze::LookAtTool;
use super::mapping::{CreateMapTool, FinishMapTool};
use super::movement::{MoveTool, TurnTool};
use super::navigation::{NavigateTool, SaveLocationTool};
use super::{Tool, ToolContext, ToolError};

#[derive(Debug)]
pub enum BuiltinTool {
    DateTime(DateTimeTool),
    Move(MoveTool),
    Turn(TurnTool),
    Navigate(NavigateTool),
    SaveLocation(SaveLocationTool),
    CreateMap(CreateMapTool),
    FinishMap(FinishMapTool),
    LookAt(LookAtTool),
    Animation(AnimationTool),
}

impl BuiltinTool {
    pub fn all() -> Vec<BuiltinTool> {
        vec![
            BuiltinTool::DateTime(DateTimeTool),
            BuiltinTool::Move(MoveTool),
            BuiltinTool::Turn(TurnTool),
            BuiltinTool::Navigate(NavigateTool),
            BuiltinTool::SaveLocation(SaveLocationTool),
            BuiltinTool::CreateMap(CreateMapTool),
            BuiltinTool::FinishMap(FinishMapTool),
            BuiltinTool::LookAt(LookAtTool),
            BuiltinTool::Animation(AnimationTool),
        ]
    }

    fn inner(&self) -> &dyn Tool {
        match self {
            BuiltinTool::DateTime(t) => t,
            BuiltinTool::Move(t) => t,
            BuiltinTool::Turn(t) => t,
            BuiltinTool::Navigate(t) => t,
            BuiltinTool::SaveLocation(t) => t,
            BuiltinTool::CreateMap(t) => t,
            BuiltinTool::FinishMap(t) => t,
            BuiltinTool::LookAt(t) => t,
            BuiltinTool::Animation(t) => t,
        }
    }
}

#[async_trait]
impl Tool for BuiltinTool {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn definition(&self, ctx: &ToolContext) -> Value {
        self.inner().definition(ctx)
    }

    fn is_available(&self, ctx: &ToolContext) -> bool {
        self.inner().is_available(ctx)
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        self.inner().execute(args, ctx).await
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for tool in BuiltinTool::all() {
            registry.register(Arc::new(tool));
        }
        registry
    }

    /// Adds a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        debug!(tool = tool.name(), "Registered tool");
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Definitions for `session.update`: enabled and currently available
    /// tools only. `enabled == None` means every tool.
    pub fn definitions(&self, ctx: &ToolContext, enabled: Option<&[String]>) -> Vec<Value> {
        self.tools
            .iter()
            .filter(|t| enabled.is_none_or(|names| names.iter().any(|n| n == t.name())))
            .filter(|t| t.is_available(ctx))
            .map(|t| t.definition(ctx))
            .collect()
    }
}
