//! `get_current_datetime`: local date and time.

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{Tool, ToolContext, ToolError, function_definition};

#[derive(Deserialize, JsonSchema, Debug, Default)]
pub struct NoArgs {}

#[derive(Debug, Default)]
pub struct DateTimeTool;

impl DateTimeTool {
    pub const NAME: &'static str = "get_current_datetime";

    fn describe<Tz: TimeZone>(now: DateTime<Tz>, timezone: &str) -> Value
    where
        Tz::Offset: std::fmt::Display,
    {
        json!({
            "date": now.format("%Y-%m-%d").to_string(),
            "time": now.format("%H:%M:%S").to_string(),
            "weekday": now.format("%A").to_string(),
            "timezone": timezone,
            "utc_offset": now.format("%:z").to_string(),
        })
    }
}

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn definition(&self, _ctx: &ToolContext) -> Value {
        function_definition::<NoArgs>(
            Self::NAME,
            "Returns the current local date, time, weekday and timezone. Use this whenever the user asks about the date or time.",
        )
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        info!("Executing tool 'get_current_datetime'");
        let now = Local::now();
        let timezone = now.format("%Z").to_string();
        Ok(Self::describe(now, &timezone).to_string())
    }
}
