//! Runs function calls off the frame-handling path.
//!
//! Every accepted call produces exactly one [`ToolOutcome`] on the outcome
//! channel, whether the tool succeeds, returns an error, or panics. A call id
//! that is already running is refused.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tracing::{Instrument, error, info, info_span, warn};

use super::{Tool, ToolContext, ToolError, ToolOutcome, ToolRegistry};

pub const DEFAULT_WORKERS: usize = 4;

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    outcomes: mpsc::UnboundedSender<ToolOutcome>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        ctx: ToolContext,
        outcomes: mpsc::UnboundedSender<ToolOutcome>,
        workers: usize,
    ) -> Self {
        Self {
            registry,
            ctx,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            in_flight: Arc::default(),
            outcomes,
        }
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Number of calls currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Starts `name` for `call_id`. Returns `false` if that call id is
    /// already running; no outcome is produced for the refused duplicate.
    pub fn dispatch(&self, call_id: &str, name: &str, arguments: &str) -> bool {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(call_id.to_string());
        if !inserted {
            warn!(call_id, tool = name, "Duplicate function call ignored");
            return false;
        }

        let prepared = self.prepare(name, arguments);
        let this = self.clone();
        let call_id = call_id.to_string();
        let name = name.to_string();
        let span = info_span!("tool_call", call_id = %call_id, tool = %name);

        tokio::spawn(
            async move {
                let result = match prepared {
                    Ok((tool, args)) => this.run(tool, args).await,
                    Err(e) => Err(e),
                };
                let outcome = match result {
                    Ok(output) => ToolOutcome {
                        call_id: call_id.clone(),
                        name,
                        output,
                        succeeded: true,
                    },
                    Err(e) => {
                        warn!(error = %e, "Tool call failed");
                        ToolOutcome {
                            call_id: call_id.clone(),
                            name,
                            output: e.to_json(),
                            succeeded: false,
                        }
                    }
                };
                this.in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&call_id);
                if this.outcomes.send(outcome).is_err() {
                    warn!("Tool outcome dropped: session is gone");
                }
            }
            .instrument(span),
        );
        true
    }

    fn prepare(&self, name: &str, arguments: &str) -> Result<(Arc<dyn Tool>, Value), ToolError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        if !tool.is_available(&self.ctx) {
            return Err(ToolError::Unavailable(name.to_string()));
        }
        let args = if arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?
        };
        Ok((tool, args))
    }

    async fn run(&self, tool: Arc<dyn Tool>, args: Value) -> Result<String, ToolError> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ToolError::Internal("worker pool closed".into()))?;
        info!("Executing tool");
        let ctx = self.ctx.clone();
        let task = tokio::spawn(async move { tool.execute(args, &ctx).await }.in_current_span());
        match task.await {
            Ok(result) => result,
            Err(join_error) => {
                error!(error = %join_error, "Tool task panicked");
                Err(ToolError::Internal(if join_error.is_panic() {
                    "tool panicked".to_string()
                } else {
                    "tool task was cancelled".to_string()
                }))
            }
        }
    }
}
