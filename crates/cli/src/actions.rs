//! Built-in handler actions available to pipeline files.

use std::time::Duration;

use async_trait::async_trait;
use scheduler::{Chain, ExecutionContext, Handler, SchedulerError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// Context key that `log` and `next` append to.
pub const TRACE_KEY: &str = "trace";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Log {
        #[serde(default)]
        message: Option<String>,
    },
    Set {
        key: String,
        value: Value,
    },
    Stop,
    /// Run the rest of the sequence, then log `message` if given.
    Next {
        #[serde(default)]
        message: Option<String>,
    },
    Fail {
        #[serde(default)]
        message: Option<String>,
    },
    Sleep {
        ms: u64,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Set { .. } => "set",
            Self::Stop => "stop",
            Self::Next { .. } => "next",
            Self::Fail { .. } => "fail",
            Self::Sleep { .. } => "sleep",
        }
    }
}

/// A configured action bound to the name it was registered under.
pub struct ActionHandler {
    name: String,
    action: Action,
}

impl ActionHandler {
    pub fn new(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }

    fn record(&self, ctx: &ExecutionContext, message: &str) {
        info!(handler = %self.name, "{}", message);
        ctx.push(TRACE_KEY, message);
    }
}

#[async_trait]
impl Handler for ActionHandler {
    async fn handle(&self, ctx: &ExecutionContext, chain: &Chain) -> scheduler::Result<()> {
        debug!(handler = %self.name, action = self.action.kind(), "Running action");
        match &self.action {
            Action::Log { message } => {
                self.record(ctx, message.as_deref().unwrap_or(&self.name));
            }
            Action::Set { key, value } => {
                ctx.insert(key.clone(), value.clone());
            }
            Action::Stop => chain.stop(),
            Action::Next { message } => {
                chain.next().await?;
                if let Some(message) = message {
                    self.record(ctx, message);
                }
            }
            Action::Fail { message } => {
                let message = message
                    .clone()
                    .unwrap_or_else(|| format!("{} failed", self.name));
                return chain.throw(SchedulerError::handler(message));
            }
            Action::Sleep { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
        }
        Ok(())
    }

    fn describe(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler::Phase;
    use serde_json::json;

    fn phase(actions: Vec<Action>) -> Phase {
        let mut phase = Phase::new("main");
        for (index, action) in actions.into_iter().enumerate() {
            phase.use_handler(ActionHandler::new(format!("main[{index}]"), action));
        }
        phase
    }

    #[tokio::test]
    async fn test_log_defaults_to_handler_name() {
        let ctx = ExecutionContext::new();
        phase(vec![
            Action::Log { message: None },
            Action::Log {
                message: Some("hello".to_string()),
            },
        ])
        .run(&ctx)
        .await
        .unwrap();
        assert_eq!(ctx.get(TRACE_KEY), Some(json!(["main[0]", "hello"])));
    }

    #[tokio::test]
    async fn test_set_stores_value() {
        let ctx = ExecutionContext::new();
        phase(vec![Action::Set {
            key: "user".to_string(),
            value: json!({"name": "alice"}),
        }])
        .run(&ctx)
        .await
        .unwrap();
        assert_eq!(ctx.get("user"), Some(json!({"name": "alice"})));
    }

    #[tokio::test]
    async fn test_next_logs_after_downstream() {
        let ctx = ExecutionContext::new();
        phase(vec![
            Action::Next {
                message: Some("after".to_string()),
            },
            Action::Log {
                message: Some("inner".to_string()),
            },
        ])
        .run(&ctx)
        .await
        .unwrap();
        assert_eq!(ctx.get(TRACE_KEY), Some(json!(["inner", "after"])));
    }

    #[tokio::test]
    async fn test_stop_and_fail() {
        let ctx = ExecutionContext::new();
        phase(vec![Action::Stop, Action::Fail { message: None }])
            .run(&ctx)
            .await
            .unwrap();

        let err = phase(vec![Action::Fail { message: None }])
            .run(&ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Handler failed: main[0] failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_waits() {
        let ctx = ExecutionContext::new();
        let start = tokio::time::Instant::now();
        phase(vec![Action::Sleep { ms: 250 }]).run(&ctx).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[test]
    fn test_action_kind() {
        assert_eq!(Action::Stop.kind(), "stop");
        assert_eq!(Action::Sleep { ms: 1 }.kind(), "sleep");
    }
}
