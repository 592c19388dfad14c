//! Phase: a named group of handlers split into before/use/after buckets.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use phaseflow_core::{PhaseOptions, Sub};
use tracing::trace;

use crate::error::Result;

use super::context::ExecutionContext;
use super::execution::{as_runnable, Chain, Runnable};
use super::handler::{Handler, HandlerList, TaggedHandler};

/// A named unit of work made of three ordered handler buckets.
///
/// Handlers are append-only. The compiled handler list is cached and
/// rebuilt after any append.
#[derive(Clone)]
pub struct Phase {
    id: String,
    options: PhaseOptions,
    before: Vec<TaggedHandler>,
    uses: Vec<TaggedHandler>,
    after: Vec<TaggedHandler>,
    compiled: OnceLock<HandlerList>,
}

impl Phase {
    /// Create a sequential, fail-fast phase.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_options(id, PhaseOptions::default())
    }

    pub fn with_options(id: impl Into<String>, options: PhaseOptions) -> Self {
        Self {
            id: id.into(),
            options,
            before: Vec::new(),
            uses: Vec::new(),
            after: Vec::new(),
            compiled: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> PhaseOptions {
        self.options
    }

    pub fn before(&mut self, handler: impl Handler + 'static) -> &mut Self {
        self.add_handler(Sub::Before, handler)
    }

    /// Register a handler in the main bucket.
    pub fn use_handler(&mut self, handler: impl Handler + 'static) -> &mut Self {
        self.add_handler(Sub::Use, handler)
    }

    pub fn after(&mut self, handler: impl Handler + 'static) -> &mut Self {
        self.add_handler(Sub::After, handler)
    }

    pub fn add_handler(&mut self, sub: Sub, handler: impl Handler + 'static) -> &mut Self {
        self.add_shared(sub, Arc::new(handler))
    }

    /// Register a handler instance that is shared with other phases.
    pub fn add_shared(&mut self, sub: Sub, handler: Arc<dyn Handler>) -> &mut Self {
        let entry = TaggedHandler::new(handler);
        match sub {
            Sub::Before => self.before.push(entry),
            Sub::Use => self.uses.push(entry),
            Sub::After => self.after.push(entry),
        }
        self.compiled = OnceLock::new();
        self
    }

    /// Handlers registered in one bucket, in registration order.
    pub fn bucket(&self, sub: Sub) -> &[TaggedHandler] {
        match sub {
            Sub::Before => &self.before,
            Sub::Use => &self.uses,
            Sub::After => &self.after,
        }
    }

    /// Total number of registered handlers across all buckets.
    pub fn handler_count(&self) -> usize {
        self.before.len() + self.uses.len() + self.after.len()
    }

    /// The compiled handler list.
    ///
    /// Sequential phases flatten to `before ++ use ++ after`, each entry
    /// tagged `id:sub[index]`. Parallel phases compile to exactly three
    /// entries, one per bucket, each running its bucket concurrently; the
    /// three still run one after another.
    pub fn handlers(&self) -> HandlerList {
        Arc::clone(self.compiled.get_or_init(|| self.compile()))
    }

    /// Run this phase alone, outside of a `PhaseList`.
    pub async fn run(&self, ctx: &ExecutionContext) -> Result<()> {
        trace!(phase = %self.id, "Running phase");
        let options = PhaseOptions::sequential().with_fail_fast(self.options.fail_fast);
        as_runnable(self.handlers(), options).run(ctx).await
    }

    fn compile(&self) -> HandlerList {
        if self.options.parallel {
            Sub::ALL
                .iter()
                .map(|&sub| {
                    let bucket = BucketHandler {
                        runnable: as_runnable(self.bucket(sub).to_vec(), self.options),
                    };
                    TaggedHandler::new(Arc::new(bucket)).with_tag(format!("{}:{}", self.id, sub))
                })
                .collect()
        } else {
            Sub::ALL
                .iter()
                .flat_map(|&sub| {
                    self.bucket(sub).iter().enumerate().map(move |(index, entry)| {
                        entry
                            .clone()
                            .with_tag(format!("{}:{}[{}]", self.id, sub, index))
                    })
                })
                .collect()
        }
    }
}

impl From<&str> for Phase {
    fn from(id: &str) -> Self {
        Phase::new(id)
    }
}

impl From<String> for Phase {
    fn from(id: String) -> Self {
        Phase::new(id)
    }
}

impl std::fmt::Debug for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("before", &self.before.len())
            .field("use", &self.uses.len())
            .field("after", &self.after.len())
            .finish()
    }
}

/// One bucket of a parallel phase, run as a single sequential step.
///
/// It ignores the outer chain, so the enclosing sequence always moves on to
/// the next bucket.
struct BucketHandler {
    runnable: Runnable,
}

#[async_trait]
impl Handler for BucketHandler {
    async fn handle(&self, ctx: &ExecutionContext, _chain: &Chain) -> Result<()> {
        self.runnable.run(ctx).await
    }

    fn describe(&self) -> &str {
        "bucket"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handler::handler_fn;
    use crate::error::SchedulerError;
    use serde_json::json;
    use std::time::Duration;

    fn recorder(name: &'static str) -> impl Handler {
        handler_fn(name, move |ctx: ExecutionContext, _chain| async move {
            ctx.push("trace", name);
            Ok(())
        })
    }

    fn sleeper(name: &'static str, ms: u64) -> impl Handler {
        handler_fn(name, move |ctx: ExecutionContext, _chain| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ctx.push("trace", name);
            Ok(())
        })
    }

    fn tags(phase: &Phase) -> Vec<String> {
        phase.handlers().iter().map(|h| h.tag().to_string()).collect()
    }

    #[tokio::test]
    async fn test_sequential_phase_runs_buckets_in_order() {
        let mut phase = Phase::new("auth");
        phase
            .after(recorder("after"))
            .use_handler(recorder("use"))
            .before(recorder("before"));

        let ctx = ExecutionContext::new();
        phase.run(&ctx).await.unwrap();
        assert_eq!(ctx.get("trace"), Some(json!(["before", "use", "after"])));
    }

    #[test]
    fn test_sequential_tags() {
        let mut phase = Phase::new("auth");
        phase
            .before(recorder("a"))
            .use_handler(recorder("b"))
            .use_handler(recorder("c"));
        assert_eq!(tags(&phase), vec!["auth:before[0]", "auth:use[0]", "auth:use[1]"]);
        assert_eq!(phase.handler_count(), 3);
    }

    #[test]
    fn test_parallel_compiles_three_buckets() {
        let mut phase = Phase::with_options("assets", PhaseOptions::parallel());
        phase.use_handler(recorder("a")).use_handler(recorder("b"));
        assert_eq!(
            tags(&phase),
            vec!["assets:before", "assets:use", "assets:after"]
        );
    }

    #[test]
    fn test_cache_invalidated_on_every_append() {
        let mut phase = Phase::new("auth");
        phase.use_handler(recorder("a"));
        assert_eq!(phase.handlers().len(), 1);

        phase.before(recorder("b"));
        assert_eq!(phase.handlers().len(), 2);

        phase.after(recorder("c"));
        assert_eq!(phase.handlers().len(), 3);
    }

    #[test]
    fn test_cache_reused_between_calls() {
        let mut phase = Phase::new("auth");
        phase.use_handler(recorder("a"));
        assert!(Arc::ptr_eq(&phase.handlers(), &phase.handlers()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_before_completes_before_use() {
        let mut phase = Phase::with_options("assets", PhaseOptions::parallel());
        phase
            .before(sleeper("before-slow", 30))
            .before(sleeper("before-fast", 10))
            .use_handler(sleeper("use-fast", 1))
            .use_handler(sleeper("use-slow", 5))
            .after(recorder("after"));

        let ctx = ExecutionContext::new();
        phase.run(&ctx).await.unwrap();
        assert_eq!(
            ctx.get("trace"),
            Some(json!([
                "before-fast",
                "before-slow",
                "use-fast",
                "use-slow",
                "after"
            ]))
        );
    }

    #[tokio::test]
    async fn test_phase_fail_soft_runs_every_handler() {
        let mut phase = Phase::with_options("errors", PhaseOptions::error_phase());
        phase
            .use_handler(handler_fn("bad", |_ctx, _chain| async {
                Err(SchedulerError::handler("bad"))
            }))
            .use_handler(recorder("good"));

        let ctx = ExecutionContext::new();
        phase.run(&ctx).await.unwrap();
        assert_eq!(ctx.get("trace"), Some(json!(["good"])));
        assert!(ctx.has_error());
    }

    #[tokio::test]
    async fn test_stop_in_parallel_bucket_does_not_skip_next_bucket() {
        let mut phase = Phase::with_options("assets", PhaseOptions::parallel());
        phase
            .before(handler_fn("stopper", |_ctx, chain: Chain| async move {
                chain.stop();
                Ok(())
            }))
            .use_handler(recorder("use"));

        let ctx = ExecutionContext::new();
        phase.run(&ctx).await.unwrap();
        assert_eq!(ctx.get("trace"), Some(json!(["use"])));
    }
}
