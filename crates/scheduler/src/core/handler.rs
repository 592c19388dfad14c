//! Handler trait and helpers for registering units of work.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

use super::context::ExecutionContext;
use super::execution::Chain;

/// A unit of work run by a phase.
///
/// A handler receives the run's context and the [`Chain`] for its position.
/// Returning `Ok(())` without touching the chain lets the next handler run;
/// `chain.stop()` skips everything after it; `chain.next().await` runs the
/// rest of the sequence before returning, so code after it observes the
/// downstream handlers' effects.
///
/// Handlers must not keep per-run state in `self`: one instance is shared by
/// every run of a `PhaseList`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &ExecutionContext, chain: &Chain) -> Result<()>;

    /// Human-readable name used in diagnostics.
    fn describe(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, ctx: &ExecutionContext, chain: &Chain) -> Result<()> {
        (**self).handle(ctx, chain).await
    }

    fn describe(&self) -> &str {
        (**self).describe()
    }
}

/// Handler backed by a closure, see [`handler_fn`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Build a handler from a closure.
///
/// The closure gets owned clones of the context and chain; both are cheap
/// handles onto shared state.
///
/// ```ignore
/// phase.use_handler(handler_fn("greet", |ctx, _chain| async move {
///     ctx.set("greeting", "hello")
/// }));
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(ExecutionContext, Chain) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnHandler {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(ExecutionContext, Chain) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: &ExecutionContext, chain: &Chain) -> Result<()> {
        (self.f)(ctx.clone(), chain.clone()).await
    }

    fn describe(&self) -> &str {
        &self.name
    }
}

/// A registered handler together with the tag it is reported under.
#[derive(Clone)]
pub struct TaggedHandler {
    tag: String,
    handler: Arc<dyn Handler>,
}

impl TaggedHandler {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            tag: handler.describe().to_string(),
            handler,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

impl std::fmt::Debug for TaggedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaggedHandler")
            .field("tag", &self.tag)
            .field("handler", &self.handler.describe())
            .finish()
    }
}

/// Immutable handler sequence shared between chains and runs.
pub type HandlerList = Arc<[TaggedHandler]>;
