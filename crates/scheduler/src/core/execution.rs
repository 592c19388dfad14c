//! Chain-of-responsibility execution of handler sequences.
//!
//! [`as_runnable`] compiles a handler list into a [`Runnable`]:
//!
//! - sequential: each handler gets a fresh [`Chain`] over the handlers after
//!   it; a handler that finishes its chain (`stop()` or `next()`) ends the
//!   loop, otherwise the loop moves on
//! - parallel: every handler runs concurrently on one shared chain; the
//!   runnable resolves once all of them have finished and fails with the
//!   first error in registration order, whatever `fail_fast` says

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt};
use phaseflow_core::PhaseOptions;
use tracing::{debug, trace};

use crate::error::{Result, SchedulerError};

use super::context::ExecutionContext;
use super::handler::{HandlerList, TaggedHandler};

/// Compile a handler list into a runnable with the given policy.
pub fn as_runnable(handlers: impl Into<HandlerList>, options: PhaseOptions) -> Runnable {
    Runnable {
        handlers: handlers.into(),
        start: 0,
        options,
    }
}

/// A compiled handler sequence, see [`as_runnable`].
#[derive(Clone)]
pub struct Runnable {
    handlers: HandlerList,
    start: usize,
    options: PhaseOptions,
}

impl Runnable {
    pub fn options(&self) -> PhaseOptions {
        self.options
    }

    pub fn len(&self) -> usize {
        self.handlers.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the sequence against `ctx`.
    pub fn run<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<()>> {
        if self.options.parallel {
            self.run_parallel(ctx).boxed()
        } else {
            self.run_sequential(ctx).boxed()
        }
    }

    fn entries(&self) -> &[TaggedHandler] {
        &self.handlers[self.start..]
    }

    async fn run_sequential(&self, ctx: &ExecutionContext) -> Result<()> {
        for (offset, entry) in self.entries().iter().enumerate() {
            let position = self.start + offset;
            let chain = Chain::new(ctx.clone(), Arc::clone(&self.handlers), position + 1);

            trace!(handler = %entry.tag(), position, "Invoking handler");

            match entry.handler().handle(ctx, &chain).await {
                Ok(()) if chain.is_done() => {
                    trace!(handler = %entry.tag(), "Chain finished by handler");
                    break;
                }
                Ok(()) => {}
                Err(error) if self.options.fail_fast => {
                    debug!(handler = %entry.tag(), error = %error, "Handler failed, aborting sequence");
                    return Err(error);
                }
                Err(error) => {
                    debug!(handler = %entry.tag(), error = %error, "Handler failed, continuing");
                    ctx.set_error(error);
                }
            }
        }

        Ok(())
    }

    async fn run_parallel(&self, ctx: &ExecutionContext) -> Result<()> {
        let chain = Chain::detached(ctx.clone());
        let entries = self.entries();

        trace!(handlers = entries.len(), "Fanning out parallel handlers");

        let results = join_all(
            entries
                .iter()
                .map(|entry| entry.handler().handle(ctx, &chain)),
        )
        .await;

        let mut first_error = None;
        for (entry, result) in entries.iter().zip(results) {
            let Err(error) = result else { continue };
            debug!(handler = %entry.tag(), error = %error, "Parallel handler failed");
            if first_error.is_none() {
                first_error = Some(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Runnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runnable")
            .field("handlers", &self.entries())
            .field("options", &self.options)
            .finish()
    }
}

/// Control object handed to a handler for its position in a sequence.
///
/// Clones share the `done` flag.
#[derive(Clone)]
pub struct Chain {
    ctx: ExecutionContext,
    handlers: HandlerList,
    start: usize,
    done: Arc<AtomicBool>,
}

impl Chain {
    fn new(ctx: ExecutionContext, handlers: HandlerList, start: usize) -> Self {
        Self {
            ctx,
            handlers,
            start,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A chain with nothing after it.
    ///
    /// `next()` only marks it done. Parallel buckets share one of these.
    pub fn detached(ctx: ExecutionContext) -> Self {
        let empty: Vec<TaggedHandler> = Vec::new();
        Self::new(ctx, empty.into(), 0)
    }

    /// Run the remaining handlers now and wait for them.
    ///
    /// They run sequentially and fail-fast whatever the enclosing policy, and
    /// their error is returned here.
    ///
    /// Fails with [`SchedulerError::ChainAlreadyAdvanced`] if the chain is
    /// already done.
    pub async fn next(&self) -> Result<()> {
        self.advance(&self.ctx).await
    }

    /// Like [`Chain::next`], but the remaining handlers see `ctx` instead.
    pub async fn next_with(&self, ctx: &ExecutionContext) -> Result<()> {
        self.advance(ctx).await
    }

    /// Skip every remaining handler of the enclosing sequence.
    pub fn stop(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    /// Abort the handler with `error`.
    ///
    /// Meant to be returned directly: `return chain.throw(err);`
    pub fn throw<T>(&self, error: impl Into<SchedulerError>) -> Result<T> {
        Err(error.into())
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Number of handlers `next()` would run.
    pub fn remaining(&self) -> usize {
        self.handlers.len().saturating_sub(self.start)
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    async fn advance(&self, ctx: &ExecutionContext) -> Result<()> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::ChainAlreadyAdvanced);
        }
        if self.remaining() == 0 {
            return Ok(());
        }

        let downstream = Runnable {
            handlers: Arc::clone(&self.handlers),
            start: self.start,
            options: PhaseOptions::default(),
        };
        downstream.run(ctx).await
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("remaining", &self.remaining())
            .field("done", &self.is_done())
            .finish()
    }
}
