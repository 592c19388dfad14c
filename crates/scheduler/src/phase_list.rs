//! Ordered phase collection with the `$error` and `$final` phases.
//!
//! A `PhaseList` flattens its regular phases into one handler sequence and
//! runs it through the chain mechanism. An error escaping that sequence is
//! stored on the context and handed to `$error`; `$final` runs on every path.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use events::EventBus;
use phaseflow_core::{merge, PhaseOptions, RunState, Sub, ERROR_PHASE, FINAL_PHASE};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{
    as_runnable, ExecutionContext, Handler, HandlerList, OrderedEventEmitter, Phase,
};
use crate::error::{Result, SchedulerError};
use crate::resources::RunGuard;

/// Ordered phases plus the two fixed system phases.
///
/// Registration methods take `&mut self` and reset the flattened handler
/// cache; `run` takes `&self`, so a fully registered list can be shared
/// behind an `Arc` and run concurrently against independent contexts.
pub struct PhaseList {
    phases: Vec<Phase>,
    index: HashMap<String, usize>,
    error_phase: Phase,
    final_phase: Phase,
    flattened: OnceLock<HandlerList>,
    emitter: Option<OrderedEventEmitter>,
}

impl PhaseList {
    pub fn new() -> Self {
        Self {
            phases: Vec::new(),
            index: HashMap::new(),
            error_phase: Phase::with_options(ERROR_PHASE, PhaseOptions::error_phase()),
            final_phase: Phase::with_options(FINAL_PHASE, PhaseOptions::final_phase()),
            flattened: OnceLock::new(),
            emitter: None,
        }
    }

    /// Create a list seeded with default phases in the given order.
    pub fn with_order<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::new();
        list.add_all(names.into_iter().map(|name| Phase::new(name)))?;
        Ok(list)
    }

    /// Publish run lifecycle events on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.emitter = Some(OrderedEventEmitter::new(bus));
        self
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.emitter.as_ref().map(|emitter| emitter.bus())
    }

    /// Append one phase.
    pub fn add(&mut self, phase: impl Into<Phase>) -> Result<&mut Self> {
        self.add_all([phase.into()])
    }

    /// Append phases in order.
    pub fn add_all<I, P>(&mut self, phases: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<Phase>,
    {
        let at = self.phases.len();
        self.add_at(at, phases)
    }

    /// Insert phases starting at `index`, clamped to the list length.
    ///
    /// Nothing is inserted if any id is a duplicate.
    pub fn add_at<I, P>(&mut self, index: usize, phases: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<Phase>,
    {
        let phases: Vec<Phase> = phases.into_iter().map(Into::into).collect();
        self.check_new_ids(&phases)?;

        let at = index.min(self.phases.len());
        debug!(
            at,
            phases = ?phases.iter().map(Phase::id).collect::<Vec<_>>(),
            "Adding phases"
        );
        self.phases.splice(at..at, phases);
        self.reindex();
        Ok(self)
    }

    /// Insert phases right after `existing`.
    pub fn add_after<I, P>(&mut self, existing: &str, phases: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<Phase>,
    {
        let at = self.position(existing)? + 1;
        self.add_at(at, phases)
    }

    /// Insert phases right before `existing`.
    pub fn add_before<I, P>(&mut self, existing: &str, phases: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<Phase>,
    {
        let at = self.position(existing)?;
        self.add_at(at, phases)
    }

    /// Detach a regular phase. `$error` and `$final` cannot be removed.
    pub fn remove(&mut self, id: &str) -> Option<Phase> {
        let at = self.index.get(id).copied()?;
        let phase = self.phases.remove(at);
        self.reindex();
        debug!(phase = %id, "Removed phase");
        Some(phase)
    }

    /// Merge another phase ordering into this one.
    ///
    /// Existing phases keep their handlers and only move; unknown names
    /// become default phases. Fails without changes on an ordering conflict.
    pub fn zip_merge<S: AsRef<str>>(&mut self, names: &[S]) -> Result<&mut Self> {
        if let Some(reserved) = names.iter().map(AsRef::as_ref).find(|n| is_reserved(n)) {
            return Err(SchedulerError::ReservedPhase(reserved.to_string()));
        }

        let merged = merge(&self.phase_ids(), names)?;

        let mut existing: HashMap<String, Phase> = self
            .phases
            .drain(..)
            .map(|phase| (phase.id().to_string(), phase))
            .collect();
        self.phases = merged
            .into_iter()
            .map(|id| existing.remove(&id).unwrap_or_else(|| Phase::new(id)))
            .collect();
        self.reindex();

        debug!(order = ?self.phase_ids(), "Merged phase order");
        Ok(self)
    }

    /// Look up a phase, including `$error` and `$final`.
    pub fn find(&self, id: &str) -> Option<&Phase> {
        match id {
            ERROR_PHASE => Some(&self.error_phase),
            FINAL_PHASE => Some(&self.final_phase),
            _ => self.index.get(id).map(|&at| &self.phases[at]),
        }
    }

    /// Mutable lookup; the flattened handler list is rebuilt on next use.
    pub fn find_mut(&mut self, id: &str) -> Option<&mut Phase> {
        self.invalidate();
        match id {
            ERROR_PHASE => Some(&mut self.error_phase),
            FINAL_PHASE => Some(&mut self.final_phase),
            _ => match self.index.get(id) {
                Some(&at) => Some(&mut self.phases[at]),
                None => None,
            },
        }
    }

    /// Look up a phase, appending a default one if it does not exist.
    pub fn find_or_add(&mut self, id: &str) -> &mut Phase {
        if self.find(id).is_none() {
            self.phases.push(Phase::new(id));
            self.reindex();
        }
        self.invalidate();
        match id {
            ERROR_PHASE => &mut self.error_phase,
            FINAL_PHASE => &mut self.final_phase,
            _ => {
                let at = self.index[id];
                &mut self.phases[at]
            }
        }
    }

    /// Register a handler by name.
    ///
    /// `name` is a phase id optionally suffixed with `:before` or `:after`;
    /// without a suffix the handler goes to the `use` bucket.
    pub fn register_handler(
        &mut self,
        name: &str,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self> {
        let (id, sub) = Sub::split(name)?;
        let phase = self
            .find_mut(id)
            .ok_or_else(|| SchedulerError::PhaseNotFound(id.to_string()))?;
        phase.add_handler(sub, handler);
        Ok(self)
    }

    /// Ids of the regular phases, in run order.
    pub fn phase_ids(&self) -> Vec<&str> {
        self.phases.iter().map(Phase::id).collect()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Regular phases in run order.
    pub fn iter(&self) -> impl Iterator<Item = &Phase> {
        self.phases.iter()
    }

    pub fn error_phase(&self) -> &Phase {
        &self.error_phase
    }

    pub fn error_phase_mut(&mut self) -> &mut Phase {
        &mut self.error_phase
    }

    pub fn final_phase(&self) -> &Phase {
        &self.final_phase
    }

    pub fn final_phase_mut(&mut self) -> &mut Phase {
        &mut self.final_phase
    }

    /// Every regular handler, flattened in phase order.
    pub fn handlers(&self) -> HandlerList {
        Arc::clone(self.flattened.get_or_init(|| {
            self.phases
                .iter()
                .flat_map(|phase| phase.handlers().iter().cloned().collect::<Vec<_>>())
                .collect()
        }))
    }

    /// Run every phase against `ctx`.
    ///
    /// The regular phases run as one fail-fast sequence. If it fails, the
    /// error is stored with [`ExecutionContext::set_error`] and `$error`
    /// runs; `$final` runs afterwards on every path. Returns the `$final`
    /// error if there is one, otherwise the `$error` phase error, otherwise
    /// `Ok(())`: a regular-phase failure handled by `$error` is only visible
    /// on the context.
    pub async fn run(&self, ctx: &ExecutionContext) -> Result<()> {
        self.run_with_id(ctx, Uuid::new_v4()).await
    }

    /// Like [`PhaseList::run`], with the id its events are published under.
    ///
    /// Lets a host subscribe with [`EventBus::subscribe_run`] before the
    /// run starts.
    pub async fn run_with_id(&self, ctx: &ExecutionContext, run_id: Uuid) -> Result<()> {
        let handlers = self.handlers();
        let mut guard = RunGuard::with_run_id(run_id, self.emitter.clone());

        info!(
            run_id = %run_id,
            phases = self.phases.len(),
            handlers = handlers.len(),
            "Starting run"
        );
        track(run_id, guard.start(self.phases.len()));

        let mut outcome = Ok(());
        if let Err(error) = as_runnable(handlers, PhaseOptions::default()).run(ctx).await {
            debug!(run_id = %run_id, error = %error, "Regular phases failed");
            track(run_id, guard.fail(&error));
            ctx.set_error(error);
            outcome = self.error_phase.run(ctx).await;
        }

        track(run_id, guard.advance(RunState::RunningFinal));
        let result = match self.final_phase.run(ctx).await {
            Ok(()) => outcome,
            Err(error) => Err(error),
        };

        track(run_id, guard.finish(&result));
        info!(
            run_id = %run_id,
            failed = guard.failed(),
            "Run finished"
        );
        result
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| SchedulerError::PhaseNotFound(id.to_string()))
    }

    fn check_new_ids(&self, phases: &[Phase]) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for phase in phases {
            let id = phase.id();
            if is_reserved(id) || self.index.contains_key(id) || !seen.insert(id) {
                return Err(SchedulerError::DuplicatePhase(id.to_string()));
            }
        }
        Ok(())
    }

    fn reindex(&mut self) {
        self.index = self
            .phases
            .iter()
            .enumerate()
            .map(|(at, phase)| (phase.id().to_string(), at))
            .collect();
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.flattened = OnceLock::new();
    }
}

impl Default for PhaseList {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PhaseList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseList")
            .field("phases", &self.phases)
            .field("error_phase", &self.error_phase)
            .field("final_phase", &self.final_phase)
            .finish()
    }
}

/// Log a lifecycle step the guard rejected; the run itself carries on.
fn track(run_id: Uuid, step: Result<()>) {
    if let Err(error) = step {
        warn!(run_id = %run_id, error = %error, "Run state not recorded");
    }
}

fn is_reserved(id: &str) -> bool {
    id == ERROR_PHASE || id == FINAL_PHASE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{handler_fn, Chain};
    use serde_json::json;

    fn recorder(name: &'static str) -> impl Handler {
        handler_fn(name, move |ctx: ExecutionContext, _chain| async move {
            ctx.push("trace", name);
            Ok(())
        })
    }

    fn failing(name: &'static str) -> impl Handler {
        handler_fn(name, move |ctx: ExecutionContext, _chain| async move {
            ctx.push("trace", name);
            Err(SchedulerError::handler(name))
        })
    }

    fn ids(list: &PhaseList) -> Vec<String> {
        list.phase_ids().into_iter().map(String::from).collect()
    }

    #[test]
    fn test_with_order() {
        let list = PhaseList::with_order(["initial", "auth", "final"]).unwrap();
        assert_eq!(ids(&list), vec!["initial", "auth", "final"]);
        assert_eq!(list.len(), 3);
        assert!(list.find("$error").is_some());
        assert!(list.find("$final").is_some());
    }

    #[test]
    fn test_add_duplicate_fails() {
        let mut list = PhaseList::new();
        list.add("auth").unwrap();
        let err = list.add("auth").unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicatePhase(id) if id == "auth"));
    }

    #[test]
    fn test_add_all_is_atomic() {
        let mut list = PhaseList::with_order(["a"]).unwrap();
        let err = list.add_all(["b", "c", "b"]).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicatePhase(_)));
        assert_eq!(ids(&list), vec!["a"]);
    }

    #[test]
    fn test_reserved_ids_rejected() {
        let mut list = PhaseList::new();
        assert!(list.add("$error").is_err());
        assert!(list.add("$final").is_err());
        assert!(matches!(
            list.zip_merge(&["a", "$final"]),
            Err(SchedulerError::ReservedPhase(_))
        ));
    }

    #[test]
    fn test_add_at_after_before() {
        let mut list = PhaseList::with_order(["a", "d"]).unwrap();
        list.add_after("a", ["b"]).unwrap();
        list.add_before("d", ["c"]).unwrap();
        list.add_at(0, ["start"]).unwrap();
        list.add_at(100, ["end"]).unwrap();
        assert_eq!(ids(&list), vec!["start", "a", "b", "c", "d", "end"]);
    }

    #[test]
    fn test_add_after_unknown_fails() {
        let mut list = PhaseList::new();
        let err = list.add_after("missing", ["x"]).unwrap_err();
        assert!(matches!(err, SchedulerError::PhaseNotFound(id) if id == "missing"));
        let err = list.add_before("missing", ["x"]).unwrap_err();
        assert!(matches!(err, SchedulerError::PhaseNotFound(_)));
    }

    #[test]
    fn test_remove() {
        let mut list = PhaseList::with_order(["a", "b", "c"]).unwrap();
        let removed = list.remove("b").unwrap();
        assert_eq!(removed.id(), "b");
        assert_eq!(ids(&list), vec!["a", "c"]);
        assert!(list.find("c").is_some());
        assert!(list.remove("b").is_none());
        assert!(list.remove("$error").is_none());
        assert!(list.find("$error").is_some());
    }

    #[test]
    fn test_zip_merge_preserves_handlers() {
        let mut list =
            PhaseList::with_order(["initial", "session", "auth", "routes", "files", "final"])
                .unwrap();
        list.register_handler("auth", recorder("auth")).unwrap();

        list.zip_merge(&[
            "initial", "postinit", "preauth", "auth", "routes", "subapps", "final", "last",
        ])
        .unwrap();

        assert_eq!(
            ids(&list),
            vec![
                "initial", "postinit", "preauth", "session", "auth", "routes", "subapps",
                "files", "final", "last",
            ]
        );
        assert_eq!(list.find("auth").unwrap().handler_count(), 1);
        assert_eq!(list.find("subapps").unwrap().handler_count(), 0);
    }

    #[test]
    fn test_zip_merge_conflict_leaves_order() {
        let mut list = PhaseList::with_order(["one", "two"]).unwrap();
        let err = list.zip_merge(&["two", "one"]).unwrap_err();
        assert!(matches!(err, SchedulerError::Ordering(_)));
        assert_eq!(ids(&list), vec!["one", "two"]);
    }

    #[test]
    fn test_register_handler_routes_sub() {
        let mut list = PhaseList::with_order(["auth"]).unwrap();
        list.register_handler("auth:before", recorder("b"))
            .unwrap()
            .register_handler("auth", recorder("u"))
            .unwrap()
            .register_handler("auth:after", recorder("a"))
            .unwrap();

        let phase = list.find("auth").unwrap();
        assert_eq!(phase.bucket(Sub::Before).len(), 1);
        assert_eq!(phase.bucket(Sub::Use).len(), 1);
        assert_eq!(phase.bucket(Sub::After).len(), 1);
    }

    #[test]
    fn test_register_handler_unknown_phase() {
        let mut list = PhaseList::new();
        let err = list.register_handler("nope", recorder("x")).unwrap_err();
        assert!(matches!(err, SchedulerError::PhaseNotFound(id) if id == "nope"));

        let err = list.register_handler("$error:during", recorder("x")).unwrap_err();
        assert!(matches!(err, SchedulerError::Ordering(_)));
    }

    #[test]
    fn test_find_or_add() {
        let mut list = PhaseList::new();
        list.find_or_add("auth").use_handler(recorder("a"));
        list.find_or_add("auth").use_handler(recorder("b"));
        list.find_or_add("$final").use_handler(recorder("f"));
        assert_eq!(ids(&list), vec!["auth"]);
        assert_eq!(list.find("auth").unwrap().handler_count(), 2);
        assert_eq!(list.final_phase().handler_count(), 1);
    }

    #[test]
    fn test_flattened_cache_rebuilt_after_registration() {
        let mut list = PhaseList::with_order(["a", "b"]).unwrap();
        list.register_handler("a", recorder("a")).unwrap();
        assert_eq!(list.handlers().len(), 1);

        list.register_handler("b", recorder("b")).unwrap();
        let handlers = list.handlers();
        let tags: Vec<&str> = handlers.iter().map(|h| h.tag()).collect();
        assert_eq!(tags, vec!["a:use[0]", "b:use[0]"]);
    }

    #[tokio::test]
    async fn test_run_flattens_phases_in_order() {
        let mut list = PhaseList::with_order(["a", "b"]).unwrap();
        list.register_handler("b", recorder("b")).unwrap();
        list.register_handler("a:after", recorder("a-after")).unwrap();
        list.register_handler("a", recorder("a")).unwrap();
        list.register_handler("$final", recorder("final")).unwrap();

        let ctx = ExecutionContext::new();
        list.run(&ctx).await.unwrap();
        assert_eq!(ctx.get("trace"), Some(json!(["a", "a-after", "b", "final"])));
        assert!(!ctx.has_error());
    }

    #[tokio::test]
    async fn test_stop_skips_later_phases_but_not_final() {
        let mut list = PhaseList::with_order(["a", "b"]).unwrap();
        list.register_handler(
            "a",
            handler_fn("stopper", |_ctx, chain: Chain| async move {
                chain.stop();
                Ok(())
            }),
        )
        .unwrap();
        list.register_handler("b", recorder("b")).unwrap();
        list.register_handler("$final", recorder("final")).unwrap();

        let ctx = ExecutionContext::new();
        list.run(&ctx).await.unwrap();
        assert_eq!(ctx.get("trace"), Some(json!(["final"])));
    }

    #[tokio::test]
    async fn test_error_routed_to_error_phase() {
        let mut list = PhaseList::with_order(["a", "b"]).unwrap();
        list.register_handler("a", failing("a")).unwrap();
        list.register_handler("b", recorder("b")).unwrap();
        list.register_handler("$error", recorder("error")).unwrap();
        list.register_handler("$final", recorder("final")).unwrap();

        let ctx = ExecutionContext::new();
        list.run(&ctx).await.unwrap();
        assert_eq!(ctx.get("trace"), Some(json!(["a", "error", "final"])));
        assert_eq!(ctx.error().unwrap().to_string(), "Handler failed: a");
    }

    #[tokio::test]
    async fn test_error_phase_is_fail_soft() {
        let mut list = PhaseList::with_order(["a"]).unwrap();
        list.register_handler("a", failing("a")).unwrap();
        list.register_handler("$error", failing("error-1")).unwrap();
        list.register_handler("$error", recorder("error-2")).unwrap();
        list.register_handler("$final", recorder("final")).unwrap();

        let ctx = ExecutionContext::new();
        list.run(&ctx).await.unwrap();
        assert_eq!(
            ctx.get("trace"),
            Some(json!(["a", "error-1", "error-2", "final"]))
        );
        assert_eq!(ctx.error().unwrap().to_string(), "Handler failed: error-1");
    }

    #[tokio::test]
    async fn test_final_error_escapes_run() {
        let mut list = PhaseList::with_order(["a"]).unwrap();
        list.register_handler("a", failing("a")).unwrap();
        list.register_handler("$final", failing("final")).unwrap();

        let ctx = ExecutionContext::new();
        let err = list.run(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "Handler failed: final");
        assert_eq!(ctx.error().unwrap().to_string(), "Handler failed: a");
    }

    #[test]
    fn test_rejected_lifecycle_step_is_not_fatal() {
        let mut guard = RunGuard::new(None);
        track(guard.run_id(), guard.advance(RunState::Done));
        assert_eq!(guard.state(), RunState::Start);
        track(guard.run_id(), guard.start(0));
        assert_eq!(guard.state(), RunState::RunningRegular);
    }

    #[tokio::test]
    async fn test_run_with_id_publishes_under_that_id() {
        let bus = EventBus::new();
        let mut list = PhaseList::with_order(["a"]).unwrap().with_event_bus(bus.clone());
        list.register_handler("a", recorder("a")).unwrap();

        let run_id = Uuid::new_v4();
        let mut subscription = bus.subscribe_run(run_id);
        list.run_with_id(&ExecutionContext::new(), run_id)
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(envelope) = subscription.next().await {
            assert_eq!(envelope.event.run_id(), run_id);
            seen.push(envelope);
        }
        assert!(seen.first().is_some());
        assert!(seen.last().map_or(false, |e| e.event.is_terminal()));
    }

    #[tokio::test]
    async fn test_empty_list_runs() {
        let list = PhaseList::new();
        assert!(list.is_empty());
        list.run(&ExecutionContext::new()).await.unwrap();
    }
}
