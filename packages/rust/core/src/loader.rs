//! Parallel loader: fan out independent fetches, fan them back in, then
//! either run the handler on the enriched scope or hand a report to the
//! error policy.
//!
//! Per invocation:
//!
//! ```text
//! STARTED -> AWAITING_RESULTS -> ALL_SUCCEEDED -> HANDLER_INVOKED
//!                             \-> ANY_FAILED    -> ERROR_POLICY_INVOKED
//! ```
//!
//! Tasks are started in registration order, each with the scope as it was
//! on entry. Completions are awaited in the same order, not in completion
//! order, and every task is awaited even after a failure so the report is
//! complete. Successful results are bound in that order.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use loadchain_shared::{LoadchainError, ScopeKey};

use crate::handler::{BoxHandler, Handler, handler_fn};
use crate::scope::{Scope, ScopeValue};

// ---------------------------------------------------------------------------
// Completion signal
// ---------------------------------------------------------------------------

/// Outcome of one loader task.
pub enum LoadOutcome {
    Success(ScopeValue),
    Failure,
}

impl std::fmt::Debug for LoadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success(_) => f.write_str("Success(..)"),
            Self::Failure => f.write_str("Failure"),
        }
    }
}

/// Sending half of a completion signal. Consumed by the first call, so a
/// task cannot complete twice. Dropping it counts as failure.
#[derive(Debug)]
pub struct Completer {
    tx: oneshot::Sender<LoadOutcome>,
}

impl Completer {
    pub fn succeed<T: Any + Send + Sync>(self, value: T) {
        self.complete(LoadOutcome::Success(Arc::new(value)));
    }

    pub fn fail(self) {
        self.complete(LoadOutcome::Failure);
    }

    pub fn complete(self, outcome: LoadOutcome) {
        // Err only when the receiver is already dropped; the outcome is discarded.
        self.tx.send(outcome).ok();
    }
}

/// Receiving half of a completion signal.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<LoadOutcome>,
}

impl Completion {
    pub fn channel() -> (Completer, Completion) {
        let (tx, rx) = oneshot::channel();
        (Completer { tx }, Completion { rx })
    }

    /// Wait for the outcome. A dropped completer reads as failure.
    pub async fn wait(self) -> LoadOutcome {
        self.rx.await.unwrap_or(LoadOutcome::Failure)
    }
}

// ---------------------------------------------------------------------------
// LoaderTask
// ---------------------------------------------------------------------------

type StartFn = dyn Fn(&Scope) -> Completion + Send + Sync;

/// A keyed unit of asynchronous work.
///
/// Starting a task must not block: it kicks off the work and returns the
/// completion signal immediately.
#[derive(Clone)]
pub struct LoaderTask {
    key: ScopeKey,
    start: Arc<StartFn>,
}

impl LoaderTask {
    /// Task from a raw start function.
    pub fn new<F>(key: impl Into<ScopeKey>, start: F) -> Self
    where
        F: Fn(&Scope) -> Completion + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            start: Arc::new(start),
        }
    }

    /// Task that runs `fetch` on the tokio runtime. `Some` succeeds, `None`
    /// fails. A panic inside `fetch` also fails the task.
    pub fn spawn<F, Fut, T>(key: impl Into<ScopeKey>, fetch: F) -> Self
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<T>> + Send + 'static,
        T: Any + Send + Sync,
    {
        Self::new(key, move |scope: &Scope| {
            let (completer, completion) = Completion::channel();
            let work = fetch(scope.clone());
            tokio::spawn(async move {
                match work.await {
                    Some(value) => completer.succeed(value),
                    None => completer.fail(),
                }
            });
            completion
        })
    }

    /// Like [`spawn`](Self::spawn) for fetches that return `Result`. The
    /// error is logged and the task fails.
    pub fn spawn_fallible<F, Fut, T, E>(key: impl Into<ScopeKey>, fetch: F) -> Self
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Any + Send + Sync,
        E: Display + Send + 'static,
    {
        let key = key.into();
        let label = key.clone();
        Self::spawn(key, move |scope| {
            let work = fetch(scope);
            let label = label.clone();
            async move {
                work.await
                    .map_err(|e| warn!(key = %label, error = %e, "loader task errored"))
                    .ok()
            }
        })
    }

    /// Task that succeeds immediately with a clone of `value`.
    pub fn ready<T: Any + Clone + Send + Sync>(key: impl Into<ScopeKey>, value: T) -> Self {
        Self::new(key, move |_: &Scope| {
            let (completer, completion) = Completion::channel();
            completer.succeed(value.clone());
            completion
        })
    }

    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    /// Start the task against `scope`.
    pub fn start(&self, scope: &Scope) -> (Completion, ScopeKey) {
        ((self.start)(scope), self.key.clone())
    }
}

impl std::fmt::Debug for LoaderTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderTask").field("key", &self.key).finish()
    }
}

// ---------------------------------------------------------------------------
// LoadReport
// ---------------------------------------------------------------------------

/// Per-task success flags for one loader invocation, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    entries: Vec<(ScopeKey, bool)>,
}

impl LoadReport {
    pub fn push(&mut self, key: ScopeKey, succeeded: bool) {
        self.entries.push((key, succeeded));
    }

    pub fn entries(&self) -> &[(ScopeKey, bool)] {
        &self.entries
    }

    pub fn is_success(&self) -> bool {
        self.entries.iter().all(|(_, ok)| *ok)
    }

    pub fn failed_keys(&self) -> Vec<&ScopeKey> {
        self.entries
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(k, _)| k)
            .collect()
    }

    /// Flag recorded for `key`, if a task with that key ran.
    pub fn succeeded(&self, key: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, ok)| *ok)
    }

    /// `Err(LoadFailed)` carrying the rendered report if any task failed.
    pub fn into_result(self) -> loadchain_shared::Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(LoadchainError::LoadFailed {
                report: self.to_string(),
            })
        }
    }
}

impl Display for LoadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, ok) in &self.entries {
            writeln!(f, "{key}: {ok}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Handler that runs its loader tasks before delegating to `handler`.
#[derive(Clone)]
pub struct Loader {
    handler: BoxHandler,
    tasks: Arc<[LoaderTask]>,
}

impl Loader {
    /// The effective task list is `scope`'s default loaders followed by
    /// `tasks`.
    pub fn new(
        scope: &Scope,
        handler: BoxHandler,
        tasks: impl IntoIterator<Item = LoaderTask>,
    ) -> Self {
        let mut all = scope.default_loaders();
        all.extend(tasks);
        Self {
            handler,
            tasks: all.into(),
        }
    }

    /// [`new`](Self::new) for an async closure handler.
    pub fn from_fn<F, Fut>(
        scope: &Scope,
        handler: F,
        tasks: impl IntoIterator<Item = LoaderTask>,
    ) -> Self
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(scope, handler_fn(handler), tasks)
    }

    pub fn tasks(&self) -> &[LoaderTask] {
        &self.tasks
    }

    /// Run every task and collect results without invoking anything.
    ///
    /// Returns the scope enriched with every successful result, and the
    /// report covering all tasks.
    #[instrument(skip_all, fields(tasks = self.tasks.len()))]
    pub async fn load(&self, scope: Scope) -> (Scope, LoadReport) {
        let started: Vec<(Completion, ScopeKey)> = self
            .tasks
            .iter()
            .map(|task| {
                debug!(key = %task.key(), "starting loader task");
                task.start(&scope)
            })
            .collect();

        let mut enriched = scope;
        let mut report = LoadReport::default();
        for (completion, key) in started {
            match completion.wait().await {
                LoadOutcome::Success(value) => {
                    debug!(%key, "loader task succeeded");
                    enriched = enriched.derive_value(key.clone(), value);
                    report.push(key, true);
                }
                LoadOutcome::Failure => {
                    debug!(%key, "loader task failed");
                    report.push(key, false);
                }
            }
        }

        (enriched, report)
    }
}

impl Handler for Loader {
    fn serve(&self, scope: Scope) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let (scope, report) = self.load(scope).await;
            if report.is_success() {
                self.handler.serve(scope).await;
            } else {
                scope.error_policy().invoke(&scope, &report);
            }
        })
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader").field("tasks", &self.tasks).finish()
    }
}
