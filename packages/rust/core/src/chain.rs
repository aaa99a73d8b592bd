//! Middleware composition.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::creator::ScopeCreator;
use crate::handler::{BoxHandler, Handler, Stage, handler_fn};
use crate::scope::Scope;

/// An ordered list of stages, ready to wrap a terminal handler.
///
/// Stage 0 is outermost: it sees the request first and the response last.
#[derive(Clone, Debug)]
pub struct Chain {
    creator: Option<ScopeCreator>,
    stages: Arc<[Stage]>,
}

impl Chain {
    /// The effective stage list is `scope`'s default stages followed by
    /// `stages`. The scope's creator, if any, is captured here and applied
    /// to every request scope the built handler receives.
    pub fn new(scope: &Scope, stages: impl IntoIterator<Item = Stage>) -> Self {
        let mut all = scope.default_stages();
        all.extend(stages);
        Self {
            creator: scope.scope_creator(),
            stages: all.into(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// A new chain with `stages` appended after the current ones.
    pub fn append(&self, stages: impl IntoIterator<Item = Stage>) -> Self {
        let mut all = self.stages.to_vec();
        all.extend(stages);
        Self {
            creator: self.creator.clone(),
            stages: all.into(),
        }
    }

    /// Wrap `handler` in every stage, last stage innermost.
    ///
    /// Safe to call many times on the same chain.
    pub fn then(&self, handler: BoxHandler) -> BoxHandler {
        let inner = self
            .stages
            .iter()
            .rev()
            .fold(handler, |next, stage| stage.wrap(next));
        Arc::new(ChainHandler {
            creator: self.creator.clone(),
            inner,
        })
    }

    /// [`then`](Self::then) for an async closure.
    pub fn then_fn<F, Fut>(&self, handler: F) -> BoxHandler
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.then(handler_fn(handler))
    }
}

struct ChainHandler {
    creator: Option<ScopeCreator>,
    inner: BoxHandler,
}

impl Handler for ChainHandler {
    fn serve(&self, scope: Scope) -> BoxFuture<'_, ()> {
        let scope = scope.run_scope_creator(self.creator.as_ref());
        self.inner.serve(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::serve_request;
    use crate::loader::{Loader, LoaderTask};
    use crate::respond::RecordingSink;
    use loadchain_shared::Request;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Stage that logs `name>` on the way in and `<name` on the way out.
    fn logging_stage(name: &'static str, log: &Log) -> Stage {
        let log = Arc::clone(log);
        Stage::from_fn(move |scope: Scope, next: BoxHandler| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("{name}>"));
                next.serve(scope).await;
                log.lock().unwrap().push(format!("<{name}"));
            }
        })
    }

    fn terminal(log: &Log) -> BoxHandler {
        let log = Arc::clone(log);
        handler_fn(move |_| {
            let log = Arc::clone(&log);
            async move { log.lock().unwrap().push("handler".into()) }
        })
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn first_stage_is_outermost() {
        let log: Log = Arc::default();
        let chain = Chain::new(
            &Scope::new(),
            [logging_stage("a", &log), logging_stage("b", &log)],
        );

        chain.then(terminal(&log)).serve(Scope::new()).await;

        assert_eq!(entries(&log), ["a>", "b>", "handler", "<b", "<a"]);
    }

    #[tokio::test]
    async fn composing_equals_manual_nesting() {
        let composed: Log = Arc::default();
        let manual: Log = Arc::default();

        let stages = |log: &Log| {
            vec![
                logging_stage("s1", log),
                logging_stage("s2", log),
                logging_stage("s3", log),
            ]
        };

        Chain::new(&Scope::new(), stages(&composed))
            .then(terminal(&composed))
            .serve(Scope::new())
            .await;

        let [s1, s2, s3] = <[Stage; 3]>::try_from(stages(&manual)).unwrap();
        s1.wrap(s2.wrap(s3.wrap(terminal(&manual))))
            .serve(Scope::new())
            .await;

        assert_eq!(entries(&composed), entries(&manual));
    }

    #[tokio::test]
    async fn default_stages_precede_supplied() {
        let log: Log = Arc::default();
        let base = Scope::new()
            .with_default_stages([logging_stage("d1", &log)])
            .with_default_stages([logging_stage("d2", &log)]);
        let chain = Chain::new(&base, [logging_stage("own", &log)])
            .append([logging_stage("late", &log)]);

        chain.then(terminal(&log)).serve(Scope::new()).await;

        assert_eq!(
            entries(&log),
            ["d1>", "d2>", "own>", "late>", "handler", "<late", "<own", "<d2", "<d1"]
        );
    }

    #[tokio::test]
    async fn then_can_be_called_repeatedly() {
        let log: Log = Arc::default();
        let chain = Chain::new(&Scope::new(), [logging_stage("a", &log)]);

        let first = chain.then(terminal(&log));
        let second = chain.then_fn(|_| async {});
        second.serve(Scope::new()).await;
        first.serve(Scope::new()).await;

        assert_eq!(entries(&log), ["a>", "<a", "a>", "handler", "<a"]);
    }

    #[tokio::test]
    async fn chain_applies_creator_once_before_stages() {
        let runs = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&runs);
        let creator = ScopeCreator::new(move |scope: Scope| {
            *counter.lock().unwrap() += 1;
            scope.derive("tenant", "acme")
        });
        let base = Scope::new().with_scope_creator(creator);

        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let stage = Stage::from_fn(move |scope: Scope, next: BoxHandler| {
            let slot = Arc::clone(&slot);
            async move {
                *slot.lock().unwrap() = scope.get::<&'static str>("tenant").map(|t| *t);
                next.serve(scope).await;
            }
        });
        let handler = Chain::new(&base, [stage]).then_fn(|_| async {});

        // Entering through the adapter applies the creator; the chain must not
        // run it a second time.
        let sink = Arc::new(RecordingSink::new());
        serve_request(&base, &*handler, Request::new("GET", "/"), sink).await;

        assert_eq!(*runs.lock().unwrap(), 1);
        assert_eq!(*seen.lock().unwrap(), Some("acme"));
    }

    #[tokio::test]
    async fn chain_wrapping_loader() {
        let log: Log = Arc::default();
        let base = Scope::new();
        let done = Arc::clone(&log);
        let loader = Loader::from_fn(
            &base,
            move |scope: Scope| {
                let done = Arc::clone(&done);
                async move {
                    let user = scope.get::<u32>("user").map(|u| *u).unwrap_or_default();
                    done.lock().unwrap().push(format!("user={user}"));
                }
            },
            [LoaderTask::spawn("user", |_| async { Some(42u32) })],
        );
        let handler = Chain::new(&base, [logging_stage("auth", &log)]).then(Arc::new(loader));

        let sink = Arc::new(RecordingSink::new());
        serve_request(&base, &*handler, Request::new("GET", "/me"), sink.clone()).await;

        assert_eq!(entries(&log), ["auth>", "user=42", "<auth"]);
        assert!(sink.responses().is_empty());
    }
}
