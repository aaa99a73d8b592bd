//! Handlers, middleware stages, and the request entry point.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::instrument;

use loadchain_shared::Request;

use crate::respond::ResponseSink;
use crate::scope::Scope;

/// Something that serves a request given its scope.
///
/// Handlers never return errors: failures are written to the response sink
/// (directly or through the scope's error policy).
pub trait Handler: Send + Sync {
    fn serve(&self, scope: Scope) -> BoxFuture<'_, ()>;
}

/// Shared, type-erased handler. Stages consume and produce these.
pub type BoxHandler = Arc<dyn Handler>;

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn serve(&self, scope: Scope) -> BoxFuture<'_, ()> {
        (**self).serve(scope)
    }
}

/// Adapter turning an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Scope) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn serve(&self, scope: Scope) -> BoxFuture<'_, ()> {
        Box::pin((self.0)(scope))
    }
}

/// Wrap an async closure as a shared handler.
pub fn handler_fn<F, Fut>(f: F) -> BoxHandler
where
    F: Fn(Scope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// A middleware unit: turns the next handler into a wrapping handler.
#[derive(Clone)]
pub struct Stage(Arc<dyn Fn(BoxHandler) -> BoxHandler + Send + Sync>);

impl Stage {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(BoxHandler) -> BoxHandler + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Build a stage from an async closure that receives the scope and the
    /// next handler, and decides whether and how to call it.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Scope, BoxHandler) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |next: BoxHandler| {
            let f = Arc::clone(&f);
            handler_fn(move |scope| (*f)(scope, Arc::clone(&next)))
        })
    }

    /// Wrap `next` with this stage.
    pub fn wrap(&self, next: BoxHandler) -> BoxHandler {
        (self.0)(next)
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Stage")
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Serve one request: derive the request scope from `base`, run the scope
/// creator, then hand the scope to `handler`.
///
/// This is the seam a transport adapter calls once per inbound request.
#[instrument(skip_all, fields(method = %request.method, path = %request.path))]
pub async fn serve_request(
    base: &Scope,
    handler: &dyn Handler,
    request: Request,
    sink: Arc<dyn ResponseSink>,
) {
    let scope = base.for_request(request, sink).created();
    handler.serve(scope).await;
}
