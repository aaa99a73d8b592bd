//! Scope creator hooks.
//!
//! A creator rewrites the request scope right after the request and sink are
//! bound, before any stage or loader sees it. Hosts use it to splice in their
//! own execution context; which creator runs is chosen when the base scope is
//! built, not at compile time.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use loadchain_shared::RequestId;

use crate::scope::Scope;

/// Header carrying an upstream request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// `(Scope) -> Scope` hook applied once per request.
#[derive(Clone)]
pub struct ScopeCreator(Arc<dyn Fn(Scope) -> Scope + Send + Sync>);

impl ScopeCreator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Scope) -> Scope + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn apply(&self, scope: Scope) -> Scope {
        (self.0)(scope)
    }

    /// Run `self`, then `next` on its output.
    pub fn then(self, next: ScopeCreator) -> Self {
        Self::new(move |scope| next.apply(self.apply(scope)))
    }
}

impl std::fmt::Debug for ScopeCreator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ScopeCreator")
    }
}

/// Tag each request scope with a [`RequestId`].
///
/// Reuses a well-formed `x-request-id` header from upstream; otherwise
/// generates a fresh UUID v7.
pub fn request_id_creator() -> ScopeCreator {
    ScopeCreator::new(|scope| {
        let upstream = scope
            .request()
            .and_then(|r| r.header(REQUEST_ID_HEADER).map(str::to_owned))
            .and_then(|h| Uuid::parse_str(&h).ok())
            .map(RequestId);
        let id = upstream.unwrap_or_default();
        debug!(request_id = %id, "tagged request scope");
        scope.with_request_id(id)
    })
}
