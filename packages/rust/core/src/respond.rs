//! Response-writing collaborator.
//!
//! The engine never formats HTTP itself. Transport adapters implement
//! [`ResponseSink`]; handlers and error policies reach it through the scope.

use std::sync::{Mutex, PoisonError};

use loadchain_shared::Request;

use crate::scope::Scope;

/// Host-provided response writer for one request.
pub trait ResponseSink: Send + Sync {
    /// Reply with a plain-text error message and status.
    fn write_error(&self, message: &str, status: u16);

    /// Reply with a redirect to `target`, which may be relative to the
    /// request path.
    fn write_redirect(&self, request: Option<&Request>, target: &str, status: u16);
}

/// Write an error through the scope's sink.
///
/// # Panics
///
/// Panics on a read-only scope, see [`Scope::sink`].
pub fn error(scope: &Scope, message: &str, status: u16) {
    scope.sink().write_error(message, status);
}

/// Write a redirect through the scope's sink.
///
/// # Panics
///
/// Panics on a read-only scope, see [`Scope::sink`].
pub fn redirect(scope: &Scope, target: &str, status: u16) {
    let request = scope.request();
    scope
        .sink()
        .write_redirect(request.as_deref(), target, status);
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// One write captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Error {
        message: String,
        status: u16,
    },
    Redirect {
        /// Path of the request being redirected, when known.
        from: Option<String>,
        target: String,
        status: u16,
    },
}

/// In-memory sink that records every write. Used by tests and the CLI.
#[derive(Debug, Default)]
pub struct RecordingSink {
    writes: Mutex<Vec<Response>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all writes so far, in order.
    pub fn responses(&self) -> Vec<Response> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, response: Response) {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(response);
    }
}

impl ResponseSink for RecordingSink {
    fn write_error(&self, message: &str, status: u16) {
        self.record(Response::Error {
            message: message.to_owned(),
            status,
        });
    }

    fn write_redirect(&self, request: Option<&Request>, target: &str, status: u16) {
        self.record(Response::Redirect {
            from: request.map(|r| r.path.clone()),
            target: target.to_owned(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadchain_shared::status;
    use std::sync::Arc;

    #[test]
    fn redirect_carries_request() {
        let sink = Arc::new(RecordingSink::new());
        let scope = Scope::new().for_request(Request::new("GET", "/old"), sink.clone());

        redirect(&scope, "/new", status::SEE_OTHER);
        error(&scope, "gone", 410);

        assert_eq!(
            sink.responses(),
            vec![
                Response::Redirect {
                    from: Some("/old".into()),
                    target: "/new".into(),
                    status: 303,
                },
                Response::Error {
                    message: "gone".into(),
                    status: 410,
                },
            ]
        );
    }

    #[test]
    #[should_panic(expected = "read-only")]
    fn error_on_read_only_scope_panics() {
        let sink = Arc::new(RecordingSink::new());
        let scope = Scope::new()
            .for_request(Request::new("GET", "/"), sink)
            .with_read_only();
        error(&scope, "nope", 500);
    }
}
