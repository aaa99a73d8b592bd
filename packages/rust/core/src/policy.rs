//! What happens when a load fails.

use std::sync::Arc;

use tracing::warn;

use loadchain_shared::status;

use crate::loader::LoadReport;
use crate::respond;
use crate::scope::Scope;

/// `(Scope, report)` hook invoked instead of the handler when any loader
/// task fails. Carried by the scope; the nearest binding wins.
#[derive(Clone)]
pub struct ErrorPolicy(Arc<dyn Fn(&Scope, &LoadReport) + Send + Sync>);

impl ErrorPolicy {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Scope, &LoadReport) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn invoke(&self, scope: &Scope, report: &LoadReport) {
        (self.0)(scope, report)
    }

    /// Log the report, reply with a fixed message. Nothing about which
    /// loader failed reaches the client.
    pub fn generic(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(move |scope, report| {
            log_failure(scope, report);
            respond::error(scope, &message, code);
        })
    }

    /// Reply with the full report as the body.
    pub fn expose_report(code: u16) -> Self {
        Self::new(move |scope, report| {
            log_failure(scope, report);
            respond::error(scope, &report.to_string(), code);
        })
    }
}

fn log_failure(scope: &Scope, report: &LoadReport) {
    warn!(
        failed = ?report.failed_keys(),
        request_id = ?scope.request_id(),
        report = %report,
        "load failed"
    );
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::generic(status::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }
}

impl std::fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ErrorPolicy")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::respond::{RecordingSink, Response};
    use loadchain_shared::Request;

    fn failed_report() -> LoadReport {
        let mut report = LoadReport::default();
        report.push("user".into(), false);
        report.push("perms".into(), true);
        report
    }

    #[test]
    fn default_policy_hides_report() {
        let sink = Arc::new(RecordingSink::new());
        let scope = Scope::new().for_request(Request::new("GET", "/"), sink.clone());

        ErrorPolicy::default().invoke(&scope, &failed_report());

        assert_eq!(
            sink.responses(),
            vec![Response::Error {
                message: "Internal Server Error".into(),
                status: 500
            }]
        );
    }

    #[test]
    fn expose_report_writes_every_key() {
        let sink = Arc::new(RecordingSink::new());
        let scope = Scope::new().for_request(Request::new("GET", "/"), sink.clone());

        ErrorPolicy::expose_report(503).invoke(&scope, &failed_report());

        assert_eq!(
            sink.responses(),
            vec![Response::Error {
                message: "user: false\nperms: true\n".into(),
                status: 503
            }]
        );
    }
}
