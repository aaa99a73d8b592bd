//! Request-scoped execution engine for loadchain.
//!
//! This crate provides:
//! - [`Scope`] — immutable, derivable per-request context
//! - [`Chain`] — middleware composition around a terminal handler
//! - [`Loader`] — parallel fan-out/fan-in of keyed loader tasks
//! - [`ScopeCreator`] — per-request hook for host execution context
//! - [`respond`] — the response-sink collaborator

pub mod chain;
pub mod creator;
pub mod handler;
pub mod loader;
pub mod policy;
pub mod respond;
pub mod scope;

pub use chain::Chain;
pub use creator::{REQUEST_ID_HEADER, ScopeCreator, request_id_creator};
pub use handler::{BoxHandler, Handler, HandlerFn, Stage, handler_fn, serve_request};
pub use loader::{Completer, Completion, LoadOutcome, LoadReport, Loader, LoaderTask};
pub use policy::ErrorPolicy;
pub use respond::{RecordingSink, Response, ResponseSink};
pub use scope::{Scope, ScopeValue};
