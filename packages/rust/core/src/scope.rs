//! Immutable, derivable request scope.
//!
//! A [`Scope`] is a singly-linked chain of bindings. Every `with_*` / `derive`
//! call pushes one node in front of the current head and returns a new scope;
//! the parent is never touched, so a scope can be shared freely between
//! concurrently running loader tasks.
//!
//! Core bindings (request, response sink, error policy, defaults, scope
//! creator) have typed accessors. Loader results live under caller-chosen
//! [`ScopeKey`]s and are read back with [`Scope::get`].

use std::any::Any;
use std::sync::Arc;

use loadchain_shared::{LoadchainError, Request, RequestId, Result, ScopeConfig, ScopeKey};

use crate::creator::{ScopeCreator, request_id_creator};
use crate::handler::Stage;
use crate::loader::LoaderTask;
use crate::policy::ErrorPolicy;
use crate::respond::ResponseSink;

/// Value bound under a [`ScopeKey`].
pub type ScopeValue = Arc<dyn Any + Send + Sync>;

const READ_ONLY_WRITE: &str = "attempted write on read-only scope";

enum Binding {
    Request(Arc<Request>),
    /// `None` marks a read-only derivation.
    Sink(Option<Arc<dyn ResponseSink>>),
    RequestId(RequestId),
    ErrorPolicy(ErrorPolicy),
    DefaultLoaders(Arc<[LoaderTask]>),
    DefaultStages(Arc<[Stage]>),
    ScopeCreator(ScopeCreator),
    /// A scope creator has already run for this request.
    Created,
    Value(ScopeKey, ScopeValue),
}

struct Node {
    binding: Binding,
    parent: Option<Arc<Node>>,
}

/// Immutable per-request context. Cloning is O(1).
#[derive(Clone, Default)]
pub struct Scope {
    head: Option<Arc<Node>>,
}

impl Scope {
    /// Empty root scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Root scope configured from runtime settings: error policy and, when
    /// requested, the request-id scope creator.
    pub fn from_config(config: &ScopeConfig) -> Self {
        let policy = if config.expose_report {
            ErrorPolicy::expose_report(config.error_status)
        } else {
            ErrorPolicy::generic(config.error_status, config.error_message.clone())
        };
        let scope = Self::new().with_error_policy(policy);
        if config.tag_requests {
            scope.with_scope_creator(request_id_creator())
        } else {
            scope
        }
    }

    fn push(&self, binding: Binding) -> Self {
        Self {
            head: Some(Arc::new(Node {
                binding,
                parent: self.head.clone(),
            })),
        }
    }

    /// Bindings from the most recent derivation toward the root.
    fn bindings(&self) -> impl Iterator<Item = &Binding> {
        std::iter::successors(self.head.as_deref(), |node| node.parent.as_deref())
            .map(|node| &node.binding)
    }

    fn find<T>(&self, pick: impl FnMut(&Binding) -> Option<T>) -> Option<T> {
        self.bindings().find_map(pick)
    }

    /// Number of derivations between this scope and the root.
    pub fn depth(&self) -> usize {
        self.bindings().count()
    }

    // -----------------------------------------------------------------------
    // Generic values
    // -----------------------------------------------------------------------

    /// Derive a scope in which `key` resolves to `value`.
    pub fn derive<T: Any + Send + Sync>(&self, key: impl Into<ScopeKey>, value: T) -> Self {
        self.derive_value(key.into(), Arc::new(value))
    }

    /// Like [`derive`](Self::derive) for an already type-erased value.
    pub fn derive_value(&self, key: ScopeKey, value: ScopeValue) -> Self {
        self.push(Binding::Value(key, value))
    }

    /// Nearest value bound under `key`, if any.
    pub fn lookup(&self, key: &str) -> Option<ScopeValue> {
        self.find(|binding| match binding {
            Binding::Value(k, v) if k.as_str() == key => Some(Arc::clone(v)),
            _ => None,
        })
    }

    /// Typed read of the nearest value under `key`.
    ///
    /// Returns `None` when the key is absent or the nearest binding holds a
    /// different type; shadowed bindings further up are not consulted.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.lookup(key)?.downcast::<T>().ok()
    }

    /// Keys of all value bindings, nearest first. Shadowed keys appear once.
    pub fn keys(&self) -> Vec<ScopeKey> {
        let mut keys: Vec<ScopeKey> = Vec::new();
        for binding in self.bindings() {
            if let Binding::Value(k, _) = binding {
                if !keys.contains(k) {
                    keys.push(k.clone());
                }
            }
        }
        keys
    }

    // -----------------------------------------------------------------------
    // Request, sink, request id
    // -----------------------------------------------------------------------

    /// Request scope: binds the inbound request and the response sink.
    pub fn for_request(&self, request: Request, sink: Arc<dyn ResponseSink>) -> Self {
        self.push(Binding::Request(Arc::new(request)))
            .push(Binding::Sink(Some(sink)))
    }

    pub fn request(&self) -> Option<Arc<Request>> {
        self.find(|binding| match binding {
            Binding::Request(r) => Some(Arc::clone(r)),
            _ => None,
        })
    }

    /// The response sink, or a misuse error when it was cleared by
    /// [`with_read_only`](Self::with_read_only) or never bound.
    pub fn try_sink(&self) -> Result<Arc<dyn ResponseSink>> {
        match self.find(|binding| match binding {
            Binding::Sink(s) => Some(s.clone()),
            _ => None,
        }) {
            Some(Some(sink)) => Ok(sink),
            Some(None) => Err(LoadchainError::misuse(READ_ONLY_WRITE)),
            None => Err(LoadchainError::misuse("no response sink bound to scope")),
        }
    }

    /// The response sink.
    ///
    /// # Panics
    ///
    /// Panics when the sink is absent. Writing from a read-only scope is a
    /// bug in the calling handler.
    pub fn sink(&self) -> Arc<dyn ResponseSink> {
        match self.try_sink() {
            Ok(sink) => sink,
            Err(err) => panic!("{err}"),
        }
    }

    /// Derive a scope whose sink is cleared. All other lookups are unchanged.
    pub fn with_read_only(&self) -> Self {
        self.push(Binding::Sink(None))
    }

    pub fn is_read_only(&self) -> bool {
        matches!(
            self.find(|binding| match binding {
                Binding::Sink(s) => Some(s.is_none()),
                _ => None,
            }),
            Some(true)
        )
    }

    pub fn with_request_id(&self, id: RequestId) -> Self {
        self.push(Binding::RequestId(id))
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.find(|binding| match binding {
            Binding::RequestId(id) => Some(*id),
            _ => None,
        })
    }

    // -----------------------------------------------------------------------
    // Error policy
    // -----------------------------------------------------------------------

    /// Replace the error policy for this scope and its derivations.
    pub fn with_error_policy(&self, policy: ErrorPolicy) -> Self {
        self.push(Binding::ErrorPolicy(policy))
    }

    /// The nearest error policy, or the generic 500 policy.
    pub fn error_policy(&self) -> ErrorPolicy {
        self.find(|binding| match binding {
            Binding::ErrorPolicy(p) => Some(p.clone()),
            _ => None,
        })
        .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Defaults
    // -----------------------------------------------------------------------

    /// Append stages to the default pipeline. Existing defaults are kept and
    /// stay in front.
    pub fn with_default_stages(&self, stages: impl IntoIterator<Item = Stage>) -> Self {
        let mut all = self.default_stages();
        all.extend(stages);
        self.push(Binding::DefaultStages(all.into()))
    }

    pub fn default_stages(&self) -> Vec<Stage> {
        self.find(|binding| match binding {
            Binding::DefaultStages(s) => Some(s.to_vec()),
            _ => None,
        })
        .unwrap_or_default()
    }

    /// Append tasks to the default loader list. Existing defaults are kept
    /// and stay in front.
    pub fn with_default_loaders(&self, tasks: impl IntoIterator<Item = LoaderTask>) -> Self {
        let mut all = self.default_loaders();
        all.extend(tasks);
        self.push(Binding::DefaultLoaders(all.into()))
    }

    pub fn default_loaders(&self) -> Vec<LoaderTask> {
        self.find(|binding| match binding {
            Binding::DefaultLoaders(t) => Some(t.to_vec()),
            _ => None,
        })
        .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Scope creator
    // -----------------------------------------------------------------------

    /// Replace the scope creator.
    pub fn with_scope_creator(&self, creator: ScopeCreator) -> Self {
        self.push(Binding::ScopeCreator(creator))
    }

    pub fn scope_creator(&self) -> Option<ScopeCreator> {
        self.find(|binding| match binding {
            Binding::ScopeCreator(c) => Some(c.clone()),
            _ => None,
        })
    }

    /// True once a scope creator has run on this request scope.
    pub fn is_created(&self) -> bool {
        self.bindings().any(|b| matches!(b, Binding::Created))
    }

    /// Run this scope's own creator, at most once per request.
    pub fn created(self) -> Self {
        let creator = self.scope_creator();
        self.run_scope_creator(creator.as_ref())
    }

    /// Run `creator` unless one already ran on this scope.
    pub(crate) fn run_scope_creator(self, creator: Option<&ScopeCreator>) -> Self {
        match creator {
            Some(creator) if !self.is_created() => creator.apply(self).push(Binding::Created),
            _ => self,
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("depth", &self.depth())
            .field("keys", &self.keys())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::respond::RecordingSink;

    fn sink() -> Arc<dyn ResponseSink> {
        Arc::new(RecordingSink::new())
    }

    #[test]
    fn nearest_binding_wins() {
        let root = Scope::new().derive("user", 1u32);
        let child = root.derive("user", 2u32);

        assert_eq!(child.get::<u32>("user").as_deref(), Some(&2));
        assert_eq!(root.get::<u32>("user").as_deref(), Some(&1));
        assert_eq!(child.depth(), 2);
    }

    #[test]
    fn absent_key_is_none() {
        let scope = Scope::new().derive("user", 1u32);
        assert!(scope.lookup("perms").is_none());
        assert!(scope.get::<u32>("perms").is_none());
        assert!(scope.request().is_none());
        assert!(scope.request_id().is_none());
    }

    #[test]
    fn wrong_type_is_none() {
        let scope = Scope::new().derive("user", "alice".to_string());
        assert!(scope.get::<u32>("user").is_none());
        assert_eq!(scope.get::<String>("user").as_deref().map(String::as_str), Some("alice"));
    }

    #[test]
    fn keys_are_deduplicated_nearest_first() {
        let scope = Scope::new()
            .derive("a", 1u8)
            .derive("b", 2u8)
            .derive("a", 3u8);
        assert_eq!(scope.keys(), vec![ScopeKey::from("a"), ScopeKey::from("b")]);
    }

    #[test]
    fn read_only_clears_sink_only() {
        let scope = Scope::new()
            .for_request(Request::new("GET", "/"), sink())
            .derive("user", 42u64);
        assert!(scope.try_sink().is_ok());

        let ro = scope.with_read_only();
        assert!(ro.is_read_only());
        assert!(matches!(ro.try_sink(), Err(e) if e.is_misuse()));
        assert_eq!(ro.get::<u64>("user").as_deref(), Some(&42));
        assert_eq!(ro.request().map(|r| r.path.clone()).as_deref(), Some("/"));

        // The parent keeps its sink.
        assert!(scope.try_sink().is_ok());
    }

    #[test]
    #[should_panic(expected = "attempted write on read-only scope")]
    fn sink_panics_on_read_only() {
        let scope = Scope::new()
            .for_request(Request::new("GET", "/"), sink())
            .with_read_only();
        let _ = scope.sink();
    }

    #[test]
    fn missing_sink_is_misuse() {
        let err = Scope::new().try_sink().err().expect("no sink bound");
        assert!(err.is_misuse());
        assert!(!Scope::new().is_read_only());
    }

    #[test]
    fn defaults_append_in_registration_order() {
        let a = LoaderTask::ready("a", 1u8);
        let b = LoaderTask::ready("b", 2u8);
        let c = LoaderTask::ready("c", 3u8);

        let base = Scope::new().with_default_loaders([a]);
        let more = base.with_default_loaders([b, c]);

        let keys: Vec<_> = more
            .default_loaders()
            .iter()
            .map(|t| t.key().to_string())
            .collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(base.default_loaders().len(), 1);
    }

    #[test]
    fn default_stages_accumulate() {
        let s = Stage::new(|next| next);
        let base = Scope::new().with_default_stages([s.clone()]);
        let more = base.with_default_stages([s.clone(), s]);
        assert_eq!(base.default_stages().len(), 1);
        assert_eq!(more.default_stages().len(), 3);
    }

    #[test]
    fn scope_creator_runs_once() {
        let creator = ScopeCreator::new(|scope: Scope| {
            let n = scope.get::<u32>("runs").map(|v| *v).unwrap_or(0);
            scope.derive("runs", n + 1)
        });
        let scope = Scope::new().with_scope_creator(creator.clone());

        let once = scope.created();
        let twice = once.clone().created().run_scope_creator(Some(&creator));
        assert!(twice.is_created());
        assert_eq!(twice.get::<u32>("runs").as_deref(), Some(&1));
    }

    #[test]
    fn created_without_creator_is_unchanged() {
        let scope = Scope::new().derive("x", 1u8);
        let created = scope.clone().created();
        assert!(!created.is_created());
        assert_eq!(created.depth(), scope.depth());
    }

    #[test]
    fn from_config_installs_request_ids() {
        let scope = Scope::from_config(&ScopeConfig::default());
        assert!(scope.scope_creator().is_some());

        let request = scope.for_request(Request::new("GET", "/"), sink()).created();
        assert!(request.request_id().is_some());

        let untagged = Scope::from_config(&ScopeConfig {
            tag_requests: false,
            ..ScopeConfig::default()
        });
        assert!(untagged.scope_creator().is_none());
    }
}
