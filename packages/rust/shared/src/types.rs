//! Plain data types shared between the engine and its adapters.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard HTTP status codes used by the default policies.
pub mod status {
    pub const SEE_OTHER: u16 = 303;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;

    /// True for 4xx and 5xx codes.
    pub fn is_error(code: u16) -> bool {
        (400..600).contains(&code)
    }
}

// ---------------------------------------------------------------------------
// ScopeKey
// ---------------------------------------------------------------------------

/// Key under which a loader result is bound in a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeKey(Cow<'static, str>);

impl ScopeKey {
    /// Key from a static string, usable in `const` position.
    pub const fn from_static(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for ScopeKey {
    fn from(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }
}

impl From<String> for ScopeKey {
    fn from(key: String) -> Self {
        Self(Cow::Owned(key))
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one request (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// The inbound request as seen by handlers.
///
/// Transport adapters translate their native request into this shape before
/// building a request scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// HTTP method, upper case.
    pub method: String,
    /// Request path, including any query string.
    pub path: String,
    /// Header map. Names are stored lower case.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Builder-style header insertion.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_key_display_and_eq() {
        let a = ScopeKey::from("user");
        let b = ScopeKey::from(String::from("user"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "user");
        const PERMS: ScopeKey = ScopeKey::from_static("perms");
        assert_eq!(PERMS.as_str(), "perms");
    }

    #[test]
    fn request_headers_are_case_insensitive() {
        let req = Request::new("get", "/users/42").with_header("X-Trace", "abc");
        assert_eq!(req.method, "GET");
        assert_eq!(req.header("x-trace"), Some("abc"));
        assert_eq!(req.header("X-TRACE"), Some("abc"));
        assert_eq!(req.header("missing"), None);
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn status_classes() {
        assert!(status::is_error(404));
        assert!(status::is_error(status::INTERNAL_SERVER_ERROR));
        assert!(!status::is_error(status::SEE_OTHER));
        assert!(!status::is_error(600));
    }

    #[test]
    fn request_serializes() {
        let req = Request::new("POST", "/login").with_header("Host", "example.com");
        let json = serde_json::to_string(&req).expect("serialize");
        let back: Request = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, req);
    }
}
