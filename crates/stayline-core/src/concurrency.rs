//! Request-scoped bridge between opaque version tokens (`If-Match` / `ETag`)
//! and the expected/next versions used by the aggregate store.

use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct Versions {
    expected: Option<i64>,
    next: Option<i64>,
}

/// Holds the expected version supplied by a caller and the next version
/// produced by a successful write.
///
/// Clones share state, so the HTTP layer can keep one handle while the
/// aggregate store writes through another.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyContext {
    versions: Arc<Mutex<Versions>>,
}

impl ConcurrencyContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context from an `If-Match` style token. A missing or
    /// unparsable token yields no expected version.
    #[must_use]
    pub fn from_if_match(token: Option<&str>) -> Self {
        let context = Self::new();
        if let Some(version) = token.and_then(parse_version_token) {
            context.set_expected_version(version);
        }
        context
    }

    /// The version the caller expects the stream to be at.
    #[must_use]
    pub fn expected_version(&self) -> Option<i64> {
        self.lock().expected
    }

    /// Sets the expected version.
    pub fn set_expected_version(&self, version: i64) {
        self.lock().expected = Some(version);
    }

    /// The version produced by the last successful write.
    #[must_use]
    pub fn next_version(&self) -> Option<i64> {
        self.lock().next
    }

    /// Records the version produced by a write.
    pub fn set_next_version(&self, version: i64) {
        self.lock().next = Some(version);
    }

    /// Renders the next version as an `ETag` value, if a write happened.
    #[must_use]
    pub fn next_etag(&self) -> Option<String> {
        self.next_version().map(etag)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Versions> {
        self.versions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parses `"3"`, `W/"3"` or `3` into a version.
#[must_use]
pub fn parse_version_token(token: &str) -> Option<i64> {
    let token = token.trim();
    let token = token.strip_prefix("W/").unwrap_or(token);
    let token = token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token);
    token.parse::<i64>().ok().filter(|version| *version >= 0)
}

/// Renders a version as a weak `ETag`.
#[must_use]
pub fn etag(version: i64) -> String {
    format!("W/\"{version}\"")
}
