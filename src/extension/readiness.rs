//! Named path sets published by extensions.

use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8PathBuf;
use tracing::debug;

/// Shared board on which extensions announce the paths that mark them ready.
///
/// A dependency publishes its install outputs under its own name; anything
/// that needs the dependency adds those paths as step inputs, which makes the
/// scheduler wait for them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessBoard {
    entries: BTreeMap<String, BTreeSet<Utf8PathBuf>>,
}

impl ReadinessBoard {
    /// Empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the paths published under `name`.
    pub fn publish<I, P>(&mut self, name: impl Into<String>, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        let key: String = name.into();
        let set: BTreeSet<Utf8PathBuf> = paths.into_iter().map(Into::into).collect();
        debug!(name = %key, count = set.len(), "published readiness paths");
        self.entries.insert(key, set);
    }

    /// Paths to depend on before using `name`, if it published any.
    #[must_use]
    pub fn wait_for(&self, name: &str) -> Option<&BTreeSet<Utf8PathBuf>> {
        self.entries.get(name)
    }

    /// Names that have published paths.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
