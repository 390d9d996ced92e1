//! Selection filter applied when samples are ingested.

use std::collections::BTreeSet;

/// The set of keys the operator chose to publish.
///
/// An empty selection accepts every key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySelection {
    selected: BTreeSet<String>,
}

impl KeySelection {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            selected: keys.into_iter().collect(),
        }
    }

    /// Accept everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn accept(&self, key: &str) -> bool {
        self.selected.is_empty() || self.selected.contains(key)
    }

    pub fn is_all(&self) -> bool {
        self.selected.is_empty()
    }
}
