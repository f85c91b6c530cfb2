//! Multi-select state for bulk actions.

use std::collections::{BTreeSet, HashSet};

/// Ids of items marked for a bulk action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    ids: BTreeSet<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip `id` and return whether it is now selected.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        }
    }

    /// Replace the selection with exactly `ids`.
    pub fn select_all<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = ids.into_iter().map(Into::into).collect();
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    /// Drop ids that are no longer visible. Returns how many were dropped.
    pub fn retain_visible(&mut self, visible: &HashSet<String>) -> usize {
        let before = self.ids.len();
        self.ids.retain(|id| visible.contains(id));
        before - self.ids.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    /// Empty the set, returning what it held.
    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.ids).into_iter().collect()
    }
}
