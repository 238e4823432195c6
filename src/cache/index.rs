//! Tag Index
//!
//! Reverse index from tag to member keys, plus the forward key -> tags map
//! needed to detach a key from all of its tags. The index only records
//! associations; it never keeps an entry alive, and members whose entries
//! have expired are dropped by the store's maintenance pass.

use dashmap::DashMap;
use indexmap::IndexSet;

/// Tag <-> key associations
#[derive(Debug, Default)]
pub struct TagIndex {
    by_tag: DashMap<String, IndexSet<String>>,
    by_key: DashMap<String, IndexSet<String>>,
}

impl TagIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `key` with each of `tags`
    pub fn attach<S: AsRef<str>>(&self, key: &str, tags: &[S]) {
        if tags.is_empty() {
            return;
        }
        for tag in tags {
            self.by_tag
                .entry(tag.as_ref().to_string())
                .or_default()
                .insert(key.to_string());
        }
        let mut owned = self.by_key.entry(key.to_string()).or_default();
        for tag in tags {
            owned.insert(tag.as_ref().to_string());
        }
    }

    /// Remove `key` from every tag it belongs to
    pub fn detach(&self, key: &str) {
        let Some((_, tags)) = self.by_key.remove(key) else {
            return;
        };
        for tag in tags {
            let now_empty = match self.by_tag.get_mut(&tag) {
                Some(mut members) => {
                    members.shift_remove(key);
                    members.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.by_tag.remove_if(&tag, |_, members| members.is_empty());
            }
        }
    }

    /// Keys currently associated with any of `tags`, in insertion order
    pub fn keys_for<S: AsRef<str>>(&self, tags: &[S]) -> Vec<String> {
        let mut keys = IndexSet::new();
        for tag in tags {
            if let Some(members) = self.by_tag.get(tag.as_ref()) {
                keys.extend(members.iter().cloned());
            }
        }
        keys.into_iter().collect()
    }

    /// Tags attached to `key`
    pub fn tags_of(&self, key: &str) -> Vec<String> {
        self.by_key
            .get(key)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All indexed keys
    pub fn keys(&self) -> Vec<String> {
        self.by_key.iter().map(|r| r.key().clone()).collect()
    }

    /// Number of distinct tags
    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }

    /// Number of indexed keys
    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }

    /// Forget all associations
    pub fn clear(&self) {
        self.by_tag.clear();
        self.by_key.clear();
    }
}
