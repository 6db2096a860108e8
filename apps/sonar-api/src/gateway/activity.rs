//! In-memory activity labels for online users. Lost on restart.

use dashmap::DashMap;

/// Label every user starts with after connecting.
pub const DEFAULT_ACTIVITY: &str = "Idle";

/// Longest label kept, in characters. Longer labels are truncated.
pub const MAX_ACTIVITY_CHARS: usize = 128;

/// Cut `label` down to [`MAX_ACTIVITY_CHARS`] characters.
pub fn clamp_label(label: &str) -> &str {
    match label.char_indices().nth(MAX_ACTIVITY_CHARS) {
        Some((end, _)) => &label[..end],
        None => label,
    }
}

pub struct ActivityTracker {
    inner: DashMap<String, String>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    pub fn set_activity(&self, identity: &str, label: &str) {
        self.inner.insert(identity.to_string(), label.to_string());
    }

    pub fn get(&self, identity: &str) -> Option<String> {
        self.inner.get(identity).map(|e| e.value().clone())
    }

    /// All (identity, label) pairs, sorted by identity.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .inner
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn clear(&self, identity: &str) {
        self.inner.remove(identity);
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}
