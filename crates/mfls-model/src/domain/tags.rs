use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Request to add and remove user tags on a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagMutation {
    pub tags_to_add: Vec<String>,
    pub tags_to_remove: Vec<String>,
}

impl TagMutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, tag: impl Into<String>) -> Self {
        self.tags_to_add.push(tag.into());
        self
    }

    pub fn remove(mut self, tag: impl Into<String>) -> Self {
        self.tags_to_remove.push(tag.into());
        self
    }

    /// Merge into `existing`: removals first, then additions. Result is sorted and deduplicated.
    pub fn apply(&self, existing: &[String]) -> Vec<String> {
        let mut tags: BTreeSet<String> = existing.iter().cloned().collect();
        for tag in &self.tags_to_remove {
            tags.remove(tag);
        }
        tags.extend(self.tags_to_add.iter().cloned());
        tags.into_iter().collect()
    }
}
