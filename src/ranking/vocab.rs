//! Evaluation-time lookups: item frequencies and per-student held-out items

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::ItemId;

/// Key prefix of the held-out table (`user_<info>`)
const USER_KEY_PREFIX: &str = "user_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabEntry {
    pub id: ItemId,
    pub count: u64,
}

/// Item ids with their global occurrence counts, in vocabulary order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemVocabulary {
    entries: Vec<VocabEntry>,
}

impl ItemVocabulary {
    pub fn new(entries: Vec<VocabEntry>) -> Self {
        Self { entries }
    }

    pub fn from_counts<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (ItemId, u64)>,
    {
        Self::new(
            counts
                .into_iter()
                .map(|(id, count)| VocabEntry { id, count })
                .collect(),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn entries(&self) -> &[VocabEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_count(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }
}

/// Items each student has already seen outside the evaluated window
#[derive(Debug, Clone, Default)]
pub struct HeldOutTable {
    items: HashMap<i64, Vec<ItemId>>,
}

impl HeldOutTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{"user_<info>": [[items...], ...]}`; only the first list counts
    ///
    /// Keys without the `user_` prefix or a numeric suffix are ignored.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let raw: HashMap<String, Vec<Vec<ItemId>>> = serde_json::from_str(json)?;
        let mut table = Self::new();
        for (key, lists) in raw {
            let Some(info) = key
                .strip_prefix(USER_KEY_PREFIX)
                .and_then(|suffix| suffix.parse::<i64>().ok())
            else {
                tracing::debug!(key = %key, "ignoring held-out entry with unexpected key");
                continue;
            };
            table.insert(info, lists.into_iter().next().unwrap_or_default());
        }
        Ok(table)
    }

    pub fn insert(&mut self, info: i64, items: Vec<ItemId>) {
        self.items.insert(info, items);
    }

    pub fn items_for(&self, info: i64) -> &[ItemId] {
        self.items.get(&info).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_from_json() {
        let vocab = ItemVocabulary::from_json_str(
            r#"[{"id": 1, "count": 10}, {"id": 2, "count": 5}, {"id": 3, "count": 0}]"#,
        )
        .unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.total_count(), 15);
        assert_eq!(vocab.entries()[1], VocabEntry { id: 2, count: 5 });
    }

    #[test]
    fn test_held_out_uses_first_list() {
        let table = HeldOutTable::from_json_str(
            r#"{"user_12": [[4, 5], [9]], "user_x": [[1]], "other": [[2]], "user_13": []}"#,
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.items_for(12), &[4, 5]);
        assert!(table.items_for(13).is_empty());
        assert!(table.items_for(99).is_empty());
    }
}
