//! Lesson starters
//!
//! The starter of a lesson is the question students most often answer first
//! when they enter it. Starters are discovered once over the whole log and
//! then stay frozen while sequences are stitched.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use crate::curriculum::{CurriculumKey, ItemMetadataTable};
use crate::types::InteractionRecord;

/// Curriculum key -> starter question, sorted by key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StarterTable {
    starters: BTreeMap<CurriculumKey, String>,
}

impl StarterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: CurriculumKey, item: impl Into<String>) {
        self.starters.insert(key, item.into());
    }

    pub fn get(&self, key: &CurriculumKey) -> Option<&str> {
        self.starters.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &CurriculumKey) -> bool {
        self.starters.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.starters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CurriculumKey, &str)> {
        self.starters.iter().map(|(key, item)| (key, item.as_str()))
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json<W: Write>(&self, writer: W) -> Result<(), serde_json::Error> {
        serde_json::to_writer_pretty(writer, self)
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Collect starter candidates and resolve each lesson by majority vote
///
/// A record is a candidate for its own lesson when the student's previous
/// question belongs to a different lesson, has no usable metadata, or does
/// not exist. Records without a valid curriculum key are skipped.
pub fn discover_starters<'r, I>(records: I, metadata: &ItemMetadataTable) -> StarterTable
where
    I: IntoIterator<Item = &'r InteractionRecord>,
{
    let mut previous_item: HashMap<u64, &'r str> = HashMap::new();
    let mut candidates: HashMap<CurriculumKey, Vec<&'r str>> = HashMap::new();

    for record in records {
        let Some(key) = record.valid_curriculum_key() else {
            continue;
        };

        let previous_key = previous_item
            .get(&record.student_id)
            .and_then(|item| metadata.curriculum_key(item));
        if previous_key != Some(key) {
            candidates
                .entry(key)
                .or_default()
                .push(record.question_code.as_str());
        }

        previous_item.insert(record.student_id, record.question_code.as_str());
    }

    let mut table = StarterTable::new();
    for (key, items) in candidates {
        if let Some(item) = majority_vote(&items) {
            table.insert(key, item);
        }
    }

    tracing::debug!(lessons = table.len(), "starter discovery finished");
    table
}

/// Most frequent item; ties go to the one seen first
pub fn majority_vote<'a>(items: &[&'a str]) -> Option<&'a str> {
    let mut counts: HashMap<&str, usize> = HashMap::with_capacity(items.len());
    for &item in items {
        *counts.entry(item).or_default() += 1;
    }

    let mut best: Option<(&'a str, usize)> = None;
    for &item in items {
        let count = counts.get(item).copied().unwrap_or(0);
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((item, count));
        }
    }

    best.map(|(item, _)| item)
}
