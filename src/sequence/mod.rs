//! Learning Sequence Builder
//!
//! Turns a flat interaction log into per-group question sequences for the
//! sequential recommendation model.
//!
//! Segmentation policies:
//! - **Lesson**: one sequence per (student, grade, semester, unit, lesson)
//! - **Unit**: one sequence per (student, grade, semester, unit)
//! - **Student**: one sequence per student, optionally cut to a training
//!   window and continued with the starter question of the next lesson
//!
//! Every policy keeps the log's order inside a group and drops groups
//! shorter than `min_sequence_length`.

pub mod starter;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::config::SequenceConfig;
use crate::curriculum::{CurriculumError, CurriculumKey, ItemMetadataTable};
use crate::types::InteractionRecord;

pub use starter::{discover_starters, majority_vote, StarterTable};

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

// ==================== Data Structures ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationPolicy {
    Lesson,
    Unit,
    Student { continuation: bool },
}

/// Ordered questions of one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub group_id: u64,
    pub items: Vec<String>,
}

impl Sequence {
    pub fn new(group_id: u64) -> Self {
        Self {
            group_id,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Records and groups lost to filters during one build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub records_read: usize,
    pub skipped_incorrect: usize,
    pub skipped_missing_curriculum: usize,
    pub skipped_group_overflow: usize,
    pub dropped_short: usize,
    pub truncated: usize,
    pub stitched: usize,
    pub dropped_unresolved: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusStats {
    pub groups: usize,
    pub distinct_items: usize,
    pub interactions: usize,
    pub mean_length: f64,
}

impl fmt::Display for CorpusStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#groups: {}, #items: {}, #actions: {}, avg. length: {:.2}",
            self.groups, self.distinct_items, self.interactions, self.mean_length
        )
    }
}

/// Sequences produced by one policy
#[derive(Debug, Clone)]
pub struct SequenceCorpus {
    policy: SegmentationPolicy,
    sequences: Vec<Sequence>,
    starters: Option<StarterTable>,
    report: BuildReport,
}

impl SequenceCorpus {
    pub fn policy(&self) -> SegmentationPolicy {
        self.policy
    }

    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    pub fn into_sequences(self) -> Vec<Sequence> {
        self.sequences
    }

    /// Starter table used for stitching (continuation mode only)
    pub fn starters(&self) -> Option<&StarterTable> {
        self.starters.as_ref()
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn stats(&self) -> CorpusStats {
        let interactions: usize = self.sequences.iter().map(Sequence::len).sum();
        let distinct_items = self
            .sequences
            .iter()
            .flat_map(|s| s.items.iter().map(String::as_str))
            .collect::<HashSet<&str>>()
            .len();
        let groups = self.sequences.len();

        CorpusStats {
            groups,
            distinct_items,
            interactions,
            mean_length: if groups > 0 {
                interactions as f64 / groups as f64
            } else {
                0.0
            },
        }
    }

    /// One `<group_id> <item_id>` line per interaction, groups contiguous
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for sequence in &self.sequences {
            for item in &sequence.items {
                writeln!(writer, "{} {}", sequence.group_id, item)?;
            }
        }
        writer.flush()
    }

    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<(), SequenceError> {
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))?;
        Ok(())
    }

    /// Persist the starter table
    ///
    /// Returns `false` without touching `path` when the corpus was built
    /// without continuation and has no table.
    pub fn write_starters_to_path(&self, path: impl AsRef<Path>) -> Result<bool, SequenceError> {
        let path = path.as_ref();
        let Some(starters) = &self.starters else {
            tracing::debug!(path = %path.display(), policy = ?self.policy, "no starter table to write");
            return Ok(false);
        };

        let mut writer = BufWriter::new(File::create(path)?);
        starters.write_json(&mut writer)?;
        writer.flush()?;
        Ok(true)
    }
}

/// Groups in first-seen order
#[derive(Default)]
struct Grouper {
    index: HashMap<u64, usize>,
    sequences: Vec<Sequence>,
}

impl Grouper {
    fn push(&mut self, group_id: u64, item: &str) {
        let next = self.sequences.len();
        let slot = *self.index.entry(group_id).or_insert(next);
        if slot == next {
            self.sequences.push(Sequence::new(group_id));
        }
        self.sequences[slot].items.push(item.to_string());
    }

    fn finish(self) -> Vec<Sequence> {
        self.sequences
    }
}

// ==================== Builder ====================

pub struct SequenceBuilder {
    config: SequenceConfig,
    metadata: Option<ItemMetadataTable>,
}

impl SequenceBuilder {
    pub fn new(config: SequenceConfig) -> Self {
        Self {
            config,
            metadata: None,
        }
    }

    /// Question placements used for stitching
    ///
    /// Without a table the placements are read from the log itself.
    pub fn with_metadata(mut self, metadata: ItemMetadataTable) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    pub fn build(&self, records: &[InteractionRecord], policy: SegmentationPolicy) -> SequenceCorpus {
        let mut report = BuildReport {
            records_read: records.len(),
            ..Default::default()
        };

        let require_curriculum = !matches!(policy, SegmentationPolicy::Student { continuation: false });
        let ordered = self.ordered(records);
        let admitted = self.admit(&ordered, require_curriculum, &mut report);

        let mut starters = None;
        let mut sequences = match policy {
            SegmentationPolicy::Lesson => {
                group_by_curriculum(&admitted, &mut report, CurriculumKey::lesson_group_id)
            }
            SegmentationPolicy::Unit => {
                group_by_curriculum(&admitted, &mut report, CurriculumKey::unit_group_id)
            }
            SegmentationPolicy::Student { continuation } => {
                let mut grouper = Grouper::default();
                for (record, _) in &admitted {
                    grouper.push(record.student_id, &record.question_code);
                }
                let sequences = grouper.finish();

                if continuation {
                    let derived;
                    let metadata = match &self.metadata {
                        Some(table) => table,
                        None => {
                            derived = ItemMetadataTable::from_records(records);
                            &derived
                        }
                    };
                    // Starters see every answer, including ones `only_correct` drops
                    let table = discover_starters(ordered.iter().copied(), metadata);
                    let stitched = self.stitch(sequences, &table, metadata, &mut report);
                    starters = Some(table);
                    stitched
                } else {
                    sequences
                }
            }
        };

        let min_len = self.config.min_sequence_length;
        let before = sequences.len();
        sequences.retain(|s| s.len() >= min_len);
        report.dropped_short = before - sequences.len();

        if report.dropped_unresolved > 0 {
            tracing::info!(
                dropped = report.dropped_unresolved,
                "student sequences without a resolvable next lesson were dropped"
            );
        }

        let corpus = SequenceCorpus {
            policy,
            sequences,
            starters,
            report,
        };

        let stats = corpus.stats();
        tracing::info!(
            policy = ?policy,
            groups = stats.groups,
            items = stats.distinct_items,
            actions = stats.interactions,
            avg_length = stats.mean_length,
            "sequence corpus built"
        );

        corpus
    }

    fn ordered<'r>(&self, records: &'r [InteractionRecord]) -> Vec<&'r InteractionRecord> {
        let mut ordered: Vec<&InteractionRecord> = records.iter().collect();
        if self.config.sort_chronologically {
            ordered.sort_by_key(|r| r.event_time);
        }
        ordered
    }

    /// Apply the record filters shared by all policies
    fn admit<'r>(
        &self,
        ordered: &[&'r InteractionRecord],
        require_curriculum: bool,
        report: &mut BuildReport,
    ) -> Vec<(&'r InteractionRecord, Option<CurriculumKey>)> {
        let mut admitted = Vec::with_capacity(ordered.len());
        for &record in ordered {
            if self.config.only_correct && !record.correct {
                report.skipped_incorrect += 1;
                continue;
            }
            let key = record.valid_curriculum_key();
            if require_curriculum && key.is_none() {
                report.skipped_missing_curriculum += 1;
                continue;
            }
            admitted.push((record, key));
        }
        admitted
    }

    /// Cut long sequences to a random window and append the next lesson's starter
    fn stitch(
        &self,
        sequences: Vec<Sequence>,
        starters: &StarterTable,
        metadata: &ItemMetadataTable,
        report: &mut BuildReport,
    ) -> Vec<Sequence> {
        let window = self.config.max_window;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.window_seed);
        let mut stitched = Vec::with_capacity(sequences.len());

        for mut sequence in sequences {
            let len = sequence.len();
            if window > 0 && len >= window {
                let end = rng.gen_range(window..=len);
                sequence.items.truncate(end);
                sequence.items = sequence.items.split_off(end - window);
                if len > window {
                    report.truncated += 1;
                }
            }

            let Some(current) = sequence
                .items
                .last()
                .and_then(|item| metadata.curriculum_key(item))
            else {
                report.dropped_unresolved += 1;
                continue;
            };

            let next = current
                .successor(self.config.rollover_grade, |key| starters.contains(key))
                .and_then(|key| starters.get(&key).map(|item| (key, item)));

            match next {
                Some((key, item)) => {
                    tracing::trace!(student = sequence.group_id, lesson = %key, item, "stitched next lesson");
                    sequence.items.push(item.to_string());
                    report.stitched += 1;
                    stitched.push(sequence);
                }
                None => {
                    tracing::debug!(
                        student = sequence.group_id,
                        lesson = %current,
                        "no continuation lesson; dropping sequence"
                    );
                    report.dropped_unresolved += 1;
                }
            }
        }

        stitched
    }
}

impl Default for SequenceBuilder {
    fn default() -> Self {
        Self::new(SequenceConfig::default())
    }
}

fn group_by_curriculum<F>(
    admitted: &[(&InteractionRecord, Option<CurriculumKey>)],
    report: &mut BuildReport,
    pack: F,
) -> Vec<Sequence>
where
    F: Fn(&CurriculumKey, u64) -> Result<u64, CurriculumError>,
{
    let mut grouper = Grouper::default();
    for (record, key) in admitted {
        let Some(key) = key else {
            report.skipped_missing_curriculum += 1;
            continue;
        };
        match pack(key, record.student_id) {
            Ok(group_id) => grouper.push(group_id, &record.question_code),
            Err(_) => report.skipped_group_overflow += 1,
        }
    }
    grouper.finish()
}
