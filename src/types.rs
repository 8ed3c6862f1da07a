//! Common Types and Constants
//!
//! Shared data structures used by the sequence builder and the ranking evaluator.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

use crate::curriculum::{CurriculumError, CurriculumKey};

// ==================== Constants ====================

/// Sequences shorter than this are discarded after construction
pub const MIN_SEQUENCE_LENGTH: usize = 5;

/// Length of the training window cut from long student sequences
pub const MAX_SEQUENCE_WINDOW: usize = 55;

/// Grade whose second semester rolls over into the next grade
pub const DEFAULT_ROLLOVER_GRADE: u8 = 15;

/// Negative candidates ranked against each true item
pub const NUM_NEGATIVES: usize = 100;

/// Fixed seed for reproducible evaluation runs
pub const DEFAULT_SEED: u64 = 12345;

/// Padding id in model inputs, never a valid candidate
pub const PADDING_ITEM: ItemId = 0;

/// Vocabulary id of an item as seen by the model
pub type ItemId = u32;

// ==================== Interaction Log ====================

/// One row of the learning-history log
///
/// Field names follow the log's CSV header so any serde-based reader can
/// produce records directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InteractionRecord {
    /// Student (entity) id
    pub student_id: u64,
    /// Question (item) code
    pub question_code: String,
    /// Whether the answer was correct
    #[serde(deserialize_with = "deserialize_flag")]
    pub correct: bool,
    /// When the question was answered
    #[serde(with = "event_time_format")]
    pub event_time: NaiveDateTime,
    /// Raw curriculum code, e.g. `GR15_1_1_1`
    #[serde(rename = "question_grad_unit", default)]
    pub grad_unit: Option<String>,
    /// Question difficulty
    #[serde(rename = "question_difficulty", default)]
    pub difficulty: Option<f64>,
    /// Global correct rate of the question
    #[serde(rename = "question_correct", default)]
    pub correct_rate: Option<f64>,
}

impl InteractionRecord {
    pub fn new(
        student_id: u64,
        question_code: impl Into<String>,
        correct: bool,
        event_time: NaiveDateTime,
        grad_unit: Option<&str>,
    ) -> Self {
        Self {
            student_id,
            question_code: question_code.into(),
            correct,
            event_time,
            grad_unit: grad_unit.map(str::to_string),
            difficulty: None,
            correct_rate: None,
        }
    }

    /// Parsed curriculum key; `None` when the code is absent
    pub fn curriculum_key(&self) -> Option<Result<CurriculumKey, CurriculumError>> {
        self.grad_unit
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(str::parse)
    }

    /// Curriculum key, treating missing and malformed codes alike
    pub fn valid_curriculum_key(&self) -> Option<CurriculumKey> {
        self.curriculum_key().and_then(Result::ok)
    }
}

// ==================== Serde Helpers ====================

/// Correct flags arrive as `0/1`, booleans or their string forms
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Int(value) => Ok(value != 0),
        Flag::Float(value) => Ok(value != 0.0),
        Flag::Text(text) => match text.trim().to_lowercase().as_str() {
            "1" | "true" | "t" | "y" | "yes" => Ok(true),
            "0" | "false" | "f" | "n" | "no" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid correct flag: {other}"
            ))),
        },
    }
}

mod event_time_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let raw = raw.trim();
        NaiveDateTime::parse_from_str(raw, FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
            .map_err(serde::de::Error::custom)
    }
}
