//! Curriculum Keys
//!
//! A curriculum key identifies one lesson as `(grade, semester, unit, lesson)`.
//!
//! - Text form: `GR<dd>_<semester>_<unit>_<lesson>`, e.g. `GR15_1_2_3`
//! - Ordering: lexicographic over (grade, semester, unit, lesson)
//! - Packed group ids combine a student id with the key for lesson/unit grouping
//! - Successor relation: next lesson, next unit, next semester, next grade

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::types::InteractionRecord;

/// Fixed prefix of every grade code
const GRADE_PREFIX: &str = "GR";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CurriculumError {
    #[error("expected 4 `_`-separated components, got {0:?}")]
    InvalidFormat(String),
    #[error("invalid grade code: {0:?}")]
    InvalidGradeCode(String),
    #[error("invalid {field} component: {value:?}")]
    InvalidComponent { field: &'static str, value: String },
    #[error("packed group id overflows for student {0}")]
    GroupIdOverflow(u64),
}

// ==================== Curriculum Key ====================

/// (grade, semester, unit, lesson); field order defines the ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurriculumKey {
    pub grade: u8,
    pub semester: u8,
    pub unit: u8,
    pub lesson: u8,
}

impl CurriculumKey {
    pub fn new(grade: u8, semester: u8, unit: u8, lesson: u8) -> Self {
        Self {
            grade,
            semester,
            unit,
            lesson,
        }
    }

    /// Last digit of the grade code (`GR15` -> 5)
    pub fn grade_digit(&self) -> u64 {
        u64::from(self.grade % 10)
    }

    /// `student×10000 + grade_digit×1000 + semester×100 + unit×10 + lesson`
    pub fn lesson_group_id(&self, student_id: u64) -> Result<u64, CurriculumError> {
        pack(
            student_id,
            10_000,
            self.grade_digit() * 1000
                + u64::from(self.semester) * 100
                + u64::from(self.unit) * 10
                + u64::from(self.lesson),
        )
    }

    /// `student×1000 + grade_digit×100 + semester×10 + unit`
    pub fn unit_group_id(&self, student_id: u64) -> Result<u64, CurriculumError> {
        pack(
            student_id,
            1000,
            self.grade_digit() * 100 + u64::from(self.semester) * 10 + u64::from(self.unit),
        )
    }

    /// Ordered continuation candidates after this lesson
    ///
    /// 1. next lesson of the same unit
    /// 2. first lesson of the next unit
    /// 3. first semester only: semester 2, unit 1, lesson 1 of the same grade
    /// 4. otherwise, at the rollover grade only: grade+1, semester 1, unit 1, lesson 1
    pub fn successor_candidates(&self, rollover_grade: u8) -> Vec<CurriculumKey> {
        let mut candidates = Vec::with_capacity(3);

        if let Some(lesson) = self.lesson.checked_add(1) {
            candidates.push(Self::new(self.grade, self.semester, self.unit, lesson));
        }
        if let Some(unit) = self.unit.checked_add(1) {
            candidates.push(Self::new(self.grade, self.semester, unit, 1));
        }
        if self.semester == 1 {
            candidates.push(Self::new(self.grade, 2, 1, 1));
        } else if self.grade == rollover_grade {
            if let Some(grade) = self.grade.checked_add(1) {
                candidates.push(Self::new(grade, 1, 1, 1));
            }
        }

        candidates
    }

    /// First continuation candidate accepted by `is_known`
    pub fn successor<F>(&self, rollover_grade: u8, mut is_known: F) -> Option<CurriculumKey>
    where
        F: FnMut(&CurriculumKey) -> bool,
    {
        self.successor_candidates(rollover_grade)
            .into_iter()
            .find(|candidate| is_known(candidate))
    }
}

fn pack(student_id: u64, scale: u64, suffix: u64) -> Result<u64, CurriculumError> {
    student_id
        .checked_mul(scale)
        .and_then(|base| base.checked_add(suffix))
        .ok_or(CurriculumError::GroupIdOverflow(student_id))
}

fn parse_component(field: &'static str, value: &str) -> Result<u8, CurriculumError> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|_| CurriculumError::InvalidComponent {
            field,
            value: value.to_string(),
        })
}

/// `GR15` -> 15
pub fn parse_grade_code(code: &str) -> Result<u8, CurriculumError> {
    let code = code.trim();
    let digits = code
        .strip_prefix(GRADE_PREFIX)
        .filter(|digits| digits.len() == 2 && digits.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| CurriculumError::InvalidGradeCode(code.to_string()))?;
    digits
        .parse()
        .map_err(|_| CurriculumError::InvalidGradeCode(code.to_string()))
}

impl FromStr for CurriculumKey {
    type Err = CurriculumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('_').collect();
        if parts.len() != 4 {
            return Err(CurriculumError::InvalidFormat(s.to_string()));
        }

        Ok(Self {
            grade: parse_grade_code(parts[0])?,
            semester: parse_component("semester", parts[1])?,
            unit: parse_component("unit", parts[2])?,
            lesson: parse_component("lesson", parts[3])?,
        })
    }
}

impl fmt::Display for CurriculumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:02}_{}_{}_{}",
            GRADE_PREFIX, self.grade, self.semester, self.unit, self.lesson
        )
    }
}

impl Serialize for CurriculumKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CurriculumKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ==================== Item Metadata ====================

/// Curriculum placement of one question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(alias = "grad_cd")]
    pub grade_code: String,
    #[serde(deserialize_with = "deserialize_code")]
    pub semester: u8,
    #[serde(deserialize_with = "deserialize_code")]
    pub unit: u8,
    #[serde(deserialize_with = "deserialize_code")]
    pub lesson: u8,
}

impl ItemMetadata {
    pub fn curriculum_key(&self) -> Result<CurriculumKey, CurriculumError> {
        Ok(CurriculumKey::new(
            parse_grade_code(&self.grade_code)?,
            self.semester,
            self.unit,
            self.lesson,
        ))
    }
}

impl From<CurriculumKey> for ItemMetadata {
    fn from(key: CurriculumKey) -> Self {
        Self {
            grade_code: format!("{}{:02}", GRADE_PREFIX, key.grade),
            semester: key.semester,
            unit: key.unit,
            lesson: key.lesson,
        }
    }
}

/// Codes arrive either as numbers or as numeric strings
fn deserialize_code<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(u8),
        Text(String),
    }

    match Code::deserialize(deserializer)? {
        Code::Number(value) => Ok(value),
        Code::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Question code -> curriculum placement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemMetadataTable {
    items: HashMap<String, ItemMetadata>,
}

impl ItemMetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Placement of each question as first seen in the log
    pub fn from_records<'r, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'r InteractionRecord>,
    {
        let mut table = Self::new();
        for record in records {
            if table.items.contains_key(&record.question_code) {
                continue;
            }
            if let Some(key) = record.valid_curriculum_key() {
                table.insert(record.question_code.clone(), key.into());
            }
        }
        table
    }

    pub fn insert(&mut self, item: impl Into<String>, metadata: ItemMetadata) {
        self.items.insert(item.into(), metadata);
    }

    pub fn get(&self, item: &str) -> Option<&ItemMetadata> {
        self.items.get(item)
    }

    /// Missing or malformed metadata both yield `None`
    pub fn curriculum_key(&self, item: &str) -> Option<CurriculumKey> {
        self.get(item).and_then(|meta| meta.curriculum_key().ok())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
