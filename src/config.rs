use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::{
    DEFAULT_ROLLOVER_GRADE, DEFAULT_SEED, MAX_SEQUENCE_WINDOW, MIN_SEQUENCE_LENGTH, NUM_NEGATIVES,
};

/// Upper bound on sampling rounds before negative sampling gives up
pub const DEFAULT_MAX_SAMPLING_ROUNDS: usize = 1000;

/// Positions between progress log lines
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v == "true" || v == "1")
}

// ==================== Sequence Builder ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Shorter sequences are dropped
    pub min_sequence_length: usize,
    /// Window length for long student sequences before stitching
    pub max_window: usize,
    /// Drop incorrect answers before grouping
    pub only_correct: bool,
    /// Grade whose second semester continues into the next grade
    pub rollover_grade: u8,
    /// Seed of the truncation-window stream
    pub window_seed: u64,
    /// Stable-sort the log by event time before grouping
    pub sort_chronologically: bool,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            min_sequence_length: MIN_SEQUENCE_LENGTH,
            max_window: MAX_SEQUENCE_WINDOW,
            only_correct: false,
            rollover_grade: DEFAULT_ROLLOVER_GRADE,
            window_seed: DEFAULT_SEED,
            sort_chronologically: false,
        }
    }
}

impl SequenceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            only_correct: env_flag("SEQ_ONLY_CORRECT").unwrap_or(defaults.only_correct),
            rollover_grade: env_parse("SEQ_ROLLOVER_GRADE").unwrap_or(defaults.rollover_grade),
            window_seed: env_parse("SEQ_WINDOW_SEED").unwrap_or(defaults.window_seed),
            sort_chronologically: env_flag("SEQ_SORT_BY_TIME")
                .unwrap_or(defaults.sort_chronologically),
            ..defaults
        }
    }
}

// ==================== Ranking Evaluator ====================

/// How negative candidates are drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    /// Weighted by global item frequency, without replacement per round
    Popularity,
    /// Uniform over `[1, vocabulary_size]`
    Uniform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    pub sampler: SamplerKind,
    pub num_negatives: usize,
    pub seed: u64,
    /// Masked rows per example in the log-probability matrix; only the first is ranked
    pub predictions_per_example: usize,
    pub max_sampling_rounds: usize,
    pub progress_interval: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerKind::Popularity,
            num_negatives: NUM_NEGATIVES,
            seed: DEFAULT_SEED,
            predictions_per_example: 1,
            max_sampling_rounds: DEFAULT_MAX_SAMPLING_ROUNDS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl EvaluatorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let sampler = match env_flag("EVAL_USE_POP_RANDOM") {
            Some(false) => SamplerKind::Uniform,
            _ => SamplerKind::Popularity,
        };

        Self {
            sampler,
            seed: env_parse("EVAL_SEED").unwrap_or(defaults.seed),
            predictions_per_example: env_parse("EVAL_MAX_PREDICTIONS_PER_SEQ")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.predictions_per_example),
            ..defaults
        }
    }
}

// ==================== Logging ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info,danci_seqrec::ranking=debug`
    pub filter: String,
    /// Mirror log lines into this file for the whole run
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            log_file: None,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            filter: std::env::var("SEQREC_LOG")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.filter),
            log_file: std::env::var_os("SEQREC_LOG_FILE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }
}
