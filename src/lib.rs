//! # danci-seqrec - learning sequences and ranking evaluation
//!
//! This crate prepares learning-interaction sequences for a sequential
//! question recommender and measures a masked-sequence model's top-K
//! ranking quality:
//!
//! - **Sequence Builder** - lesson, unit and student sequences from the
//!   learning-history log, with next-lesson continuation via starter questions
//! - **Ranking Evaluator** - sampled-negative NDCG / Hit-Rate / MAP over
//!   streamed model outputs
//!
//! ## Modules
//!
//! - [`curriculum`] - curriculum keys (grade, semester, unit, lesson) and item placement
//! - [`sequence`] - segmentation policies, starter discovery, corpus output
//! - [`ranking`] - negative sampling, rank metrics, `begin/step/finalize` evaluator
//! - [`config`] - builder and evaluator settings
//! - [`logging`] - tracing subscriber setup for offline runs
//! - [`types`] - shared types and constants
//!
//! ## Example
//!
//! ```rust
//! use danci_seqrec::{SegmentationPolicy, SequenceBuilder, SequenceConfig};
//!
//! let builder = SequenceBuilder::new(SequenceConfig::default());
//! let corpus = builder.build(&[], SegmentationPolicy::Lesson);
//! assert!(corpus.is_empty());
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod curriculum;
pub mod logging;
pub mod ranking;
pub mod sequence;
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use types::*;

pub use config::{EvaluatorConfig, LoggingConfig, SamplerKind, SequenceConfig};

pub use logging::{init_tracing, LogFileGuard, LoggingError};

pub use curriculum::{CurriculumError, CurriculumKey, ItemMetadata, ItemMetadataTable};

pub use sequence::{
    discover_starters, BuildReport, CorpusStats, SegmentationPolicy, Sequence, SequenceBuilder,
    SequenceCorpus, SequenceError, StarterTable,
};

pub use ranking::{
    evaluate, EvalAccumulator, EvalBatch, EvalError, EvalMetrics, ExampleBatch, HeldOutTable,
    ItemVocabulary, MaskedPredictor, Predictions, RankingEvaluator, RowMajor,
};
