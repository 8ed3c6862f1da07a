//! Sampled-Negative Ranking Evaluator
//!
//! Scores a masked-sequence model by ranking each held-out true item against
//! 100 sampled negatives the student has not seen.
//!
//! Lifecycle:
//! - `begin`: load vocabulary and held-out items, reset totals, seed the sampler
//! - `step`: one call per batch of model outputs, in order
//! - `finalize`: consume the evaluator and average the totals
//!
//! Candidate pools are drawn sequentially so runs are reproducible for a
//! fixed seed; ranks within a batch are then computed in parallel.

pub mod driver;
pub mod metrics;
pub mod sampler;
pub mod vocab;

use rayon::prelude::*;
use std::collections::HashSet;

use crate::config::EvaluatorConfig;
use crate::types::{ItemId, PADDING_ITEM};

pub use driver::{evaluate, ExampleBatch, MaskedPredictor, Predictions};
pub use metrics::{has_invalid_scores, rank_of_true_item, EvalAccumulator, EvalMetrics};
pub use sampler::NegativeSampler;
pub use vocab::{HeldOutTable, ItemVocabulary, VocabEntry};

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("vocabulary error: {0}")]
    Vocabulary(String),
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("item {item} outside log-probability row of width {width}")]
    ItemOutOfRange { item: ItemId, width: usize },
    #[error("collected {found} of {wanted} negatives after {rounds} sampling rounds")]
    NegativeSampling {
        wanted: usize,
        found: usize,
        rounds: usize,
    },
    #[error("no evaluable examples")]
    NoEvaluableExamples,
    #[error("predictor failed: {0}")]
    Predictor(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

// ==================== Batch Input ====================

/// Borrowed row-major matrix
#[derive(Debug, Clone, Copy)]
pub struct RowMajor<'a, T> {
    data: &'a [T],
    cols: usize,
}

impl<'a, T> RowMajor<'a, T> {
    pub fn new(data: &'a [T], cols: usize) -> Result<Self, EvalError> {
        let aligned = if cols == 0 {
            data.is_empty()
        } else {
            data.len() % cols == 0
        };
        if !aligned {
            return Err(EvalError::Shape(format!(
                "{} values do not fill rows of width {}",
                data.len(),
                cols
            )));
        }
        Ok(Self { data, cols })
    }

    pub fn rows(&self) -> usize {
        if self.cols == 0 {
            0
        } else {
            self.data.len() / self.cols
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, index: usize) -> &'a [T] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }
}

/// One batch of model outputs and inputs
#[derive(Debug, Clone, Copy)]
pub struct EvalBatch<'a> {
    /// `[batch × predictions_per_example, vocabulary_width]`
    pub log_probs: RowMajor<'a, f32>,
    /// `[batch, sequence_length]`
    pub input_ids: RowMajor<'a, ItemId>,
    /// `[batch, predictions_per_example]`; the first column is the true item
    pub masked_ids: RowMajor<'a, ItemId>,
    /// Opaque per-example id used for held-out lookups
    pub info: &'a [i64],
}

impl<'a> EvalBatch<'a> {
    pub fn examples(&self) -> usize {
        self.input_ids.rows()
    }
}

// ==================== Evaluator ====================

pub struct RankingEvaluator {
    config: EvaluatorConfig,
    sampler: NegativeSampler,
    held_out: HeldOutTable,
    accumulator: EvalAccumulator,
}

impl RankingEvaluator {
    /// Start an evaluation pass
    pub fn begin(
        config: EvaluatorConfig,
        vocab: &ItemVocabulary,
        held_out: Option<HeldOutTable>,
    ) -> Result<Self, EvalError> {
        if config.predictions_per_example == 0 {
            return Err(EvalError::Shape(
                "predictions_per_example must be positive".to_string(),
            ));
        }

        let sampler = NegativeSampler::new(
            config.sampler,
            vocab,
            config.num_negatives,
            config.max_sampling_rounds,
            config.seed,
        )?;
        let held_out = held_out.unwrap_or_default();

        tracing::info!(
            sampler = ?config.sampler,
            items = vocab.len(),
            held_out_users = held_out.len(),
            seed = config.seed,
            "ranking evaluation started"
        );

        Ok(Self {
            config,
            sampler,
            held_out,
            accumulator: EvalAccumulator::new(),
        })
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Totals so far
    pub fn accumulator(&self) -> &EvalAccumulator {
        &self.accumulator
    }

    /// Rank every example of the batch and fold it into the totals
    ///
    /// Returns the number of evaluated positions. A failed batch leaves the
    /// totals untouched.
    pub fn step(&mut self, batch: &EvalBatch<'_>) -> Result<usize, EvalError> {
        let examples = self.validate(batch)?;
        if examples == 0 {
            return Ok(0);
        }

        let mut pools = Vec::with_capacity(examples);
        for idx in 0..examples {
            let true_item = batch.masked_ids.row(idx)[0];
            let excluded = self.exclusion_set(batch, idx, true_item);
            pools.push(self.sampler.candidate_pool(true_item, &excluded)?);
        }

        let stride = self.config.predictions_per_example;
        let ranks = pools
            .par_iter()
            .enumerate()
            .map(|(idx, pool)| rank_of_true_item(batch.log_probs.row(idx * stride), pool))
            .collect::<Result<Vec<usize>, EvalError>>()?;

        let interval = self.config.progress_interval.max(1);
        for rank in ranks {
            self.accumulator.record(rank);
            if self.accumulator.valid_users % interval == 0 {
                tracing::info!(evaluated = self.accumulator.valid_users, "ranking evaluation progress");
            }
        }

        Ok(examples)
    }

    /// End the pass and report averaged metrics
    pub fn finalize(self) -> Result<EvalMetrics, EvalError> {
        let metrics = self.accumulator.finalize()?;
        tracing::info!("{}", metrics);
        Ok(metrics)
    }

    fn validate(&self, batch: &EvalBatch<'_>) -> Result<usize, EvalError> {
        let examples = batch.examples();
        let stride = self.config.predictions_per_example;

        if batch.masked_ids.rows() != examples {
            return Err(EvalError::Shape(format!(
                "{} masked rows for {} examples",
                batch.masked_ids.rows(),
                examples
            )));
        }
        if batch.info.len() != examples {
            return Err(EvalError::Shape(format!(
                "{} info ids for {} examples",
                batch.info.len(),
                examples
            )));
        }
        if batch.log_probs.rows() != examples * stride {
            return Err(EvalError::Shape(format!(
                "{} log-probability rows, expected {} × {}",
                batch.log_probs.rows(),
                examples,
                stride
            )));
        }
        if examples > 0 && batch.masked_ids.cols() == 0 {
            return Err(EvalError::Shape("masked ids have no columns".to_string()));
        }

        let invalid_rows = (0..examples)
            .filter(|idx| has_invalid_scores(batch.log_probs.row(idx * stride)))
            .count();
        if invalid_rows > 0 {
            tracing::warn!(rows = invalid_rows, "log-probabilities contain NaN or infinite values");
        }

        Ok(examples)
    }

    /// Inputs, padding, the true item and held-out items of this student
    fn exclusion_set(&self, batch: &EvalBatch<'_>, idx: usize, true_item: ItemId) -> HashSet<ItemId> {
        let held_out = self.held_out.items_for(batch.info[idx]);
        let mut excluded: HashSet<ItemId> = batch.input_ids.row(idx).iter().copied().collect();
        excluded.reserve(held_out.len() + 2);
        excluded.insert(PADDING_ITEM);
        excluded.insert(true_item);
        excluded.extend(held_out.iter().copied());
        excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplerKind;

    const VOCAB: u32 = 300;
    const WIDTH: usize = VOCAB as usize + 1;

    fn vocab() -> ItemVocabulary {
        ItemVocabulary::from_counts((1..=VOCAB).map(|id| (id, 1 + u64::from(id % 5))))
    }

    fn row_with(true_item: ItemId, true_score: f32, others: f32) -> Vec<f32> {
        let mut row = vec![others; WIDTH];
        row[true_item as usize] = true_score;
        row
    }

    #[test]
    fn test_row_major_shapes() {
        let data = [1, 2, 3, 4, 5, 6];
        let m = RowMajor::new(&data, 3).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.row(1), &[4, 5, 6]);
        assert!(RowMajor::new(&data, 4).is_err());
        assert_eq!(RowMajor::<u32>::new(&[], 0).unwrap().rows(), 0);
    }

    #[test]
    fn test_step_best_and_worst_positions() {
        let mut evaluator =
            RankingEvaluator::begin(EvaluatorConfig::default(), &vocab(), None).unwrap();

        let mut log_probs = row_with(7, -0.1, -3.0);
        log_probs.extend(row_with(9, -20.0, -3.0));
        let input_ids = [5, 6, 7, 0, 8, 9, 10, 0];
        let masked = [7, 9];
        let info = [1, 2];

        let batch = EvalBatch {
            log_probs: RowMajor::new(&log_probs, WIDTH).unwrap(),
            input_ids: RowMajor::new(&input_ids, 4).unwrap(),
            masked_ids: RowMajor::new(&masked, 1).unwrap(),
            info: &info,
        };
        assert_eq!(evaluator.step(&batch).unwrap(), 2);

        let acc = evaluator.accumulator().clone();
        assert_eq!(acc.valid_users, 2);
        assert_eq!(acc.hit_1, 1.0);
        assert_eq!(acc.hit_10, 1.0);
        assert!((acc.reciprocal_rank_sum - (1.0 + 1.0 / 101.0)).abs() < 1e-12);
    }

    #[test]
    fn test_only_first_masked_row_is_ranked() {
        let config = EvaluatorConfig {
            predictions_per_example: 3,
            ..Default::default()
        };
        let mut evaluator = RankingEvaluator::begin(config, &vocab(), None).unwrap();

        let mut log_probs = row_with(4, 0.0, -1.0);
        log_probs.extend(row_with(4, -50.0, -1.0));
        log_probs.extend(row_with(4, -50.0, -1.0));
        let masked = [4, 11, 12];

        let batch = EvalBatch {
            log_probs: RowMajor::new(&log_probs, WIDTH).unwrap(),
            input_ids: RowMajor::new(&[1, 2], 2).unwrap(),
            masked_ids: RowMajor::new(&masked, 3).unwrap(),
            info: &[0],
        };
        evaluator.step(&batch).unwrap();
        assert_eq!(evaluator.accumulator().hit_1, 1.0);
    }

    #[test]
    fn test_held_out_items_are_never_negatives() {
        let mut held_out = HeldOutTable::new();
        held_out.insert(42, (100..=300).collect());

        let config = EvaluatorConfig {
            sampler: SamplerKind::Uniform,
            ..Default::default()
        };
        let mut evaluator = RankingEvaluator::begin(config, &vocab(), Some(held_out)).unwrap();

        // Held-out items would outrank the true item if they were sampled
        let mut log_probs = vec![-1.0; WIDTH];
        for score in log_probs.iter_mut().skip(100) {
            *score = 0.0;
        }
        log_probs[1] = -0.5;

        let batch = EvalBatch {
            log_probs: RowMajor::new(&log_probs, WIDTH).unwrap(),
            input_ids: RowMajor::new(&[0, 0], 2).unwrap(),
            masked_ids: RowMajor::new(&[1], 1).unwrap(),
            info: &[42],
        };
        evaluator.step(&batch).unwrap();
        assert_eq!(evaluator.accumulator().hit_1, 1.0);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut evaluator =
            RankingEvaluator::begin(EvaluatorConfig::default(), &vocab(), None).unwrap();
        let batch = EvalBatch {
            log_probs: RowMajor::new(&[], WIDTH).unwrap(),
            input_ids: RowMajor::new(&[], 4).unwrap(),
            masked_ids: RowMajor::new(&[], 1).unwrap(),
            info: &[],
        };
        assert_eq!(evaluator.step(&batch).unwrap(), 0);
        assert!(matches!(evaluator.finalize(), Err(EvalError::NoEvaluableExamples)));
    }

    #[test]
    fn test_shape_mismatch_leaves_totals_untouched() {
        let mut evaluator =
            RankingEvaluator::begin(EvaluatorConfig::default(), &vocab(), None).unwrap();
        let log_probs = row_with(3, 0.0, -1.0);
        let batch = EvalBatch {
            log_probs: RowMajor::new(&log_probs, WIDTH).unwrap(),
            input_ids: RowMajor::new(&[1, 2, 3, 4], 2).unwrap(),
            masked_ids: RowMajor::new(&[3, 4], 1).unwrap(),
            info: &[1, 2],
        };
        assert!(matches!(evaluator.step(&batch), Err(EvalError::Shape(_))));
        assert_eq!(evaluator.accumulator().valid_users, 0);
    }

    #[test]
    fn test_narrow_log_prob_rows_are_rejected() {
        let mut evaluator =
            RankingEvaluator::begin(EvaluatorConfig::default(), &vocab(), None).unwrap();
        let log_probs = vec![0.0; 50];
        let batch = EvalBatch {
            log_probs: RowMajor::new(&log_probs, 50).unwrap(),
            input_ids: RowMajor::new(&[1], 1).unwrap(),
            masked_ids: RowMajor::new(&[3], 1).unwrap(),
            info: &[0],
        };
        assert!(matches!(
            evaluator.step(&batch),
            Err(EvalError::ItemOutOfRange { width: 50, .. })
        ));
    }
}
