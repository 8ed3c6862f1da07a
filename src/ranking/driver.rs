//! Evaluation driver
//!
//! The model stays outside this crate. It is reached through
//! [`MaskedPredictor`]: given one batch of examples, return log-probabilities
//! for the masked positions. [`evaluate`] runs a full pass over a batch
//! iterator with it.

use serde::{Deserialize, Serialize};

use super::vocab::{HeldOutTable, ItemVocabulary};
use super::{EvalBatch, EvalError, EvalMetrics, RankingEvaluator, RowMajor};
use crate::config::EvaluatorConfig;
use crate::types::ItemId;

/// Model inputs for one batch, row-major
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExampleBatch {
    /// `[batch, sequence_length]`
    pub input_ids: Vec<ItemId>,
    pub sequence_length: usize,
    /// `[batch, predictions_per_example]`
    pub masked_ids: Vec<ItemId>,
    pub predictions_per_example: usize,
    /// `[batch]`
    pub info: Vec<i64>,
}

impl ExampleBatch {
    pub fn len(&self) -> usize {
        self.info.len()
    }

    pub fn is_empty(&self) -> bool {
        self.info.is_empty()
    }

    /// Pair inputs with model outputs for a `step` call
    pub fn with_predictions<'a>(
        &'a self,
        predictions: &'a Predictions,
    ) -> Result<EvalBatch<'a>, EvalError> {
        Ok(EvalBatch {
            log_probs: RowMajor::new(&predictions.log_probs, predictions.vocabulary_width)?,
            input_ids: RowMajor::new(&self.input_ids, self.sequence_length)?,
            masked_ids: RowMajor::new(&self.masked_ids, self.predictions_per_example)?,
            info: &self.info,
        })
    }
}

/// Log-probabilities over the item vocabulary, `[rows, vocabulary_width]`
#[derive(Debug, Clone, Default)]
pub struct Predictions {
    pub log_probs: Vec<f32>,
    pub vocabulary_width: usize,
}

pub trait MaskedPredictor {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Log-probabilities for every masked row of the batch
    fn predict(&self, batch: &ExampleBatch) -> Result<Predictions, Self::Error>;
}

/// Run `begin → step* → finalize` over all batches
pub fn evaluate<P, I>(
    predictor: &P,
    batches: I,
    config: EvaluatorConfig,
    vocab: &ItemVocabulary,
    held_out: Option<HeldOutTable>,
) -> Result<EvalMetrics, EvalError>
where
    P: MaskedPredictor,
    I: IntoIterator<Item = ExampleBatch>,
{
    let mut evaluator = RankingEvaluator::begin(config, vocab, held_out)?;

    for (step, batch) in batches.into_iter().enumerate() {
        let predictions = predictor
            .predict(&batch)
            .map_err(|err| EvalError::Predictor(Box::new(err)))?;
        let processed = evaluator.step(&batch.with_predictions(&predictions)?)?;
        tracing::debug!(step, processed, "evaluation batch done");
    }

    evaluator.finalize()
}
