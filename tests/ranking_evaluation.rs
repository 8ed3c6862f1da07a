//! Integration tests for the ranking evaluator
//!
//! Drives `begin → step → finalize` directly and through [`evaluate`] with
//! small in-process predictors.

use proptest::prelude::*;
use std::fs::File;
use std::io::{self, BufWriter};

use danci_seqrec::{
    evaluate, EvalBatch, EvalError, EvaluatorConfig, ExampleBatch, HeldOutTable, ItemId,
    ItemVocabulary, MaskedPredictor, Predictions, RankingEvaluator, RowMajor, SamplerKind,
};

const VOCAB: u32 = 500;
const WIDTH: usize = VOCAB as usize + 1;
const SEQ_LEN: usize = 4;
const EPS: f64 = 1e-12;

fn vocab() -> ItemVocabulary {
    ItemVocabulary::from_counts((1..=VOCAB).map(|id| (id, 1 + u64::from(id % 11))))
}

fn item(seed: usize) -> ItemId {
    1 + (seed as u32 * 37) % VOCAB
}

/// `size` examples starting at example number `offset`
fn example_batch(offset: usize, size: usize) -> ExampleBatch {
    let mut batch = ExampleBatch {
        sequence_length: SEQ_LEN,
        predictions_per_example: 1,
        ..Default::default()
    };
    for n in offset..offset + size {
        batch
            .input_ids
            .extend((0..SEQ_LEN).map(|k| item(n * 13 + k + 101)));
        batch.masked_ids.push(item(n));
        batch.info.push(n as i64);
    }
    batch
}

fn batches(count: usize, size: usize) -> Vec<ExampleBatch> {
    (0..count).map(|b| example_batch(b * size, size)).collect()
}

// ==================== Predictors ====================

/// Puts all probability mass on the masked item
struct Oracle;

impl MaskedPredictor for Oracle {
    type Error = io::Error;

    fn predict(&self, batch: &ExampleBatch) -> Result<Predictions, io::Error> {
        let mut log_probs = vec![-8.0; batch.len() * WIDTH];
        for (row, &true_item) in batch.masked_ids.iter().enumerate() {
            log_probs[row * WIDTH + true_item as usize] = 0.0;
        }
        Ok(Predictions {
            log_probs,
            vocabulary_width: WIDTH,
        })
    }
}

/// Fixed pseudo-random scores that ignore the input
struct Scrambled;

impl MaskedPredictor for Scrambled {
    type Error = io::Error;

    fn predict(&self, batch: &ExampleBatch) -> Result<Predictions, io::Error> {
        let row: Vec<f32> = (0..WIDTH)
            .map(|id| -(((id * 7919) % 997) as f32) / 10.0)
            .collect();
        Ok(Predictions {
            log_probs: row.repeat(batch.len()),
            vocabulary_width: WIDTH,
        })
    }
}

struct Offline;

impl MaskedPredictor for Offline {
    type Error = io::Error;

    fn predict(&self, _batch: &ExampleBatch) -> Result<Predictions, io::Error> {
        Err(io::Error::new(io::ErrorKind::NotConnected, "model unavailable"))
    }
}

// ==================== Scoring ====================

#[test]
fn best_scored_true_item_ranks_first() {
    let metrics = evaluate(&Oracle, batches(3, 8), EvaluatorConfig::default(), &vocab(), None).unwrap();

    assert_eq!(metrics.valid_users, 24);
    assert!((metrics.hit_1 - 1.0).abs() < EPS);
    assert!((metrics.ndcg_1 - 1.0).abs() < EPS);
    assert!((metrics.ndcg_10 - 1.0).abs() < EPS);
    assert!((metrics.map - 1.0).abs() < EPS);
}

#[test]
fn worst_scored_true_item_ranks_last() {
    let mut evaluator = RankingEvaluator::begin(EvaluatorConfig::default(), &vocab(), None).unwrap();

    let mut log_probs = vec![-1.0_f32; WIDTH];
    log_probs[9] = -100.0;
    let batch = EvalBatch {
        log_probs: RowMajor::new(&log_probs, WIDTH).unwrap(),
        input_ids: RowMajor::new(&[1, 2, 3, 4], SEQ_LEN).unwrap(),
        masked_ids: RowMajor::new(&[9], 1).unwrap(),
        info: &[0],
    };
    evaluator.step(&batch).unwrap();
    let metrics = evaluator.finalize().unwrap();

    assert_eq!(metrics.valid_users, 1);
    assert_eq!(metrics.hit_10, 0.0);
    assert_eq!(metrics.ndcg_10, 0.0);
    assert!((metrics.map - 1.0 / 101.0).abs() < EPS);
}

#[test]
fn metrics_are_bounded_and_ordered_by_cutoff() {
    let metrics = evaluate(&Scrambled, batches(4, 16), EvaluatorConfig::default(), &vocab(), None).unwrap();

    assert_eq!(metrics.valid_users, 64);
    for (name, value) in metrics.entries() {
        if name != "valid_user" {
            assert!((0.0..=1.0).contains(&value), "{name} = {value}");
        }
    }
    assert!(metrics.hit_1 <= metrics.hit_5 && metrics.hit_5 <= metrics.hit_10);
    assert!(metrics.ndcg_5 <= metrics.hit_5 + EPS);
    assert!(metrics.ndcg_10 <= metrics.hit_10 + EPS);
}

// ==================== Determinism ====================

#[test]
fn same_seed_gives_identical_metrics() {
    for sampler in [SamplerKind::Popularity, SamplerKind::Uniform] {
        let config = EvaluatorConfig {
            sampler,
            ..Default::default()
        };
        let first = evaluate(&Scrambled, batches(5, 10), config.clone(), &vocab(), None).unwrap();
        let second = evaluate(&Scrambled, batches(5, 10), config, &vocab(), None).unwrap();
        assert_eq!(first, second, "{sampler:?}");
    }
}

#[test]
fn batch_boundaries_do_not_change_results() {
    let config = EvaluatorConfig::default();
    let one = evaluate(&Scrambled, vec![example_batch(0, 30)], config.clone(), &vocab(), None).unwrap();
    let many = evaluate(&Scrambled, batches(3, 10), config, &vocab(), None).unwrap();
    assert_eq!(one, many);
}

// ==================== Lifecycle ====================

proptest! {
    #[test]
    fn step_counts_every_position_once(
        scores in prop::collection::vec(-50.0f32..0.0, WIDTH),
        examples in 0usize..12,
    ) {
        let mut evaluator = RankingEvaluator::begin(EvaluatorConfig::default(), &vocab(), None).unwrap();
        let batch = example_batch(0, examples);
        let log_probs = scores.repeat(examples);

        let before = evaluator.accumulator().valid_users;
        let evaluated = evaluator
            .step(&EvalBatch {
                log_probs: RowMajor::new(&log_probs, WIDTH).unwrap(),
                input_ids: RowMajor::new(&batch.input_ids, SEQ_LEN).unwrap(),
                masked_ids: RowMajor::new(&batch.masked_ids, 1).unwrap(),
                info: &batch.info,
            })
            .unwrap();

        prop_assert_eq!(evaluated, examples);
        prop_assert_eq!(evaluator.accumulator().valid_users - before, examples as u64);

        let result = evaluator.finalize();
        if examples == 0 {
            prop_assert!(matches!(result, Err(EvalError::NoEvaluableExamples)));
        } else {
            prop_assert_eq!(result.unwrap().valid_users, examples as u64);
        }
    }
}

#[test]
fn no_batches_fails_to_finalize() {
    let result = evaluate(&Oracle, Vec::new(), EvaluatorConfig::default(), &vocab(), None);
    assert!(matches!(result, Err(EvalError::NoEvaluableExamples)));
}

#[test]
fn predictor_failure_is_reported() {
    let result = evaluate(&Offline, batches(1, 2), EvaluatorConfig::default(), &vocab(), None);
    let err = result.unwrap_err();
    assert!(matches!(err, EvalError::Predictor(_)));
    assert!(err.to_string().contains("model unavailable"));
}

#[test]
fn empty_vocabulary_is_rejected_at_begin() {
    let result = RankingEvaluator::begin(EvaluatorConfig::default(), &ItemVocabulary::default(), None);
    assert!(matches!(result, Err(EvalError::Vocabulary(_))));
}

#[test]
fn small_vocabulary_exhausts_sampling_rounds() {
    let small = ItemVocabulary::from_counts((1..=40).map(|id| (id, 3)));
    let config = EvaluatorConfig {
        max_sampling_rounds: 5,
        ..Default::default()
    };
    let mut evaluator = RankingEvaluator::begin(config, &small, None).unwrap();

    let log_probs = vec![-1.0_f32; 41];
    let batch = EvalBatch {
        log_probs: RowMajor::new(&log_probs, 41).unwrap(),
        input_ids: RowMajor::new(&[1, 2], 2).unwrap(),
        masked_ids: RowMajor::new(&[3], 1).unwrap(),
        info: &[0],
    };
    assert!(matches!(
        evaluator.step(&batch),
        Err(EvalError::NegativeSampling { wanted: 100, .. })
    ));
    assert_eq!(evaluator.accumulator().valid_users, 0);
}

// ==================== Inputs and Outputs ====================

#[test]
fn held_out_table_from_json_excludes_seen_items() {
    // Every item but the true one outscores it; only unseen items remain as negatives
    let seen: Vec<ItemId> = (2..=VOCAB).filter(|id| id % 2 == 0).collect();
    let json = serde_json::json!({ "user_7": [seen, [1]], "other": [[1]] }).to_string();
    let held_out = HeldOutTable::from_json_str(&json).unwrap();
    assert_eq!(held_out.len(), 1);

    let mut log_probs = vec![-9.0_f32; WIDTH];
    for id in (2..=VOCAB as usize).step_by(2) {
        log_probs[id] = 0.0;
    }
    log_probs[3] = -1.0;

    let config = EvaluatorConfig {
        sampler: SamplerKind::Uniform,
        ..Default::default()
    };
    let mut evaluator = RankingEvaluator::begin(config, &vocab(), Some(held_out)).unwrap();
    evaluator
        .step(&EvalBatch {
            log_probs: RowMajor::new(&log_probs, WIDTH).unwrap(),
            input_ids: RowMajor::new(&[5, 7], 2).unwrap(),
            masked_ids: RowMajor::new(&[3], 1).unwrap(),
            info: &[7],
        })
        .unwrap();

    let metrics = evaluator.finalize().unwrap();
    assert!((metrics.hit_1 - 1.0).abs() < EPS);
}

#[test]
fn multi_row_predictions_rank_first_row_only() {
    let config = EvaluatorConfig {
        predictions_per_example: 2,
        ..Default::default()
    };
    let mut batch = example_batch(0, 3);
    batch.predictions_per_example = 2;
    batch.masked_ids = batch.masked_ids.iter().flat_map(|&id| [id, 0]).collect();

    struct TwoRows;
    impl MaskedPredictor for TwoRows {
        type Error = io::Error;

        fn predict(&self, batch: &ExampleBatch) -> Result<Predictions, io::Error> {
            let mut log_probs = Vec::new();
            for masked in batch.masked_ids.chunks(batch.predictions_per_example) {
                let mut first = vec![-8.0_f32; WIDTH];
                first[masked[0] as usize] = 0.0;
                log_probs.extend(first);
                log_probs.extend(vec![-1.0_f32; WIDTH]);
            }
            Ok(Predictions {
                log_probs,
                vocabulary_width: WIDTH,
            })
        }
    }

    let metrics = evaluate(&TwoRows, vec![batch], config, &vocab(), None).unwrap();
    assert_eq!(metrics.valid_users, 3);
    assert!((metrics.hit_1 - 1.0).abs() < EPS);
}

#[test]
fn results_file_lists_sorted_metrics() {
    let metrics = evaluate(&Oracle, batches(1, 4), EvaluatorConfig::default(), &vocab(), None).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eval_results.txt");
    metrics
        .write_results(BufWriter::new(File::create(&path).unwrap()))
        .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.first(), Some(&"hit@1 = 1"));
    assert_eq!(lines.last(), Some(&"valid_user = 4"));
    assert_eq!(lines.len(), 8);

    let summary = metrics.to_string();
    assert!(summary.contains("ap:1"));
    assert!(summary.ends_with("valid_user:4"));
}
