//! Top-K ranking metrics over sampled candidate pools
//!
//! For every evaluated position the true item is ranked against its
//! negatives. Rank 0 is best.
//!
//! - NDCG@K: 1 / log2(rank + 2) when rank < K
//! - Hit@K: 1 when rank < K
//! - MAP component: 1 / (rank + 1), accumulated unconditionally

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};

use super::EvalError;
use crate::types::ItemId;

/// Running totals for one evaluation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalAccumulator {
    pub valid_users: u64,
    pub ndcg_1: f64,
    pub hit_1: f64,
    pub ndcg_5: f64,
    pub hit_5: f64,
    pub ndcg_10: f64,
    pub hit_10: f64,
    pub reciprocal_rank_sum: f64,
}

impl EvalAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one evaluated position with the true item at `rank`
    pub fn record(&mut self, rank: usize) {
        self.valid_users += 1;

        let gain = 1.0 / ((rank + 2) as f64).log2();
        if rank < 1 {
            self.ndcg_1 += 1.0;
            self.hit_1 += 1.0;
        }
        if rank < 5 {
            self.ndcg_5 += gain;
            self.hit_5 += 1.0;
        }
        if rank < 10 {
            self.ndcg_10 += gain;
            self.hit_10 += 1.0;
        }

        self.reciprocal_rank_sum += 1.0 / (rank + 1) as f64;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Averages over evaluated positions
    pub fn finalize(&self) -> Result<EvalMetrics, EvalError> {
        if self.valid_users == 0 {
            return Err(EvalError::NoEvaluableExamples);
        }

        let n = self.valid_users as f64;
        Ok(EvalMetrics {
            ndcg_1: self.ndcg_1 / n,
            hit_1: self.hit_1 / n,
            ndcg_5: self.ndcg_5 / n,
            hit_5: self.hit_5 / n,
            ndcg_10: self.ndcg_10 / n,
            hit_10: self.hit_10 / n,
            map: self.reciprocal_rank_sum / n,
            valid_users: self.valid_users,
        })
    }
}

/// Final metrics of one evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub ndcg_1: f64,
    pub hit_1: f64,
    pub ndcg_5: f64,
    pub hit_5: f64,
    pub ndcg_10: f64,
    pub hit_10: f64,
    pub map: f64,
    pub valid_users: u64,
}

impl EvalMetrics {
    /// `(name, value)` pairs sorted by name
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        let mut entries = vec![
            ("hit@1", self.hit_1),
            ("hit@10", self.hit_10),
            ("hit@5", self.hit_5),
            ("map", self.map),
            ("ndcg@1", self.ndcg_1),
            ("ndcg@10", self.ndcg_10),
            ("ndcg@5", self.ndcg_5),
            ("valid_user", self.valid_users as f64),
        ];
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// One `name = value` line per metric
    pub fn write_results<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for (name, value) in self.entries() {
            writeln!(writer, "{name} = {value}")?;
        }
        writer.flush()
    }
}

impl fmt::Display for EvalMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ndcg@1:{}, hit@1:{}, ndcg@5:{}, hit@5:{}, ndcg@10:{}, hit@10:{}, ap:{}, valid_user:{}",
            self.ndcg_1,
            self.hit_1,
            self.ndcg_5,
            self.hit_5,
            self.ndcg_10,
            self.hit_10,
            self.map,
            self.valid_users
        )
    }
}

// ==================== Ranking ====================

/// Sort key: negated log-probability, NaN treated as the worst score
fn sort_score(log_prob: f32) -> f32 {
    if log_prob.is_nan() {
        f32::INFINITY
    } else {
        -log_prob
    }
}

/// Check whether a row contains NaN or infinite values
pub fn has_invalid_scores(row: &[f32]) -> bool {
    row.iter().any(|x| x.is_nan() || x.is_infinite())
}

/// Position of `candidates[0]` after a stable ascending sort of negated log-probabilities
///
/// Equal scores keep candidate order, so ties with the true item rank after it.
pub fn rank_of_true_item(log_probs: &[f32], candidates: &[ItemId]) -> Result<usize, EvalError> {
    let score_of = |item: ItemId| -> Result<f32, EvalError> {
        log_probs
            .get(item as usize)
            .copied()
            .map(sort_score)
            .ok_or(EvalError::ItemOutOfRange {
                item,
                width: log_probs.len(),
            })
    };

    let Some((&true_item, negatives)) = candidates.split_first() else {
        return Err(EvalError::Shape("empty candidate pool".to_string()));
    };
    let target = score_of(true_item)?;

    let mut rank = 0;
    for &item in negatives {
        if score_of(item)? < target {
            rank += 1;
        }
    }
    Ok(rank)
}
