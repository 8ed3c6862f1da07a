//! Negative Candidate Sampling
//!
//! Builds the candidate pool for one masked position: the true item first,
//! followed by negatives the student has not interacted with.
//!
//! Samplers:
//! - Popularity: rounds of weighted draws without replacement, weight ∝ item frequency
//! - Uniform: independent draws over `[1, vocabulary_size]`
//!
//! Both are driven by a seeded ChaCha8 stream and give up after a bounded
//! number of rounds instead of looping forever on tiny vocabularies.

use rand::prelude::*;
use rand::seq::index;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

use super::vocab::ItemVocabulary;
use super::EvalError;
use crate::config::SamplerKind;
use crate::types::ItemId;

pub struct NegativeSampler {
    kind: SamplerKind,
    rng: ChaCha8Rng,
    /// Items that can be drawn by popularity (positive count)
    ids: Vec<ItemId>,
    weights: Vec<f64>,
    /// Upper bound of the uniform id range
    vocabulary_size: ItemId,
    num_negatives: usize,
    max_rounds: usize,
}

impl NegativeSampler {
    pub fn new(
        kind: SamplerKind,
        vocab: &ItemVocabulary,
        num_negatives: usize,
        max_rounds: usize,
        seed: u64,
    ) -> Result<Self, EvalError> {
        if vocab.is_empty() {
            return Err(EvalError::Vocabulary("vocabulary is empty".to_string()));
        }
        let total = vocab.total_count();
        if kind == SamplerKind::Popularity && total == 0 {
            return Err(EvalError::Vocabulary(
                "vocabulary has no positive item counts".to_string(),
            ));
        }

        let (ids, weights): (Vec<ItemId>, Vec<f64>) = vocab
            .entries()
            .iter()
            .filter(|e| e.count > 0)
            .map(|e| (e.id, e.count as f64 / total.max(1) as f64))
            .unzip();

        let vocabulary_size = ItemId::try_from(vocab.len()).map_err(|_| {
            EvalError::Vocabulary(format!("vocabulary too large: {}", vocab.len()))
        })?;

        Ok(Self {
            kind,
            rng: ChaCha8Rng::seed_from_u64(seed),
            ids,
            weights,
            vocabulary_size,
            num_negatives,
            max_rounds: max_rounds.max(1),
        })
    }

    pub fn kind(&self) -> SamplerKind {
        self.kind
    }

    /// `[true_item, negatives...]` with exactly `num_negatives` negatives
    ///
    /// `excluded` must already contain the true item.
    pub fn candidate_pool(
        &mut self,
        true_item: ItemId,
        excluded: &HashSet<ItemId>,
    ) -> Result<Vec<ItemId>, EvalError> {
        match self.kind {
            SamplerKind::Popularity => self.popularity_pool(true_item, excluded),
            SamplerKind::Uniform => self.uniform_pool(true_item, excluded),
        }
    }

    fn popularity_pool(
        &mut self,
        true_item: ItemId,
        excluded: &HashSet<ItemId>,
    ) -> Result<Vec<ItemId>, EvalError> {
        let target = self.num_negatives + 1;
        let draw = target.min(self.ids.len());
        let mut pool = Vec::with_capacity(target);
        pool.push(true_item);
        let mut chosen: HashSet<ItemId> = HashSet::with_capacity(target);

        let weights = &self.weights;
        let ids = &self.ids;
        let rng = &mut self.rng;

        for _ in 0..self.max_rounds {
            if pool.len() >= target {
                break;
            }
            let sampled = index::sample_weighted(&mut *rng, ids.len(), |i| weights[i], draw)
                .map_err(|err| EvalError::Vocabulary(format!("invalid item weights: {err}")))?;

            for i in sampled.into_iter() {
                let id = ids[i];
                if !excluded.contains(&id) && chosen.insert(id) {
                    pool.push(id);
                }
            }
        }

        if pool.len() < target {
            return Err(EvalError::NegativeSampling {
                wanted: self.num_negatives,
                found: pool.len() - 1,
                rounds: self.max_rounds,
            });
        }

        pool.truncate(target);
        Ok(pool)
    }

    fn uniform_pool(
        &mut self,
        true_item: ItemId,
        excluded: &HashSet<ItemId>,
    ) -> Result<Vec<ItemId>, EvalError> {
        let mut pool = Vec::with_capacity(self.num_negatives + 1);
        pool.push(true_item);

        for _ in 0..self.num_negatives {
            let mut drawn = None;
            for _ in 0..self.max_rounds {
                let candidate = self.rng.gen_range(1..=self.vocabulary_size);
                if !excluded.contains(&candidate) {
                    drawn = Some(candidate);
                    break;
                }
            }

            match drawn {
                Some(id) => pool.push(id),
                None => {
                    return Err(EvalError::NegativeSampling {
                        wanted: self.num_negatives,
                        found: pool.len() - 1,
                        rounds: self.max_rounds,
                    })
                }
            }
        }

        Ok(pool)
    }
}
