//! Vector math and exact top-k selection over embeddings.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Default number of results returned by [`top_k_similar`] callers.
pub const DEFAULT_TOP_K: usize = 10;

fn ensure_non_empty(v: &[f32], what: &str) -> Result<()> {
    if v.is_empty() {
        return Err(EmbeddingError::invalid_input(format!("{what} is empty")));
    }
    Ok(())
}

fn ensure_same_dimension(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

fn sum_of_squares(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum()
}

/// Compute the dot product between two embeddings.
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32> {
    ensure_non_empty(a, "left vector")?;
    ensure_non_empty(b, "right vector")?;
    ensure_same_dimension(a, b)?;

    Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

/// Euclidean norm of a vector.
pub fn magnitude(v: &[f32]) -> Result<f32> {
    ensure_non_empty(v, "vector")?;
    Ok(sum_of_squares(v).sqrt())
}

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical direction
/// - 0.0 means orthogonal vectors
/// - -1.0 means opposite vectors
///
/// Fails with [`EmbeddingError::ComputationFailed`] when either vector has
/// zero magnitude, since the angle is undefined.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    ensure_same_dimension(a, b)?;
    ensure_non_empty(a, "vector")?;

    // Accumulate in f64: the product of two f32 sums of squares can leave
    // f32 range even when every input is a normal f32.
    let (mut dot, mut squares_a, mut squares_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        squares_a += x * x;
        squares_b += y * y;
    }
    if squares_a == 0.0 || squares_b == 0.0 {
        return Err(EmbeddingError::ComputationFailed(
            "cosine similarity is undefined for a zero-magnitude vector".to_string(),
        ));
    }

    // sqrt(x * x) == x in IEEE arithmetic, so a vector compared with itself
    // scores exactly 1.0.
    Ok((dot / (squares_a * squares_b).sqrt()) as f32)
}

/// Compute the euclidean distance between two embeddings.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    ensure_same_dimension(a, b)?;
    ensure_non_empty(a, "vector")?;

    let sum: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();

    Ok(sum.sqrt())
}

/// Scale an embedding to unit length, keeping its direction.
pub fn normalize(embedding: &[f32]) -> Result<Embedding> {
    let magnitude = magnitude(embedding)?;
    if magnitude == 0.0 {
        return Err(EmbeddingError::ComputationFailed(
            "cannot normalize a zero-magnitude vector".to_string(),
        ));
    }

    Ok(embedding.iter().map(|x| x / magnitude).collect())
}

/// Element-wise mean of a set of embeddings.
pub fn centroid(embeddings: &[Embedding]) -> Result<Embedding> {
    let Some(first) = embeddings.first() else {
        return Err(EmbeddingError::invalid_input(
            "cannot compute the centroid of zero vectors",
        ));
    };

    let dim = first.len();
    for e in embeddings {
        if e.len() != dim {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dim,
                actual: e.len(),
            });
        }
    }

    let mut result = vec![0.0f32; dim];
    for embedding in embeddings {
        for (acc, val) in result.iter_mut().zip(embedding.iter()) {
            *acc += val;
        }
    }

    let n = embeddings.len() as f32;
    for acc in &mut result {
        *acc /= n;
    }

    Ok(result)
}

/// Position of a candidate in the input slice together with its score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredIndex {
    /// Index of the candidate in the slice passed to [`top_k_similar`].
    pub index: usize,

    /// Cosine similarity against the query.
    pub score: f32,
}

/// Higher score first, then lower candidate index.
type RankKey = (OrderedFloat<f32>, Reverse<usize>);

fn rank_key(score: f32, index: usize) -> RankKey {
    (OrderedFloat(score), Reverse(index))
}

/// Find the `k` candidates most similar to `query` by cosine similarity.
///
/// Results are ordered by descending score; equal scores keep the order of
/// `candidates`. A candidate that cannot be scored against the query (its
/// dimension differs, or it has zero magnitude) gets `f32::NEG_INFINITY`
/// instead of failing the whole search.
pub fn top_k_similar<E>(query: &[f32], candidates: &[E], k: usize) -> Result<Vec<ScoredIndex>>
where
    E: AsRef<[f32]>,
{
    if k == 0 {
        return Err(EmbeddingError::invalid_input("k must be positive"));
    }
    ensure_non_empty(query, "query vector")?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    if magnitude(query)? == 0.0 {
        return Err(EmbeddingError::ComputationFailed(
            "query vector has zero magnitude".to_string(),
        ));
    }

    // Min-heap of the best `k` keys seen so far; the root is the weakest.
    let mut heap: BinaryHeap<Reverse<RankKey>> = BinaryHeap::with_capacity(k.min(candidates.len()));
    let mut unscorable = 0usize;

    for (index, candidate) in candidates.iter().enumerate() {
        let score = match cosine_similarity(query, candidate.as_ref()) {
            Ok(score) if !score.is_nan() => score,
            _ => {
                unscorable += 1;
                f32::NEG_INFINITY
            }
        };

        let key = rank_key(score, index);
        if heap.len() < k {
            heap.push(Reverse(key));
        } else if heap.peek().is_some_and(|Reverse(weakest)| key > *weakest) {
            heap.pop();
            heap.push(Reverse(key));
        }
    }

    if unscorable > 0 {
        debug!("{unscorable} of {} candidates could not be scored", candidates.len());
    }

    let mut keys: Vec<RankKey> = heap.into_iter().map(|Reverse(key)| key).collect();
    keys.sort_unstable_by(|a, b| b.cmp(a));

    Ok(keys
        .into_iter()
        .map(|(score, Reverse(index))| ScoredIndex {
            index,
            score: score.0,
        })
        .collect())
}
