//! Deterministic feature-hashing text embedding.
//!
//! No model weights, no GPU, no extra ML dependency stack. A 384-dimensional
//! hashed bag-of-tokens vector is enough to drive cosine-similarity
//! agreement scoring and is fully deterministic, which matters for the
//! cache (same text always embeds to the same vector).

use sha2::{Digest, Sha256};

/// Dimensionality chosen to match common small sentence-embedding models,
/// so downstream scoring code isn't tied to an unusual vector size.
pub const EMBEDDING_DIM: usize = 384;

/// Embed `text` into a unit-length `EMBEDDING_DIM`-dimensional vector.
///
/// Tokenizes on whitespace/punctuation, hashes each token into one of
/// `EMBEDDING_DIM` buckets with SHA-256, and accumulates a signed count per
/// bucket (the sign comes from another bit of the same hash, a standard
/// feature-hashing trick that reduces collision bias). The result is
/// L2-normalized so cosine similarity reduces to a dot product.
pub fn embed(text: &str) -> Vec<f32> {
    let mut buckets = vec![0f32; EMBEDDING_DIM];

    for token in tokenize(text) {
        let digest = Sha256::digest(token.as_bytes());
        let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
            % EMBEDDING_DIM;
        let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
        buckets[bucket] += sign;
    }

    normalize(&mut buckets);
    buckets
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Cosine similarity between two equal-length vectors, `0.0` if either is
/// the zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic() {
        let a = embed("The quick brown fox jumps over the lazy dog.");
        let b = embed("The quick brown fox jumps over the lazy dog.");
        assert_eq!(a, b);
    }

    #[test]
    fn embedding_is_unit_length() {
        let v = embed("deterministic feature hashing");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn identical_text_has_similarity_one() {
        let v = embed("agreement scoring across an ensemble of models");
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn unrelated_text_has_lower_similarity_than_identical() {
        let a = embed("the weather in paris is sunny today");
        let b = embed("quantum computers factor large integers quickly");
        let self_sim = cosine_similarity(&a, &a);
        let cross_sim = cosine_similarity(&a, &b);
        assert!(cross_sim < self_sim);
    }

    #[test]
    fn empty_text_does_not_divide_by_zero() {
        let v = embed("");
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&v, &v), 0.0);
    }
}
