//! Embedding backends for the semantic cache tier.
//!
//! The contract is small: a fixed-dimension, L2-normalised real vector, and
//! determinism - the same text must embed to the same vector across process
//! lifetimes, or a restart would silently degrade the hit rate. A stronger
//! model can be plugged in behind [`Embedder`] without touching cache logic.

/// Capability the semantic tier depends on.
pub trait Embedder: Send + Sync {
    /// Embed `text` into a fixed-dimension, L2-normalised vector.
    /// `None` means the backend is unavailable and tier 2 is inert.
    fn embed(&self, text: &str) -> Option<Vec<f32>>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// Default lightweight backend: hashed character-trigram frequency vector.
///
/// Input is lowercased and capped at 2048 chars to bound cost. Each trigram
/// is bucketed by a blake3 digest of its bytes, so the mapping is stable
/// across platforms and process lifetimes.
#[derive(Debug, Clone)]
pub struct NgramEmbedder {
    dim: usize,
}

impl NgramEmbedder {
    pub const DEFAULT_DIM: usize = 256;

    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for NgramEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIM)
    }
}

impl Embedder for NgramEmbedder {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let lowered: String = text.to_lowercase().chars().take(2048).collect();
        let chars: Vec<char> = lowered.chars().collect();

        let mut vec = vec![0.0f32; self.dim];
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            let digest = blake3::hash(trigram.as_bytes());
            let bucket = u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap())
                as usize
                % self.dim;
            vec[bucket] += 1.0;
        }

        let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vec.iter_mut() {
                *v /= norm;
            }
        }
        Some(vec)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn name(&self) -> &'static str {
        "ngram"
    }
}

/// Backend used when semantic caching is switched off entirely.
#[derive(Debug, Clone, Default)]
pub struct DisabledEmbedder;

impl Embedder for DisabledEmbedder {
    fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }

    fn dimension(&self) -> usize {
        0
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Cosine similarity between two equal-length vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_is_deterministic() {
        let embedder = NgramEmbedder::default();
        let a = embedder.embed("scan example.com for vulnerabilities").unwrap();
        let b = embedder.embed("scan example.com for vulnerabilities").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_embedding_is_normalised() {
        let embedder = NgramEmbedder::default();
        let vec = embedder.embed("what is 2+2?").unwrap();
        assert_eq!(vec.len(), NgramEmbedder::DEFAULT_DIM);
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_similar_text_scores_higher() {
        let embedder = NgramEmbedder::default();
        let base = embedder
            .embed("summarise the open ports found on example.com")
            .unwrap();
        let near = embedder
            .embed("summarise the open ports found on example.org")
            .unwrap();
        let far = embedder.embed("what is the capital of france").unwrap();

        assert!(cosine(&base, &near) > cosine(&base, &far));
        assert!(cosine(&base, &base) > 0.999);
    }

    #[test]
    fn test_empty_input() {
        let embedder = NgramEmbedder::default();
        let vec = embedder.embed("").unwrap();
        assert!(vec.iter().all(|v| *v == 0.0));
        assert_eq!(cosine(&vec, &vec), 0.0);
    }
}
