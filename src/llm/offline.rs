use async_trait::async_trait;

use super::{LlmError, LlmGateway};

/// Dimensions of the local hashed bag-of-words embedding.
pub const HASHED_DIMENSIONS: usize = 768;

/// Model id stored alongside hashed embeddings.
pub const OFFLINE_EMBEDDING_MODEL: &str = "offline-hashed-768";

/// Gateway for air-gapped repositories: embeddings are computed locally and
/// structured generation is refused.
#[derive(Debug, Default, Clone)]
pub struct OfflineGateway;

#[async_trait]
impl LlmGateway for OfflineGateway {
    fn embedding_model(&self) -> &str {
        OFFLINE_EMBEDDING_MODEL
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(hashed_embedding(text))
    }

    async fn generate_structured(&self, _prompt: &str) -> Result<serde_json::Value, LlmError> {
        Err(LlmError::Disabled)
    }
}

/// Deterministic bag-of-words embedding.
///
/// Words are lowercased, stripped of punctuation, and kept when longer than
/// three characters; each word bumps one FNV-1a bucket. The vector is
/// L2-normalised (all zeros for text with no qualifying words).
pub fn hashed_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0f32; HASHED_DIMENSIONS];

    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();

    for word in cleaned.split_whitespace().filter(|w| w.chars().count() > 3) {
        let bucket = (fnv1a(word) % HASHED_DIMENSIONS as u64) as usize;
        vector[bucket] += 1.0;
    }

    let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for v in &mut vector {
            *v /= magnitude;
        }
    }
    vector
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_is_deterministic_and_normalised() {
        let a = hashed_embedding("Fix login crash when password contains unicode");
        let b = hashed_embedding("Fix login crash when password contains unicode");
        assert_eq!(a, b);
        assert_eq!(a.len(), HASHED_DIMENSIONS);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_short_words_and_punctuation_ignored() {
        assert_eq!(hashed_embedding("a an the, of!"), vec![0f32; HASHED_DIMENSIONS]);
        assert_eq!(hashed_embedding("Login!"), hashed_embedding("login"));
    }

    #[tokio::test]
    async fn test_generation_is_disabled() {
        let gateway = OfflineGateway;
        assert!(matches!(
            gateway.generate_structured("{}").await,
            Err(LlmError::Disabled)
        ));
        assert_eq!(gateway.embed("database migration").await.unwrap().len(), HASHED_DIMENSIONS);
    }
}
