use async_trait::async_trait;

use crate::error::Result;

/// Turns text into a dense vector for similarity search
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimension of vectors produced by [`EmbeddingProvider::encode`]
    fn dimension(&self) -> usize;
}

/// Cosine similarity in [-1, 1]; zero for mismatched or degenerate vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEmbeddingModel;

    #[test]
    fn test_identical_vectors() {
        let v = vec![0.3, -0.2, 0.9];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_opposite_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_mock_provider_encodes_same_text_identically() {
        let model = MockEmbeddingModel::new();
        let a = model.encode("北京 美食").await.unwrap();
        let b = model.encode("北京 美食").await.unwrap();
        assert_eq!(a.len(), model.dimension());
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }
}
