//! Batch embedding service
//!
//! Fans sub-batches out to the provider with a bounded number of in-flight
//! requests, preserves input order, and validates every returned vector
//! before anything reaches the store.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use std::sync::Arc;

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::traits::{Embedder, EmbeddingService};

/// Texts per provider request
const SUB_BATCH_SIZE: usize = 32;

/// Order-preserving batch service over any [`Embedder`]
pub struct BatchEmbeddingService {
    provider: Arc<dyn Embedder>,
    concurrency: usize,
}

impl BatchEmbeddingService {
    pub fn new(provider: Arc<dyn Embedder>, concurrency: usize) -> Self {
        Self {
            provider,
            concurrency: concurrency.max(1),
        }
    }

    fn validate(&self, vectors: &[Vec<f32>], offset: usize) -> EmbeddingResult<()> {
        let expected = self.provider.dimension();
        for (i, vector) in vectors.iter().enumerate() {
            let index = offset + i;
            if vector.len() != expected {
                return Err(EmbeddingError::InvalidVector {
                    index,
                    reason: format!("dimension {} != configured {expected}", vector.len()),
                });
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(EmbeddingError::InvalidVector {
                    index,
                    reason: "non-finite component".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingService for BatchEmbeddingService {
    async fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batches: Vec<Vec<String>> = texts
            .chunks(SUB_BATCH_SIZE)
            .map(<[String]>::to_vec)
            .collect();

        // `buffered` caps the in-flight requests and yields in input order;
        // the first failed request cancels the remainder of the batch.
        let mut results = stream::iter(batches.into_iter().map(|batch| {
            let provider = Arc::clone(&self.provider);
            async move {
                let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
                provider.embed_batch(&refs).await
            }
        }))
        .buffered(self.concurrency);

        let mut vectors = Vec::with_capacity(texts.len());
        while let Some(result) = results.next().await {
            let batch_vectors = result?;
            self.validate(&batch_vectors, vectors.len())?;
            vectors.extend(batch_vectors);
        }

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                sent: texts.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.provider.dimension()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic in-memory provider; vector[0] encodes the text length
    struct FakeEmbedder {
        dimension: usize,
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
        bad_dimension: bool,
    }

    impl FakeEmbedder {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                calls: AtomicUsize::new(0),
                fail_on_call: None,
                bad_dimension: false,
            }
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_call == Some(call) {
                return Err(EmbeddingError::Upstream {
                    message: "boom".to_string(),
                });
            }
            let dim = if self.bad_dimension {
                self.dimension + 1
            } else {
                self.dimension
            };
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; dim];
                    if let Some(first) = v.first_mut() {
                        #[allow(clippy::cast_precision_loss)]
                        {
                            *first = t.len() as f32;
                        }
                    }
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            "fake"
        }
    }

    #[tokio::test]
    async fn preserves_order_across_sub_batches() {
        let service = BatchEmbeddingService::new(Arc::new(FakeEmbedder::new(4)), 3);
        // 70 texts spans three sub-batches
        let texts: Vec<String> = (0..70).map(|i| "x".repeat(i + 1)).collect();

        let vectors = service.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 70);
        for (i, vector) in vectors.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let expected = (i + 1) as f32;
            assert!(
                (vector[0] - expected).abs() < f32::EPSILON,
                "vector {i} out of order"
            );
        }
    }

    #[tokio::test]
    async fn one_failed_request_cancels_the_batch() {
        let provider = FakeEmbedder {
            fail_on_call: Some(1),
            ..FakeEmbedder::new(4)
        };
        let service = BatchEmbeddingService::new(Arc::new(provider), 2);
        let texts: Vec<String> = (0..64).map(|i| format!("text {i}")).collect();

        let err = service.embed(&texts).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Upstream { .. }));
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let provider = FakeEmbedder {
            bad_dimension: true,
            ..FakeEmbedder::new(4)
        };
        let service = BatchEmbeddingService::new(Arc::new(provider), 1);

        let err = service.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidVector { index: 0, .. }));
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let service = BatchEmbeddingService::new(Arc::new(FakeEmbedder::new(4)), 1);
        assert!(service.embed(&[]).await.unwrap().is_empty());
    }
}
