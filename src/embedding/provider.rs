//! 프로바이더 임베더 - 외부 API + 호출 단위 폴백
//!
//! 타임아웃, 전송 실패, 잘못된 응답은 호출자에게 전파되지 않고
//! 같은 차원의 폴백 벡터로 대체됩니다.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Embedder, Embedding, EmbeddingProvider, EmbeddingScheme, FallbackEmbedder};

/// 외부 프로바이더 기반 임베더
pub struct ProviderEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    fallback: FallbackEmbedder,
    timeout: Duration,
}

impl ProviderEmbedder {
    /// # Arguments
    /// * `provider` - 외부 임베딩 프로바이더
    /// * `timeout` - 호출당 타임아웃. 초과 시 해당 호출만 폴백
    pub fn new(provider: Arc<dyn EmbeddingProvider>, timeout: Duration) -> Self {
        // 폴백도 프로바이더 차원으로 생성해야 인덱스 차원이 유지됨
        let fallback = FallbackEmbedder::new(provider.dimension());
        Self {
            provider,
            fallback,
            timeout,
        }
    }

    fn fall_back(&self, text: &str) -> Embedding {
        Embedding {
            vector: self.fallback.embed_text(text),
            scheme: EmbeddingScheme::Fallback,
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed(&self, text: &str) -> Embedding {
        if text.trim().is_empty() {
            return self.fall_back(text);
        }

        match tokio::time::timeout(self.timeout, self.provider.embed(text)).await {
            Ok(Ok(vector)) if vector.len() == self.dimension() => Embedding {
                vector,
                scheme: EmbeddingScheme::Provider,
            },
            Ok(Ok(vector)) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    expected = self.dimension(),
                    actual = vector.len(),
                    "Provider returned wrong dimension, using fallback embedding"
                );
                self.fall_back(text)
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    "Provider embedding failed, using fallback: {:#}",
                    e
                );
                self.fall_back(text)
            }
            Err(_) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    "Provider embedding timed out after {:?}, using fallback",
                    self.timeout
                );
                self.fall_back(text)
            }
        }
    }

    fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    fn scheme(&self) -> EmbeddingScheme {
        EmbeddingScheme::Provider
    }
}

// ============================================================================
// Tests
// ============================================================================
