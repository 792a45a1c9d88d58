//! 임베딩 모듈 - 텍스트를 고정 차원 벡터로 변환
//!
//! 두 가지 전략을 제공합니다:
//! - `ProviderEmbedder`: 외부 임베딩 API (Gemini) 호출, 실패 시 폴백
//! - `FallbackEmbedder`: 해시 기반 결정적 TF 가중치 벡터
//!
//! 전략은 생성 시점에 한 번 선택되며, 인덱스 세대 동안 차원이 고정됩니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&config)?;
//! let embedding = embedder.embed("Hello, world!").await;
//! assert_eq!(embedding.vector.len(), embedder.dimension());
//! ```

mod fallback;
mod gemini;
mod provider;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;

pub use fallback::FallbackEmbedder;
pub use gemini::{GeminiEmbedding, VALID_DIMENSIONS};
pub use provider::ProviderEmbedder;

// ============================================================================
// Types
// ============================================================================

/// 벡터를 만든 임베딩 전략 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingScheme {
    /// 외부 임베딩 API
    Provider,
    /// 해시 기반 결정적 임베딩
    Fallback,
}

impl EmbeddingScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Fallback => "fallback",
        }
    }

    /// 저장소 문자열에서 복원
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provider" => Some(Self::Provider),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

impl fmt::Display for EmbeddingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 임베딩 결과 (벡터 + 실제로 사용된 전략)
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub scheme: EmbeddingScheme,
}

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 외부 임베딩 서비스 트레이트
///
/// 실패(타임아웃, 잘못된 응답)는 에러로 반환하고,
/// 폴백 처리는 `ProviderEmbedder`가 담당합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Embedder Trait
// ============================================================================

/// 엔진이 사용하는 임베딩 인터페이스
///
/// 실패하지 않습니다. 반환 벡터의 길이는 항상 `dimension()`과 같습니다.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Embedding;

    fn dimension(&self) -> usize;

    /// 이 임베더의 기본 전략
    fn scheme(&self) -> EmbeddingScheme;
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Option<String> {
    ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"]
        .into_iter()
        .find_map(|var| std::env::var(var).ok().filter(|key| !key.is_empty()))
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_some()
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베더 생성
///
/// API 키가 있으면 Gemini 프로바이더 + 폴백, 없으면 폴백 전용.
pub fn create_embedder(config: &RetrievalConfig) -> Result<Arc<dyn Embedder>> {
    match get_api_key() {
        Some(api_key) => {
            let gemini = GeminiEmbedding::with_dimension(api_key, config.provider_dimension)?;
            tracing::info!(
                "Using Gemini API embedding (dimension: {})",
                gemini.dimension()
            );
            Ok(Arc::new(ProviderEmbedder::new(
                Arc::new(gemini),
                config.provider_timeout(),
            )))
        }
        None => {
            tracing::info!(
                "No embedding API key set, using fallback embedding (dimension: {})",
                config.fallback_dimension
            );
            Ok(Arc::new(FallbackEmbedder::new(config.fallback_dimension)))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_round_trip_strings() {
        for scheme in [EmbeddingScheme::Provider, EmbeddingScheme::Fallback] {
            assert_eq!(EmbeddingScheme::parse(scheme.as_str()), Some(scheme));
        }
        assert_eq!(EmbeddingScheme::parse("tfidf"), None);
        assert_eq!(EmbeddingScheme::Fallback.to_string(), "fallback");
    }

    #[tokio::test]
    async fn test_create_embedder_without_key_uses_fallback() {
        std::env::remove_var("GEMINI_API_KEY");
        std::env::remove_var("GOOGLE_AI_API_KEY");

        let config = RetrievalConfig {
            fallback_dimension: 64,
            ..Default::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.scheme(), EmbeddingScheme::Fallback);
        assert_eq!(embedder.dimension(), 64);

        let embedding = embedder.embed("notes about rust").await;
        assert_eq!(embedding.vector.len(), 64);
        assert_eq!(embedding.scheme, EmbeddingScheme::Fallback);
    }
}
