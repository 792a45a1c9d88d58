//! 폴백 임베딩 - 해시 기반 결정적 TF 가중치 벡터
//!
//! 각 고유 토큰에 대해:
//! 1. 토큰 해시와 뒤집은 토큰 해시를 계산
//! 2. `|hash| mod D` 슬롯에 `ln(1 + tf/N)` 가중치 (보조 슬롯은 절반)
//! 3. L2 정규화 (영벡터는 그대로)
//!
//! 같은 텍스트는 항상 비트 단위로 같은 벡터를 만듭니다.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{Embedder, Embedding, EmbeddingScheme};
use crate::knowledge::tokenize;

/// 해시 기반 결정적 임베더
#[derive(Debug, Clone)]
pub struct FallbackEmbedder {
    dimension: usize,
}

impl FallbackEmbedder {
    /// 차원을 지정하여 생성 (0이면 1로 올림)
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// 동기 임베딩 (순수 함수)
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let tokens = tokenize(text);
        if tokens.is_empty() {
            return vector;
        }

        // BTreeMap: 누적 순서를 고정해서 부동소수점 결과를 결정적으로 유지
        let mut term_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for token in &tokens {
            *term_counts.entry(token.as_str()).or_insert(0) += 1;
        }

        let total = tokens.len() as f32;

        for (term, count) in term_counts {
            let weight = (1.0 + count as f32 / total).ln();

            let reversed: String = term.chars().rev().collect();
            let primary = slot(string_hash(term), self.dimension);
            let secondary = slot(string_hash(&reversed), self.dimension);

            vector[primary] += weight;
            if secondary != primary {
                vector[secondary] += weight * 0.5;
            }
        }

        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for FallbackEmbedder {
    async fn embed(&self, text: &str) -> Embedding {
        Embedding {
            vector: self.embed_text(text),
            scheme: EmbeddingScheme::Fallback,
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn scheme(&self) -> EmbeddingScheme {
        EmbeddingScheme::Fallback
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 31 곱셈 문자열 해시 (32비트 wrapping)
fn string_hash(s: &str) -> i32 {
    s.chars()
        .fold(0i32, |hash, c| hash.wrapping_mul(31).wrapping_add(c as i32))
}

/// 해시 → 벡터 슬롯
#[inline]
fn slot(hash: i32, dimension: usize) -> usize {
    hash.unsigned_abs() as usize % dimension
}

/// L2 정규화 (norm이 0이면 변경하지 않음)
fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn l2_norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_deterministic() {
        let embedder = FallbackEmbedder::new(100);
        let text = "Retrieval augmented generation grounds answers in your notes.";

        let a = embedder.embed_text(text);
        let b = embedder.embed_text(text);

        let a_bits: Vec<u32> = a.iter().map(|x| x.to_bits()).collect();
        let b_bits: Vec<u32> = b.iter().map(|x| x.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
    }

    #[test]
    fn test_normalized() {
        let embedder = FallbackEmbedder::new(100);
        for text in [
            "a",
            "What is RAG?",
            "the the the quick brown fox",
            "한국어 노트 검색 테스트",
        ] {
            let v = embedder.embed_text(text);
            assert_eq!(v.len(), 100);
            assert!((l2_norm(&v) - 1.0).abs() < 1e-5, "norm for {text:?}");
        }
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = FallbackEmbedder::new(16);
        for text in ["", "   ", "?!..."] {
            let v = embedder.embed_text(text);
            assert_eq!(v.len(), 16);
            assert!(v.iter().all(|x| *x == 0.0));
        }
    }

    #[test]
    fn test_string_hash_known_values() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_eq!(string_hash("ab"), 97 * 31 + 98);
        // 오버플로는 wrapping
        let long = "z".repeat(64);
        let _ = string_hash(&long);
    }

    #[test]
    fn test_slot_handles_min_hash() {
        assert!(slot(i32::MIN, 100) < 100);
        assert_eq!(slot(-97, 100), 97);
        assert_eq!(slot(97, 100), 97);
    }

    #[test]
    fn test_single_token_weights() {
        // "ab": primary = hash("ab"), secondary = hash("ba")
        let embedder = FallbackEmbedder::new(1000);
        let v = embedder.embed_text("ab");

        let primary = slot(string_hash("ab"), 1000);
        let secondary = slot(string_hash("ba"), 1000);
        assert_ne!(primary, secondary);

        // 정규화 후 비율 2:1 유지
        assert!((v[primary] / v[secondary] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_palindrome_uses_single_slot() {
        let embedder = FallbackEmbedder::new(1000);
        let v = embedder.embed_text("level");
        let non_zero = v.iter().filter(|x| **x != 0.0).count();
        assert_eq!(non_zero, 1);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let embedder = FallbackEmbedder::new(100);
        assert_eq!(embedder.embed_text("RAG?"), embedder.embed_text("rag"));
    }

    #[tokio::test]
    async fn test_embedder_trait() {
        let embedder = FallbackEmbedder::new(32);
        let embedding = embedder.embed("hello world").await;
        assert_eq!(embedding.scheme, EmbeddingScheme::Fallback);
        assert_eq!(embedding.vector.len(), embedder.dimension());
    }
}
