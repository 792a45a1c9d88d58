//! Vector Index - 인메모리 청크 벡터 저장소
//!
//! 청크 ID → `VectorRecord`. 유사도 검색은 전체 선형 스캔 + 코사인 유사도입니다.
//! ANN 구조가 아니므로 소~중규모 코퍼스(수만 청크 이하)를 전제로 합니다.
//!
//! 불변식: 모든 레코드의 차원은 인덱스 생성 시 지정한 차원과 같습니다.
//! 차원이 다른 레코드는 upsert 시 거부되며, 재임베딩은 호출자 책임입니다.

use std::collections::HashMap;
use std::mem::size_of;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::lexical::tokenize;
use crate::embedding::EmbeddingScheme;
use crate::error::{Result, RetrievalError};

// ============================================================================
// Types
// ============================================================================

/// 청크 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// 부모 문서 제목
    pub title: String,
    /// 문서 내 청크 인덱스 (0-based)
    pub chunk_index: usize,
    /// 문서의 전체 청크 수
    pub total_chunks: usize,
    /// 청크 생성 시각
    pub timestamp: DateTime<Utc>,
}

/// 인덱스 레코드
#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// 부모 문서 ID
    pub document_id: String,
    /// 청크 텍스트
    pub text: String,
    /// 임베딩 벡터
    pub vector: Vec<f32>,
    /// 벡터를 만든 전략
    pub scheme: EmbeddingScheme,
    pub metadata: RecordMetadata,
    /// BM25용 토큰 (생성 시 한 번 계산)
    tokens: Vec<String>,
}

impl VectorRecord {
    pub fn new(
        document_id: impl Into<String>,
        text: impl Into<String>,
        vector: Vec<f32>,
        scheme: EmbeddingScheme,
        metadata: RecordMetadata,
    ) -> Self {
        let text = text.into();
        let tokens = tokenize(&text);
        Self {
            document_id: document_id.into(),
            text,
            vector,
            scheme,
            metadata,
            tokens,
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// 토큰화된 텍스트
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// 대략적인 메모리 사용량 (bytes)
    fn approximate_bytes(&self, id: &str) -> usize {
        size_of::<Self>()
            + id.len()
            + self.document_id.len()
            + self.text.len()
            + self.metadata.title.len()
            + self.vector.len() * size_of::<f32>()
            + self
                .tokens
                .iter()
                .map(|t| t.len() + size_of::<String>())
                .sum::<usize>()
    }
}

/// 결정적 청크 ID: `{document_id}#{index}`
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{document_id}#{index}")
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 인메모리 벡터 인덱스
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    records: HashMap<String, VectorRecord>,
    /// 전체 토큰 수 (BM25 평균 길이용 누적값)
    total_tokens: usize,
}

impl VectorIndex {
    /// 지정 차원의 빈 인덱스 생성
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: HashMap::new(),
            total_tokens: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 레코드 삽입 또는 교체
    ///
    /// 차원이 다르면 `DimensionMismatch`.
    pub fn upsert(&mut self, id: impl Into<String>, record: VectorRecord) -> Result<()> {
        self.check_dimension(&record)?;
        self.insert_unchecked(id.into(), record);
        Ok(())
    }

    /// 문서의 레코드 전체를 한 번에 교체
    ///
    /// 모든 레코드를 먼저 검증하므로, 실패하면 인덱스는 변경되지 않습니다.
    pub fn replace_document(
        &mut self,
        document_id: &str,
        records: Vec<(String, VectorRecord)>,
    ) -> Result<usize> {
        for (_, record) in &records {
            self.check_dimension(record)?;
        }

        let removed = self.remove_by_document(document_id);
        let inserted = records.len();
        for (id, record) in records {
            self.insert_unchecked(id, record);
        }

        tracing::debug!(
            document_id,
            removed,
            inserted,
            "Replaced document records"
        );
        Ok(inserted)
    }

    /// 문서 ID로 레코드 삭제 (O(n) 스캔)
    pub fn remove_by_document(&mut self, document_id: &str) -> usize {
        let before = self.records.len();
        let mut removed_tokens = 0;

        self.records.retain(|_, record| {
            if record.document_id == document_id {
                removed_tokens += record.tokens.len();
                false
            } else {
                true
            }
        });

        self.total_tokens -= removed_tokens;
        before - self.records.len()
    }

    /// 전체 삭제
    pub fn clear(&mut self) {
        self.records.clear();
        self.total_tokens = 0;
    }

    /// 전체 레코드 순회
    pub fn scan(&self) -> impl Iterator<Item = (&str, &VectorRecord)> {
        self.records.iter().map(|(id, record)| (id.as_str(), record))
    }

    pub fn get(&self, id: &str) -> Option<&VectorRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 평균 청크 길이 (토큰 수). 비어있으면 0
    pub fn average_tokens(&self) -> f64 {
        if self.records.is_empty() {
            0.0
        } else {
            self.total_tokens as f64 / self.records.len() as f64
        }
    }

    /// 대략적인 메모리 사용량 (bytes)
    pub fn approximate_bytes(&self) -> usize {
        size_of::<Self>()
            + self
                .records
                .iter()
                .map(|(id, record)| record.approximate_bytes(id) + size_of::<String>())
                .sum::<usize>()
    }

    fn check_dimension(&self, record: &VectorRecord) -> Result<()> {
        if record.dimension() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: record.dimension(),
            });
        }
        Ok(())
    }

    fn insert_unchecked(&mut self, id: String, record: VectorRecord) {
        self.total_tokens += record.tokens.len();
        if let Some(previous) = self.records.insert(id, record) {
            self.total_tokens -= previous.tokens.len();
        }
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
