//! 검색 엔진 에러 타입
//!
//! 내부 협력자(임베딩 API, SQLite)는 `anyhow::Result`를 사용하고,
//! 엔진 공개 API는 호출자가 분기할 수 있도록 타입이 있는 에러를 반환합니다.

use thiserror::Error;

/// 엔진 공개 API의 Result 별칭
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// 검색 엔진 에러
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// 호출자 입력 오류 (빈 본문, 빈 쿼리, top_k = 0 등)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 인덱스의 활성 차원과 다른 벡터
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 영구 저장소 로드 실패
    #[error("store error: {0:#}")]
    Store(#[source] anyhow::Error),
}

impl RetrievalError {
    /// 입력 오류 생성
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RetrievalError::DimensionMismatch {
            expected: 100,
            actual: 768,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 100, got 768");

        let err = RetrievalError::invalid_input("content is empty");
        assert!(err.to_string().contains("content is empty"));
    }

    #[test]
    fn test_store_error_keeps_context() {
        let inner = anyhow::anyhow!("disk full").context("Failed to load documents");
        let err = RetrievalError::Store(inner);
        let msg = err.to_string();
        assert!(msg.contains("Failed to load documents"));
        assert!(msg.contains("disk full"));
    }
}
