//! 엔진 설정
//!
//! 기본값 + `PALANK_*` 환경변수 오버라이드.
//! 임베딩 API 키는 `embedding` 모듈에서 따로 읽습니다.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.palank-notes/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palank-notes")
}

// ============================================================================
// RetrievalConfig
// ============================================================================

/// 검색 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// 청크 최대 크기 (문자 수)
    pub chunk_size: usize,
    /// 청크 간 오버랩 비율 (0.0 ~ 1.0 미만)
    pub overlap_ratio: f32,
    /// 코사인 유사도 하한
    pub similarity_floor: f32,
    /// BM25 스코어 하한
    pub bm25_floor: f64,
    /// RRF k 상수
    pub rrf_k: usize,
    /// 각 검색 방법에서 가져올 후보 수 = top_k × multiplier
    pub candidate_multiplier: usize,
    /// 폴백 임베딩 차원 (프로바이더 미설정 시)
    pub fallback_dimension: usize,
    /// 프로바이더 임베딩 차원
    pub provider_dimension: usize,
    /// 프로바이더 호출 타임아웃 (초)
    pub provider_timeout_secs: u64,
    /// 데이터 디렉토리
    pub data_dir: PathBuf,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap_ratio: 0.2,
            similarity_floor: 0.1,
            bm25_floor: 0.1,
            rrf_k: 60,
            candidate_multiplier: 2,
            fallback_dimension: 100,
            provider_dimension: 768,
            provider_timeout_secs: 10,
            data_dir: get_data_dir(),
        }
    }
}

impl RetrievalConfig {
    /// 환경변수로 기본값을 덮어써서 생성
    ///
    /// | 변수 | 필드 |
    /// |------|------|
    /// | `PALANK_CHUNK_SIZE` | chunk_size |
    /// | `PALANK_OVERLAP_RATIO` | overlap_ratio |
    /// | `PALANK_SIMILARITY_FLOOR` | similarity_floor |
    /// | `PALANK_BM25_FLOOR` | bm25_floor |
    /// | `PALANK_RRF_K` | rrf_k |
    /// | `PALANK_FALLBACK_DIMENSION` | fallback_dimension |
    /// | `PALANK_PROVIDER_DIMENSION` | provider_dimension |
    /// | `PALANK_PROVIDER_TIMEOUT_SECS` | provider_timeout_secs |
    /// | `PALANK_DATA_DIR` | data_dir |
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        override_from_env("PALANK_CHUNK_SIZE", &mut config.chunk_size)?;
        override_from_env("PALANK_OVERLAP_RATIO", &mut config.overlap_ratio)?;
        override_from_env("PALANK_SIMILARITY_FLOOR", &mut config.similarity_floor)?;
        override_from_env("PALANK_BM25_FLOOR", &mut config.bm25_floor)?;
        override_from_env("PALANK_RRF_K", &mut config.rrf_k)?;
        override_from_env("PALANK_FALLBACK_DIMENSION", &mut config.fallback_dimension)?;
        override_from_env("PALANK_PROVIDER_DIMENSION", &mut config.provider_dimension)?;
        override_from_env(
            "PALANK_PROVIDER_TIMEOUT_SECS",
            &mut config.provider_timeout_secs,
        )?;

        if let Ok(dir) = std::env::var("PALANK_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than 0");
        }
        if !(0.0..1.0).contains(&self.overlap_ratio) {
            anyhow::bail!(
                "Invalid overlap_ratio: {}. Must be in [0.0, 1.0)",
                self.overlap_ratio
            );
        }
        if self.rrf_k == 0 {
            anyhow::bail!("rrf_k must be greater than 0");
        }
        if self.candidate_multiplier == 0 {
            anyhow::bail!("candidate_multiplier must be greater than 0");
        }
        if self.provider_timeout_secs == 0 {
            anyhow::bail!("provider_timeout_secs must be greater than 0");
        }
        if self.fallback_dimension == 0 || self.provider_dimension == 0 {
            anyhow::bail!("embedding dimensions must be greater than 0");
        }
        Ok(())
    }

    /// 프로바이더 호출 타임아웃
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// SQLite DB 파일 경로
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("notes.db")
    }
}

/// 환경변수가 설정되어 있으면 파싱해서 덮어쓰기
fn override_from_env<T>(key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            *target = raw
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse {key}={raw}"))?;
            tracing::debug!("Config override from {}", key);
        }
        _ => {}
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RetrievalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rrf_k, 60);
        assert_eq!(config.fallback_dimension, 100);
        assert_eq!(config.provider_timeout(), Duration::from_secs(10));
        assert!(config.db_path().ends_with("notes.db"));
    }

    #[test]
    fn test_invalid_overlap_ratio() {
        let config = RetrievalConfig {
            overlap_ratio: 1.0,
            ..Default::default()
        };
        let err = config.validate().err();
        assert!(err
            .map(|e| e.to_string().contains("overlap_ratio"))
            .unwrap_or(false));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = RetrievalConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_provider_timeout_rejected() {
        let config = RetrievalConfig {
            provider_timeout_secs: 0,
            ..Default::default()
        };
        let err = config.validate().err();
        assert!(err
            .map(|e| e.to_string().contains("provider_timeout_secs"))
            .unwrap_or(false));
    }

    #[test]
    fn test_override_from_env() {
        std::env::set_var("PALANK_TEST_OVERRIDE_USIZE", "42");
        let mut value = 7usize;
        override_from_env("PALANK_TEST_OVERRIDE_USIZE", &mut value).unwrap();
        assert_eq!(value, 42);

        std::env::set_var("PALANK_TEST_OVERRIDE_BAD", "not-a-number");
        let mut value = 7usize;
        assert!(override_from_env("PALANK_TEST_OVERRIDE_BAD", &mut value).is_err());
        assert_eq!(value, 7);

        let mut value = 7usize;
        override_from_env("PALANK_TEST_OVERRIDE_MISSING", &mut value).unwrap();
        assert_eq!(value, 7);
    }
}
