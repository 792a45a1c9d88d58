//! Gemini 임베딩 프로바이더
//!
//! ref: https://ai.google.dev/gemini-api/docs/embeddings

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;

/// Gemini 임베딩 API 엔드포인트 (gemini-embedding-001 - MRL 지원)
const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

const GEMINI_MODEL: &str = "models/gemini-embedding-001";

/// 지원하는 출력 차원
pub const VALID_DIMENSIONS: [usize; 3] = [768, 1536, 3072];

/// 429 / 전송 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 2;
/// 재시도 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 500;
/// HTTP 클라이언트 타임아웃
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
}

impl GeminiEmbedding {
    /// 차원을 지정하여 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `dimension` - 임베딩 차원 (768, 1536, 3072 중 선택)
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self> {
        if !VALID_DIMENSIONS.contains(&dimension) {
            anyhow::bail!(
                "Invalid dimension: {}. Must be one of {:?}",
                dimension,
                VALID_DIMENSIONS
            );
        }

        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            dimension,
        })
    }

    fn request_body(&self, text: &str) -> EmbedRequest {
        EmbedRequest {
            model: GEMINI_MODEL.to_string(),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: "RETRIEVAL_DOCUMENT".to_string(),
            output_dimensionality: Some(self.dimension),
        }
    }

    /// 응답 본문 → 벡터 (차원 검증 포함)
    fn parse_response(&self, body: &str) -> Result<Vec<f32>> {
        let response: EmbedResponse =
            serde_json::from_str(body).context("Failed to parse embedding response")?;
        let values = response.embedding.values;

        if values.len() != self.dimension {
            anyhow::bail!(
                "Malformed embedding response: expected {} values, got {}",
                self.dimension,
                values.len()
            );
        }
        Ok(values)
    }
}

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = self.request_body(text);
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                tracing::warn!(
                    "Embedding request retry in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    MAX_RETRIES
                );
                tokio::time::sleep(backoff).await;
            }

            // API 키는 URL이 아닌 헤더로 전송
            let response = match self
                .client
                .post(GEMINI_EMBED_URL)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                return self.parse_response(&body);
            }

            if status.as_u16() == 429 {
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));
                continue;
            }

            // 그 외 에러는 재시도하지 않음
            if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                anyhow::bail!(
                    "Gemini API error ({}): {}",
                    error.error.status,
                    error.error.message
                );
            }
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "gemini-embedding-001"
    }
}

// ============================================================================
// Tests
// ============================================================================
