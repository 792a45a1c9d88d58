//! BM25 렉시컬 스코어링
//!
//! ref: https://en.wikipedia.org/wiki/Okapi_BM25
//!
//! 코퍼스 통계(N, 용어별 문서 빈도, 평균 길이)는 쿼리마다 인덱스 스캔으로 구합니다.
//! 평균 길이는 `VectorIndex`가 upsert/remove 시 유지하는 누적값을 사용합니다.

use std::collections::{HashMap, HashSet};

/// BM25 k1 (TF 포화)
pub const BM25_K1: f64 = 1.2;
/// BM25 b (길이 정규화)
pub const BM25_B: f64 = 0.75;

// ============================================================================
// Tokenizer
// ============================================================================

/// 토큰화: 소문자 변환 후 영숫자가 아닌 문자로 분리
///
/// 공백 분리가 아니라 구두점도 경계로 취급합니다 ("RAG?" → "rag").
/// BM25와 폴백 임베딩이 같은 토큰화를 사용합니다.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// 쿼리 용어 (중복 제거, 첫 등장 순서 유지)
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

// ============================================================================
// Corpus Statistics
// ============================================================================

/// 쿼리 단위 코퍼스 통계
#[derive(Debug, Clone, Default)]
pub struct CorpusStats {
    /// 전체 청크 수 (N)
    pub total_chunks: usize,
    /// 평균 청크 길이 (토큰 수)
    pub avg_len: f64,
    /// 쿼리 용어 → 해당 용어를 포함한 청크 수 (n)
    pub doc_freq: HashMap<String, usize>,
}

impl CorpusStats {
    /// 청크 토큰 목록을 스캔해서 쿼리 용어의 문서 빈도 계산
    pub fn collect<'a, I>(chunks: I, terms: &[String], avg_len: f64) -> Self
    where
        I: IntoIterator<Item = &'a [String]>,
    {
        let mut doc_freq: HashMap<String, usize> =
            terms.iter().map(|t| (t.clone(), 0)).collect();
        let mut total_chunks = 0;

        for tokens in chunks {
            total_chunks += 1;
            let present: HashSet<&str> = tokens.iter().map(String::as_str).collect();
            for term in terms {
                if present.contains(term.as_str()) {
                    if let Some(n) = doc_freq.get_mut(term) {
                        *n += 1;
                    }
                }
            }
        }

        Self {
            total_chunks,
            avg_len,
            doc_freq,
        }
    }

    /// IDF = ln(1 + (N - n + 0.5) / (n + 0.5))
    ///
    /// 고전 BM25의 `ln((N - n + 0.5) / (n + 0.5))`가 아닌, 의도적으로 1을 더한 형태.
    /// 절반 이상의 청크에 등장하는 용어도 음수가 되지 않습니다.
    pub fn idf(&self, term: &str) -> f64 {
        let n = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        let total = self.total_chunks as f64;
        (1.0 + (total - n + 0.5) / (n + 0.5)).ln()
    }
}

// ============================================================================
// Bm25Scorer
// ============================================================================

/// BM25 스코어러
#[derive(Debug, Clone, Copy)]
pub struct Bm25Scorer {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Scorer {
    fn default() -> Self {
        Self {
            k1: BM25_K1,
            b: BM25_B,
        }
    }
}

impl Bm25Scorer {
    /// 청크 하나의 BM25 스코어
    ///
    /// # Arguments
    /// * `chunk_tokens` - 토큰화된 청크
    /// * `terms` - 쿼리 용어 (중복 제거된 것)
    /// * `stats` - 코퍼스 통계
    pub fn score(&self, chunk_tokens: &[String], terms: &[String], stats: &CorpusStats) -> f64 {
        if chunk_tokens.is_empty() || terms.is_empty() {
            return 0.0;
        }

        let len = chunk_tokens.len() as f64;
        let avg_len = if stats.avg_len > 0.0 { stats.avg_len } else { len };
        let norm = self.k1 * (1.0 - self.b + self.b * len / avg_len);

        terms
            .iter()
            .map(|term| {
                let tf = chunk_tokens.iter().filter(|t| *t == term).count() as f64;
                if tf == 0.0 {
                    return 0.0;
                }
                stats.idf(term) * tf * (self.k1 + 1.0) / (tf + norm)
            })
            .sum()
    }
}

// ============================================================================
// Tests
// ============================================================================
