//! Text Chunking Module
//!
//! 문장 경계 기반 분할 + 단어 단위 오버랩.
//!
//! 문장을 버퍼에 누적하다가 다음 문장을 더하면 `chunk_size`를 넘을 때
//! 버퍼를 내보내고, 이전 버퍼의 끝 단어 일부로 새 버퍼를 시작합니다.

use std::sync::LazyLock;

use regex::Regex;

/// 문장 패턴: 종결 부호까지, 또는 부호 없이 끝나는 마지막 문장
static SENTENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^.!?]+(?:[.!?]+|$)").expect("sentence pattern is valid")
});

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkConfig {
    /// 청크 최대 크기 (문자 수). 한 문장이 이보다 길면 그 문장 하나가 청크가 됨
    pub chunk_size: usize,
    /// 오버랩 비율 (0.0이면 오버랩 없음)
    pub overlap_ratio: f32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap_ratio: 0.2,
        }
    }
}

// ============================================================================
// SentenceChunker
// ============================================================================

/// 문장 경계 청커
#[derive(Debug, Clone, Default)]
pub struct SentenceChunker {
    config: ChunkConfig,
}

impl SentenceChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    /// 텍스트를 청크로 분할
    ///
    /// 공백뿐인 입력은 빈 목록, 그 외에는 비어있지 않은 청크를 1개 이상 반환합니다.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        split(text, self.config.chunk_size, self.config.overlap_ratio)
    }
}

/// 문장 단위 분할
///
/// 공백뿐인(또는 빈) 입력은 빈 목록을 반환합니다.
/// 그 외 입력은 항상 비어있지 않은 청크를 1개 이상 반환합니다.
///
/// # Arguments
/// * `text` - 분할할 텍스트
/// * `chunk_size` - 청크 최대 크기 (문자 수)
/// * `overlap_ratio` - 이전 청크에서 이어받을 비율
pub fn split(text: &str, chunk_size: usize, overlap_ratio: f32) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return vec![];
    }

    let sentences = sentences(text);
    if sentences.len() <= 1 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        if !current.is_empty()
            && current.chars().count() + 1 + sentence.chars().count() > chunk_size
        {
            let overlap = overlap_tail(&current, chunk_size, overlap_ratio);
            chunks.push(std::mem::take(&mut current));
            current = overlap;
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// 텍스트를 문장으로 분리 (앞뒤 공백 제거, 빈 문장 제외)
pub fn sentences(text: &str) -> Vec<&str> {
    SENTENCE_RE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 이전 버퍼 끝에서 이어받을 단어들
///
/// 단어 수 = floor(overlap_ratio × chunk_size / buffer_len × word_count), 최대 word_count
fn overlap_tail(buffer: &str, chunk_size: usize, overlap_ratio: f32) -> String {
    if overlap_ratio <= 0.0 || buffer.is_empty() {
        return String::new();
    }

    let words: Vec<&str> = buffer.split_whitespace().collect();
    let overlap_chars = overlap_ratio as f64 * chunk_size as f64;
    let buffer_len = buffer.chars().count() as f64;
    let count = (overlap_chars / buffer_len * words.len() as f64).floor() as usize;
    let count = count.min(words.len());

    words[words.len() - count..].join(" ")
}

// ============================================================================
// Tests
// ============================================================================
