//! Knowledge 모듈 - 노트 하이브리드 검색 엔진
//!
//! - Chunker: 문장 경계 기반 텍스트 분할 + 단어 단위 오버랩
//! - Index: 인메모리 벡터 인덱스 (코사인 선형 스캔)
//! - Lexical: BM25 스코어링
//! - Fusion: RRF 알고리즘으로 두 순위 목록 통합
//! - Store: SQLite 영구 저장 + 차원 마이그레이션용 벡터 BLOB
//! - Service: 위 구성 요소를 묶는 오케스트레이터

mod chunker;
mod fusion;
mod index;
mod lexical;
mod service;
mod store;

// Re-exports
pub use chunker::{sentences, split, ChunkConfig, SentenceChunker};
pub use fusion::{fuse, rrf_contribution, Fused, RRF_K};
pub use index::{chunk_id, cosine_similarity, RecordMetadata, VectorIndex, VectorRecord};
pub use lexical::{query_terms, tokenize, Bm25Scorer, CorpusStats, BM25_B, BM25_K1};
pub use service::{
    DocumentTarget, FusedResult, IndexStats, LoadReport, ProcessOutcome, RetrievalService,
    SearchResponse,
};
pub use store::{Document, InMemoryStore, PersistenceGateway, SqliteStore, StoredChunk};
