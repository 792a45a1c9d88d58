//! palank-notes - 노트 앱용 하이브리드 검색 엔진
//!
//! 문장 단위 청킹, 임베딩(Gemini 또는 결정적 해시 폴백),
//! 코사인 + BM25 검색을 RRF로 통합하는 로컬 검색 엔진입니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;

// Re-exports
pub use config::{get_data_dir, RetrievalConfig};
pub use embedding::{
    create_embedder, get_api_key, has_api_key, Embedder, Embedding, EmbeddingProvider,
    EmbeddingScheme, FallbackEmbedder, GeminiEmbedding, ProviderEmbedder,
};
pub use error::{Result, RetrievalError};
pub use knowledge::{
    ChunkConfig, Document, DocumentTarget, FusedResult, InMemoryStore, IndexStats, LoadReport,
    PersistenceGateway, ProcessOutcome, RetrievalService, SearchResponse, SentenceChunker,
    SqliteStore,
};
