//! Retrieval Service - 청킹 → 임베딩 → 인덱싱 → 하이브리드 검색 오케스트레이터
//!
//! 나머지 애플리케이션이 사용하는 유일한 표면입니다:
//! `process_document`, `hybrid_search`, `delete_document`, `clear`, `get_stats`
//! (+ 시작 시 `load`).
//!
//! 문서 하나의 청크는 모두 스테이징 버퍼에서 임베딩한 뒤
//! 쓰기 락 한 번으로 인덱스에 교체되므로, 검색은 부분 인덱싱된 문서를 보지 않습니다.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use super::chunker::{ChunkConfig, SentenceChunker};
use super::fusion::fuse;
use super::index::{chunk_id, cosine_similarity, RecordMetadata, VectorIndex, VectorRecord};
use super::lexical::{query_terms, Bm25Scorer, CorpusStats};
use super::store::{Document, PersistenceGateway, SqliteStore, StoredChunk};
use crate::config::RetrievalConfig;
use crate::embedding::{create_embedder, Embedder, Embedding, EmbeddingScheme};
use crate::error::{Result, RetrievalError};

// ============================================================================
// Types
// ============================================================================

/// `process_document`의 대상 문서 지정
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentTarget {
    /// 새 문서 ID 발급
    New,
    /// 해당 ID의 문서를 교체 (없으면 그 ID로 생성)
    Existing(String),
    /// 같은 제목의 문서가 있으면 교체, 없으면 새로 생성
    ReplaceByTitle,
}

/// 문서 처리 결과
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub document_id: String,
    pub chunk_count: usize,
    pub embedding_scheme: EmbeddingScheme,
    /// 기존 문서를 교체했는지
    pub replaced: bool,
    /// 영구 저장소 저장 성공 여부 (false면 메모리에만 존재)
    pub persisted: bool,
}

/// 하이브리드 검색 결과 항목
#[derive(Debug, Clone, Serialize)]
pub struct FusedResult {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub metadata: RecordMetadata,
    /// 시맨틱 RRF 기여
    pub semantic_score: f64,
    /// 렉시컬 RRF 기여
    pub lexical_score: f64,
    /// 합산 RRF 스코어
    pub score: f64,
    /// 코사인 유사도 (시맨틱 후보였을 때)
    pub similarity: Option<f32>,
    /// BM25 스코어 (렉시컬 후보였을 때)
    pub bm25: Option<f64>,
}

/// 하이브리드 검색 응답
///
/// JSON: `{"status": "no_content_indexed"}` 또는 `{"status": "hits", "hits": [...]}`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "hits", rename_all = "snake_case")]
pub enum SearchResponse {
    /// 인덱스가 비어있음
    NoContentIndexed,
    /// 검색 결과 (하한을 통과한 것이 없으면 비어있을 수 있음)
    Hits(Vec<FusedResult>),
}

impl SearchResponse {
    pub fn hits(&self) -> &[FusedResult] {
        match self {
            Self::NoContentIndexed => &[],
            Self::Hits(hits) => hits,
        }
    }

    pub fn is_no_content(&self) -> bool {
        matches!(self, Self::NoContentIndexed)
    }
}

/// 인덱스 통계
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub chunk_count: usize,
    /// 임베딩 전략별 문서 수
    pub documents_by_scheme: BTreeMap<EmbeddingScheme, usize>,
    /// 임베딩 전략별 청크 수
    pub chunks_by_scheme: BTreeMap<EmbeddingScheme, usize>,
    pub approximate_memory_bytes: usize,
    pub dimension: usize,
    /// 저장 실패로 메모리 전용 상태인지
    pub degraded: bool,
}

/// 시작 시 로드 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub documents: usize,
    pub chunks: usize,
    /// 차원 불일치 / 벡터 없음으로 재임베딩한 청크 수
    pub migrated: usize,
    /// 재임베딩 결과 저장이 모두 성공했는지
    pub persisted: bool,
}

/// 인덱스 + 문서 레지스트리 (같은 락으로 보호)
struct IndexState {
    index: VectorIndex,
    documents: HashMap<String, Document>,
}

// ============================================================================
// RetrievalService
// ============================================================================

/// 하이브리드 검색 서비스
pub struct RetrievalService {
    config: RetrievalConfig,
    chunker: SentenceChunker,
    embedder: Arc<dyn Embedder>,
    scorer: Bm25Scorer,
    store: Arc<dyn PersistenceGateway>,
    state: RwLock<IndexState>,
    /// 저장소 쓰기 순서 (쓰기 락을 쥔 채로 획득 → 인덱스 반영 순서와 동일)
    store_order: Mutex<()>,
    degraded: AtomicBool,
}

impl RetrievalService {
    /// 구성 요소를 지정하여 생성 (로드는 하지 않음)
    pub fn new(
        config: RetrievalConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn PersistenceGateway>,
    ) -> Self {
        let chunker = SentenceChunker::new(ChunkConfig {
            chunk_size: config.chunk_size,
            overlap_ratio: config.overlap_ratio,
        });
        let index = VectorIndex::new(embedder.dimension());

        Self {
            config,
            chunker,
            embedder,
            scorer: Bm25Scorer::default(),
            store,
            state: RwLock::new(IndexState {
                index,
                documents: HashMap::new(),
            }),
            store_order: Mutex::new(()),
            degraded: AtomicBool::new(false),
        }
    }

    /// 데이터 디렉토리의 SQLite 저장소로 열고 인덱스 로드
    pub async fn open(config: RetrievalConfig) -> anyhow::Result<(Self, LoadReport)> {
        config.validate()?;

        let embedder = create_embedder(&config)?;
        let store = SqliteStore::open(&config.db_path())?;
        let service = Self::new(config, embedder, Arc::new(store));

        let report = service.load().await?;
        Ok((service, report))
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// 영구 저장소에서 전체 로드
    ///
    /// 저장된 벡터의 차원이 활성 임베더와 다르거나 벡터가 없으면
    /// 재임베딩 후 저장소에 다시 씁니다.
    pub async fn load(&self) -> Result<LoadReport> {
        let loaded = self.store.load_all().map_err(RetrievalError::Store)?;
        let dimension = self.embedder.dimension();

        let mut report = LoadReport {
            persisted: true,
            ..Default::default()
        };

        for (mut document, chunks) in loaded {
            let total = chunks.len();
            let mut stored = Vec::with_capacity(total);
            let mut records = Vec::with_capacity(total);
            let mut migrated = 0;

            for mut chunk in chunks {
                let reusable = chunk
                    .embedding
                    .as_ref()
                    .is_some_and(|v| v.len() == dimension && chunk.dimension == dimension);

                let (vector, scheme) = match chunk.embedding.take() {
                    Some(vector) if reusable => {
                        (vector, chunk.scheme.unwrap_or(document.embedding_scheme))
                    }
                    _ => {
                        let Embedding { vector, scheme } = self.embedder.embed(&chunk.text).await;
                        migrated += 1;
                        (vector, scheme)
                    }
                };

                chunk.dimension = vector.len();
                chunk.scheme = Some(scheme);
                chunk.embedding = Some(vector.clone());

                let record = VectorRecord::new(
                    document.id.clone(),
                    chunk.text.clone(),
                    vector,
                    scheme,
                    RecordMetadata {
                        title: document.title.clone(),
                        chunk_index: chunk.chunk_index,
                        total_chunks: total,
                        timestamp: chunk.created_at,
                    },
                );
                records.push((chunk.id.clone(), record));
                stored.push(chunk);
            }

            if migrated > 0 {
                tracing::warn!(
                    document_id = %document.id,
                    migrated,
                    dimension,
                    "Re-embedded chunks with mismatched dimension"
                );
                document.chunk_count = total;
                document.embedding_scheme = aggregate_scheme(stored.iter().filter_map(|c| c.scheme));
                document.updated_at = Utc::now();
            }

            let _store_turn = {
                let mut state = self.state.write().await;
                state.index.replace_document(&document.id, records)?;
                state.documents.insert(document.id.clone(), document.clone());
                self.store_order.lock().await
            };

            if migrated > 0 && !self.persist(&document, &stored) {
                report.persisted = false;
            }

            report.documents += 1;
            report.chunks += total;
            report.migrated += migrated;
        }

        tracing::info!(
            documents = report.documents,
            chunks = report.chunks,
            migrated = report.migrated,
            store = self.store.name(),
            "Loaded index from store"
        );
        Ok(report)
    }

    /// 문서 처리: 청킹 → 임베딩 → 인덱스 교체 → 저장
    ///
    /// # Arguments
    /// * `content` - 문서 본문 (공백뿐이면 `InvalidInput`)
    /// * `title` - 문서 제목
    /// * `target` - 새 문서 / 기존 ID 교체 / 제목 기준 교체
    pub async fn process_document(
        &self,
        content: &str,
        title: &str,
        target: DocumentTarget,
    ) -> Result<ProcessOutcome> {
        if content.trim().is_empty() {
            return Err(RetrievalError::invalid_input("document content is empty"));
        }
        let title = title.trim();
        if title.is_empty() {
            return Err(RetrievalError::invalid_input("document title is empty"));
        }
        if let DocumentTarget::Existing(id) = &target {
            if id.trim().is_empty() {
                return Err(RetrievalError::invalid_input("document id is empty"));
            }
        }

        let texts = self.chunker.chunk(content);
        if texts.is_empty() {
            return Err(RetrievalError::invalid_input("document produced no chunks"));
        }

        // 1. 스테이징: 락 없이 모든 청크 임베딩
        let mut staged = Vec::with_capacity(texts.len());
        for text in texts {
            let embedding = self.embedder.embed(&text).await;
            staged.push((text, embedding));
        }

        let scheme = aggregate_scheme(staged.iter().map(|(_, e)| e.scheme));
        let total = staged.len();
        let now = Utc::now();

        // 2. 쓰기 락 한 번으로 문서 단위 교체
        let (document, stored, replaced, _store_turn) = {
            let mut state = self.state.write().await;

            let existing = resolve_target(&state.documents, &target, title);
            let replaced = existing.is_some();
            let (document_id, created_at) = match (existing, &target) {
                (Some(doc), _) => (doc.id.clone(), doc.created_at),
                (None, DocumentTarget::Existing(id)) => (id.clone(), now),
                (None, _) => (uuid::Uuid::new_v4().to_string(), now),
            };

            let mut records = Vec::with_capacity(total);
            let mut stored = Vec::with_capacity(total);
            for (i, (text, embedding)) in staged.into_iter().enumerate() {
                let id = chunk_id(&document_id, i);
                records.push((
                    id.clone(),
                    VectorRecord::new(
                        document_id.clone(),
                        text.clone(),
                        embedding.vector.clone(),
                        embedding.scheme,
                        RecordMetadata {
                            title: title.to_string(),
                            chunk_index: i,
                            total_chunks: total,
                            timestamp: now,
                        },
                    ),
                ));
                stored.push(StoredChunk {
                    id,
                    document_id: document_id.clone(),
                    chunk_index: i,
                    text,
                    dimension: embedding.vector.len(),
                    embedding: Some(embedding.vector),
                    scheme: Some(embedding.scheme),
                    created_at: now,
                });
            }

            state.index.replace_document(&document_id, records)?;

            let document = Document {
                id: document_id,
                title: title.to_string(),
                content: content.to_string(),
                chunk_count: total,
                embedding_scheme: scheme,
                created_at,
                updated_at: now,
            };
            state.documents.insert(document.id.clone(), document.clone());

            // 락을 놓기 전에 저장 순번 확보
            let store_turn = self.store_order.lock().await;
            (document, stored, replaced, store_turn)
        };

        // 3. 저장 (실패해도 인메모리 인덱스가 기준)
        let persisted = self.persist(&document, &stored);

        tracing::info!(
            document_id = %document.id,
            chunks = total,
            scheme = %scheme,
            replaced,
            persisted,
            "Processed document"
        );

        Ok(ProcessOutcome {
            document_id: document.id,
            chunk_count: total,
            embedding_scheme: scheme,
            replaced,
            persisted,
        })
    }

    /// 하이브리드 검색 (코사인 + BM25 → RRF)
    ///
    /// # Arguments
    /// * `query` - 검색 쿼리
    /// * `top_k` - 최대 결과 수
    pub async fn hybrid_search(&self, query: &str, top_k: usize) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(RetrievalError::invalid_input("query is empty"));
        }
        if top_k == 0 {
            return Err(RetrievalError::invalid_input("top_k must be greater than 0"));
        }

        if self.state.read().await.index.is_empty() {
            return Ok(SearchResponse::NoContentIndexed);
        }

        let query_embedding = self.embedder.embed(query).await;
        let terms = query_terms(query);
        let candidates = top_k.saturating_mul(self.config.candidate_multiplier);

        let state = self.state.read().await;
        if state.index.is_empty() {
            return Ok(SearchResponse::NoContentIndexed);
        }

        // 1. 시맨틱: 코사인 유사도 선형 스캔
        let semantic = self.semantic_ranking(&state.index, &query_embedding.vector, candidates);

        // 2. 렉시컬: BM25 스캔
        let lexical = self.lexical_ranking(&state.index, &terms, candidates);

        // 3. RRF 통합
        let similarities: HashMap<&str, f32> =
            semantic.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        let bm25_scores: HashMap<&str, f64> =
            lexical.iter().map(|(id, s)| (id.as_str(), *s)).collect();

        let semantic_ids: Vec<(String, ())> =
            semantic.iter().map(|(id, _)| (id.clone(), ())).collect();
        let lexical_ids: Vec<(String, ())> =
            lexical.iter().map(|(id, _)| (id.clone(), ())).collect();

        let hits = fuse(&semantic_ids, &lexical_ids, self.config.rrf_k)
            .into_iter()
            .filter_map(|fused| {
                let record = state.index.get(&fused.id)?;
                Some(FusedResult {
                    similarity: similarities.get(fused.id.as_str()).copied(),
                    bm25: bm25_scores.get(fused.id.as_str()).copied(),
                    document_id: record.document_id.clone(),
                    text: record.text.clone(),
                    metadata: record.metadata.clone(),
                    semantic_score: fused.semantic_score,
                    lexical_score: fused.lexical_score,
                    score: fused.score,
                    chunk_id: fused.id,
                })
            })
            .take(top_k)
            .collect::<Vec<_>>();

        tracing::debug!(
            semantic = semantic.len(),
            lexical = lexical.len(),
            hits = hits.len(),
            "Hybrid search"
        );

        Ok(SearchResponse::Hits(hits))
    }

    /// 문서 삭제 (인덱스에서 제거 + 저장소 tombstone)
    ///
    /// 인덱스, 레지스트리, 저장소 중 어디서든 문서가 있었으면 true
    pub async fn delete_document(&self, document_id: &str) -> bool {
        let (removed, had_document, _store_turn) = {
            let mut state = self.state.write().await;
            let removed = state.index.remove_by_document(document_id);
            let had_document = state.documents.remove(document_id).is_some();
            (removed, had_document, self.store_order.lock().await)
        };

        let tombstoned = match self.store.mark_deleted(document_id) {
            Ok(tombstoned) => tombstoned,
            Err(e) => {
                self.mark_degraded(&e);
                false
            }
        };

        tracing::info!(
            document_id,
            removed,
            tombstoned,
            "Deleted document"
        );

        removed > 0 || had_document || tombstoned
    }

    /// 인메모리 인덱스 초기화 (저장소는 유지)
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        let chunks = state.index.len();
        state.index.clear();
        state.documents.clear();

        tracing::warn!(
            chunks,
            "Cleared in-memory index; document store still holds documents until reload"
        );
    }

    /// 인덱스 통계
    pub async fn get_stats(&self) -> IndexStats {
        let state = self.state.read().await;

        let mut documents_by_scheme = BTreeMap::new();
        for document in state.documents.values() {
            *documents_by_scheme.entry(document.embedding_scheme).or_insert(0) += 1;
        }

        let mut chunks_by_scheme = BTreeMap::new();
        for (_, record) in state.index.scan() {
            *chunks_by_scheme.entry(record.scheme).or_insert(0) += 1;
        }

        IndexStats {
            document_count: state.documents.len(),
            chunk_count: state.index.len(),
            documents_by_scheme,
            chunks_by_scheme,
            approximate_memory_bytes: state.index.approximate_bytes()
                + state
                    .documents
                    .values()
                    .map(|d| d.id.len() + d.title.len() + d.content.len())
                    .sum::<usize>(),
            dimension: state.index.dimension(),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    /// ID로 문서 조회
    pub async fn document(&self, document_id: &str) -> Option<Document> {
        self.state.read().await.documents.get(document_id).cloned()
    }

    /// 문서 목록 (최근 수정 순)
    pub async fn documents(&self) -> Vec<Document> {
        let state = self.state.read().await;
        let mut documents: Vec<Document> = state.documents.values().cloned().collect();
        documents.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        documents
    }

    // ------------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------------

    fn semantic_ranking(
        &self,
        index: &VectorIndex,
        query: &[f32],
        limit: usize,
    ) -> Vec<(String, f32)> {
        let mut ranked: Vec<(String, f32)> = index
            .scan()
            .map(|(id, record)| (id, cosine_similarity(query, &record.vector)))
            .filter(|(_, similarity)| *similarity >= self.config.similarity_floor)
            .map(|(id, similarity)| (id.to_string(), similarity))
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }

    fn lexical_ranking(
        &self,
        index: &VectorIndex,
        terms: &[String],
        limit: usize,
    ) -> Vec<(String, f64)> {
        if terms.is_empty() {
            return vec![];
        }

        let stats = CorpusStats::collect(
            index.scan().map(|(_, record)| record.tokens()),
            terms,
            index.average_tokens(),
        );

        let mut ranked: Vec<(String, f64)> = index
            .scan()
            .map(|(id, record)| (id, self.scorer.score(record.tokens(), terms, &stats)))
            .filter(|(_, score)| *score > 0.0 && *score >= self.config.bm25_floor)
            .map(|(id, score)| (id.to_string(), score))
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }

    /// 저장 시도. 실패 시 degraded 경고 후 false
    fn persist(&self, document: &Document, chunks: &[StoredChunk]) -> bool {
        match self.store.save(document, chunks) {
            Ok(()) => true,
            Err(e) => {
                self.mark_degraded(&e);
                false
            }
        }
    }

    fn mark_degraded(&self, error: &anyhow::Error) {
        self.degraded.store(true, Ordering::Relaxed);
        tracing::warn!(
            store = self.store.name(),
            "Document store write failed, running in degraded in-memory-only mode: {:#}",
            error
        );
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 대상 지정에 해당하는 기존 문서
fn resolve_target<'a>(
    documents: &'a HashMap<String, Document>,
    target: &DocumentTarget,
    title: &str,
) -> Option<&'a Document> {
    match target {
        DocumentTarget::New => None,
        DocumentTarget::Existing(id) => documents.get(id),
        // 같은 제목이 여러 개면 가장 먼저 만들어진 문서
        DocumentTarget::ReplaceByTitle => documents
            .values()
            .filter(|d| d.title == title)
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            }),
    }
}

/// 문서 단위 전략 태그: 모든 청크가 프로바이더일 때만 Provider
fn aggregate_scheme(schemes: impl IntoIterator<Item = EmbeddingScheme>) -> EmbeddingScheme {
    let mut any = false;
    for scheme in schemes {
        any = true;
        if scheme != EmbeddingScheme::Provider {
            return EmbeddingScheme::Fallback;
        }
    }
    if any {
        EmbeddingScheme::Provider
    } else {
        EmbeddingScheme::Fallback
    }
}

// ============================================================================
// Tests
// ============================================================================
