//! Persistence Gateway - 영구 저장소 경계
//!
//! 시작 시 `load_all`, 쓰기마다 `save`, 삭제 시 `mark_deleted`(tombstone).
//! 인메모리 인덱스가 기준이며, 저장 실패는 엔진에서 경고로만 처리합니다.
//!
//! 구현체:
//! - `SqliteStore`: rusqlite 기반 (~/.palank-notes/notes.db)
//! - `InMemoryStore`: 테스트 / 메모리 전용 실행용

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingScheme;

// ============================================================================
// Types
// ============================================================================

/// 문서 엔트리
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub chunk_count: usize,
    /// 벡터를 만든 임베딩 전략
    pub embedding_scheme: EmbeddingScheme,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 저장된 청크 (벡터 포함)
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    /// 저장된 벡터 (없을 수 있음 → 재임베딩 대상)
    pub embedding: Option<Vec<f32>>,
    /// 저장 당시 벡터 차원
    pub dimension: usize,
    pub scheme: Option<EmbeddingScheme>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// PersistenceGateway Trait
// ============================================================================

/// 영구 저장소 트레이트
pub trait PersistenceGateway: Send + Sync {
    /// 문서와 청크 집합 저장 (기존 청크는 교체)
    fn save(&self, document: &Document, chunks: &[StoredChunk]) -> Result<()>;

    /// 삭제되지 않은 모든 문서와 청크 로드 (청크는 인덱스 순)
    fn load_all(&self) -> Result<Vec<(Document, Vec<StoredChunk>)>>;

    /// 문서 tombstone 처리. 존재하지 않으면 false
    fn mark_deleted(&self, document_id: &str) -> Result<bool>;

    /// 저장소 이름 (로그용)
    fn name(&self) -> &str;
}

// ============================================================================
// SqliteStore
// ============================================================================

/// SQLite 기반 저장소
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                embedding_scheme TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id),
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB,
                dimension INTEGER NOT NULL,
                scheme TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);",
        )
        .context("Failed to create tables")?;

        tracing::debug!("Document store initialized at {:?}", self.db_path);
        Ok(())
    }
}

impl PersistenceGateway for SqliteStore {
    fn save(&self, document: &Document, chunks: &[StoredChunk]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        tx.execute(
            "INSERT INTO documents
                (id, title, content, chunk_count, embedding_scheme, created_at, updated_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                chunk_count = excluded.chunk_count,
                embedding_scheme = excluded.embedding_scheme,
                updated_at = excluded.updated_at,
                deleted_at = NULL",
            params![
                document.id,
                document.title,
                document.content,
                document.chunk_count as i64,
                document.embedding_scheme.as_str(),
                document.created_at.to_rfc3339(),
                document.updated_at.to_rfc3339(),
            ],
        )
        .context("Failed to upsert document")?;

        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document.id],
        )
        .context("Failed to clear previous chunks")?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks
                    (id, document_id, chunk_index, text, embedding, dimension, scheme, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for chunk in chunks {
                stmt.execute(params![
                    chunk.id,
                    chunk.document_id,
                    chunk.chunk_index as i64,
                    chunk.text,
                    chunk.embedding.as_deref().map(encode_vector),
                    chunk.dimension as i64,
                    chunk.scheme.map(|s| s.as_str()),
                    chunk.created_at.to_rfc3339(),
                ])
                .context("Failed to insert chunk")?;
            }
        }

        tx.commit().context("Failed to commit document")?;

        tracing::debug!(
            "Saved document {} ({} chunks)",
            document.id,
            chunks.len()
        );
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<(Document, Vec<StoredChunk>)>> {
        let conn = self.lock()?;

        let mut doc_stmt = conn.prepare(
            "SELECT id, title, content, chunk_count, embedding_scheme, created_at, updated_at
             FROM documents
             WHERE deleted_at IS NULL
             ORDER BY created_at, id",
        )?;

        let documents = doc_stmt
            .query_map([], |row| {
                let scheme: String = row.get(4)?;
                Ok(Document {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    content: row.get(2)?,
                    chunk_count: row.get::<_, i64>(3)? as usize,
                    embedding_scheme: EmbeddingScheme::parse(&scheme)
                        .unwrap_or(EmbeddingScheme::Fallback),
                    created_at: parse_datetime(row.get::<_, String>(5)?),
                    updated_at: parse_datetime(row.get::<_, String>(6)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read documents")?;

        let mut chunk_stmt = conn.prepare(
            "SELECT id, document_id, chunk_index, text, embedding, dimension, scheme, created_at
             FROM chunks
             WHERE document_id = ?1
             ORDER BY chunk_index",
        )?;

        let mut loaded = Vec::with_capacity(documents.len());
        for document in documents {
            let chunks = chunk_stmt
                .query_map(params![document.id], |row| {
                    let blob: Option<Vec<u8>> = row.get(4)?;
                    let scheme: Option<String> = row.get(6)?;
                    Ok(StoredChunk {
                        id: row.get(0)?,
                        document_id: row.get(1)?,
                        chunk_index: row.get::<_, i64>(2)? as usize,
                        text: row.get(3)?,
                        embedding: blob.and_then(|b| decode_vector(&b)),
                        dimension: row.get::<_, i64>(5)? as usize,
                        scheme: scheme.as_deref().and_then(EmbeddingScheme::parse),
                        created_at: parse_datetime(row.get::<_, String>(7)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
                .with_context(|| format!("Failed to read chunks of {}", document.id))?;

            loaded.push((document, chunks));
        }

        Ok(loaded)
    }

    fn mark_deleted(&self, document_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        let rows = conn
            .execute(
                "UPDATE documents SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                params![now, document_id],
            )
            .context("Failed to mark document deleted")?;

        Ok(rows > 0)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
impl SqliteStore {
    fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// tombstone 포함 문서 수 (진단용)
    fn tombstone_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE deleted_at IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// tombstone 여부 조회 (None: 문서 없음)
    fn is_deleted(&self, document_id: &str) -> Result<Option<bool>> {
        use rusqlite::OptionalExtension;

        let conn = self.lock()?;
        let deleted_at: Option<Option<String>> = conn
            .query_row(
                "SELECT deleted_at FROM documents WHERE id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(deleted_at.map(|d| d.is_some()))
    }
}

// ============================================================================
// InMemoryStore
// ============================================================================

/// 메모리 저장소 (프로세스 종료 시 사라짐)
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
}

struct StoredEntry {
    document: Document,
    chunks: Vec<StoredChunk>,
    deleted: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredEntry>>> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }
}

impl PersistenceGateway for InMemoryStore {
    fn save(&self, document: &Document, chunks: &[StoredChunk]) -> Result<()> {
        let mut entries = self.lock()?;
        entries.insert(
            document.id.clone(),
            StoredEntry {
                document: document.clone(),
                chunks: chunks.to_vec(),
                deleted: false,
            },
        );
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<(Document, Vec<StoredChunk>)>> {
        let entries = self.lock()?;
        let mut loaded: Vec<(Document, Vec<StoredChunk>)> = entries
            .values()
            .filter(|e| !e.deleted)
            .map(|e| {
                let mut chunks = e.chunks.clone();
                chunks.sort_by_key(|c| c.chunk_index);
                (e.document.clone(), chunks)
            })
            .collect();
        loaded.sort_by(|a, b| {
            a.0.created_at
                .cmp(&b.0.created_at)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        Ok(loaded)
    }

    fn mark_deleted(&self, document_id: &str) -> Result<bool> {
        let mut entries = self.lock()?;
        match entries.get_mut(document_id) {
            Some(entry) if !entry.deleted => {
                entry.deleted = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// f32 벡터 → little-endian BLOB
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// little-endian BLOB → f32 벡터 (길이가 4의 배수가 아니면 None)
fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = SqliteStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn document(id: &str, title: &str, chunk_count: usize) -> Document {
        let now = Utc::now();
        Document {
            id: id.to_string(),
            title: title.to_string(),
            content: "content".to_string(),
            chunk_count,
            embedding_scheme: EmbeddingScheme::Fallback,
            created_at: now,
            updated_at: now,
        }
    }

    fn chunk(doc: &str, index: usize, embedding: Option<Vec<f32>>) -> StoredChunk {
        StoredChunk {
            id: format!("{doc}#{index}"),
            document_id: doc.to_string(),
            chunk_index: index,
            text: format!("chunk {index}"),
            dimension: embedding.as_ref().map(Vec::len).unwrap_or(0),
            embedding,
            scheme: Some(EmbeddingScheme::Fallback),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_vector_blob_encoding() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(decode_vector(&encode_vector(&v)), Some(v));
        assert_eq!(decode_vector(&[1, 2, 3]), None);
        assert_eq!(decode_vector(&[]), Some(vec![]));
    }

    #[test]
    fn test_save_and_load() {
        let (_dir, store) = create_test_store();

        let doc = document("d1", "Guide", 2);
        let chunks = vec![
            chunk("d1", 1, Some(vec![0.0, 1.0])),
            chunk("d1", 0, Some(vec![1.0, 0.0])),
        ];
        store.save(&doc, &chunks).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);

        let (loaded_doc, loaded_chunks) = &loaded[0];
        assert_eq!(loaded_doc.id, "d1");
        assert_eq!(loaded_doc.title, "Guide");
        assert_eq!(loaded_doc.chunk_count, 2);
        assert_eq!(loaded_doc.embedding_scheme, EmbeddingScheme::Fallback);

        // chunk_index 순서
        assert_eq!(loaded_chunks[0].chunk_index, 0);
        assert_eq!(loaded_chunks[0].embedding, Some(vec![1.0, 0.0]));
        assert_eq!(loaded_chunks[1].dimension, 2);
    }

    #[test]
    fn test_save_replaces_chunks() {
        let (_dir, store) = create_test_store();

        let doc = document("d1", "Guide", 3);
        let chunks: Vec<_> = (0..3).map(|i| chunk("d1", i, Some(vec![1.0]))).collect();
        store.save(&doc, &chunks).unwrap();

        let doc = document("d1", "Guide v2", 1);
        store.save(&doc, &[chunk("d1", 0, Some(vec![2.0]))]).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0.title, "Guide v2");
        assert_eq!(loaded[0].1.len(), 1);
        assert_eq!(loaded[0].1[0].embedding, Some(vec![2.0]));
    }

    #[test]
    fn test_missing_embedding_round_trips_as_none() {
        let (_dir, store) = create_test_store();
        store
            .save(&document("d1", "T", 1), &[chunk("d1", 0, None)])
            .unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded[0].1[0].embedding, None);
        assert_eq!(loaded[0].1[0].dimension, 0);
    }

    #[test]
    fn test_mark_deleted_is_tombstone() {
        let (_dir, store) = create_test_store();
        store
            .save(&document("d1", "T", 1), &[chunk("d1", 0, Some(vec![1.0]))])
            .unwrap();

        assert!(store.mark_deleted("d1").unwrap());
        assert!(!store.mark_deleted("d1").unwrap());
        assert!(!store.mark_deleted("missing").unwrap());

        assert!(store.load_all().unwrap().is_empty());
        assert_eq!(store.is_deleted("d1").unwrap(), Some(true));
        assert_eq!(store.is_deleted("missing").unwrap(), None);
        assert_eq!(store.tombstone_count().unwrap(), 1);

        // 다시 저장하면 복원
        store
            .save(&document("d1", "T", 1), &[chunk("d1", 0, Some(vec![1.0]))])
            .unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_persists() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("notes.db");

        {
            let store = SqliteStore::open(&db_path).unwrap();
            store
                .save(&document("d1", "T", 1), &[chunk("d1", 0, Some(vec![1.0]))])
                .unwrap();
        }

        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.db_path(), db_path.as_path());
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_in_memory_store_contract() {
        let store = InMemoryStore::new();
        store
            .save(&document("d1", "T", 1), &[chunk("d1", 0, Some(vec![1.0]))])
            .unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);

        assert!(store.mark_deleted("d1").unwrap());
        assert!(!store.mark_deleted("d1").unwrap());
        assert!(store.load_all().unwrap().is_empty());
        assert_eq!(store.name(), "memory");
    }
}
