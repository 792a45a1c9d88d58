//! CLI 모듈
//!
//! palank-notes CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::RetrievalConfig;
use crate::embedding::has_api_key;
use crate::knowledge::{DocumentTarget, RetrievalService, SearchResponse};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "palank-notes")]
#[command(version, about = "노트 하이브리드 검색 엔진", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트 또는 파일을 노트로 추가
    Ingest {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 읽어올 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        /// 노트 제목 (생략 시 파일명 또는 "Untitled")
        #[arg(long)]
        title: Option<String>,

        /// 교체할 노트 ID
        #[arg(long, conflicts_with = "replace_by_title")]
        id: Option<String>,

        /// 같은 제목의 노트가 있으면 교체
        #[arg(long)]
        replace_by_title: bool,
    },

    /// 노트 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 저장된 노트 목록
    List {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 노트 삭제
    Delete {
        /// 삭제할 노트 ID
        #[arg(short, long)]
        id: String,
    },

    /// 상태 확인
    Status {
        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest {
            text,
            file,
            title,
            id,
            replace_by_title,
        } => cmd_ingest(text, file, title, id, replace_by_title).await,
        Commands::Query { query, limit, json } => cmd_query(&query, limit, json).await,
        Commands::List { limit } => cmd_list(limit).await,
        Commands::Delete { id } => cmd_delete(&id).await,
        Commands::Status { json } => cmd_status(json).await,
    }
}

/// 환경변수 설정으로 서비스 열기
async fn open_service() -> Result<RetrievalService> {
    let config = RetrievalConfig::from_env().context("설정 로드 실패")?;
    let (service, report) = RetrievalService::open(config)
        .await
        .context("RetrievalService 초기화 실패")?;

    if report.migrated > 0 {
        println!(
            "[*] 임베딩 차원이 바뀌어 {} 청크를 재임베딩했습니다",
            report.migrated
        );
        if !report.persisted {
            println!("[!] 재임베딩 결과 일부를 저장하지 못했습니다");
        }
    }

    Ok(service)
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 노트 추가 명령어 (ingest)
async fn cmd_ingest(
    text: Option<String>,
    file: Option<PathBuf>,
    title: Option<String>,
    id: Option<String>,
    replace_by_title: bool,
) -> Result<()> {
    let (content, default_title) = if let Some(ref path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("파일 읽기 실패: {}", path.display()))?;
        let name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("Untitled")
            .to_string();
        (content, name)
    } else if let Some(text) = text {
        (text, "Untitled".to_string())
    } else {
        bail!("--text 또는 --file 중 하나를 지정해야 합니다");
    };

    let title = title.unwrap_or(default_title);
    let target = match (id, replace_by_title) {
        (Some(id), _) => DocumentTarget::Existing(id),
        (None, true) => DocumentTarget::ReplaceByTitle,
        (None, false) => DocumentTarget::New,
    };

    if !has_api_key() {
        println!("[!] API 키 미설정: 폴백 임베딩을 사용합니다");
    }

    let service = open_service().await?;
    println!("[*] 노트 청킹 및 임베딩 중...");

    let outcome = service
        .process_document(&content, &title, target)
        .await
        .context("노트 추가 실패")?;

    let action = if outcome.replaced { "교체" } else { "추가" };
    println!("[OK] 노트가 {}되었습니다 (ID: {})", action, outcome.document_id);
    println!(
        "     청크: {} | 임베딩: {}",
        outcome.chunk_count, outcome.embedding_scheme
    );
    if !outcome.persisted {
        println!("[!] 저장소 쓰기 실패: 이번 실행 동안만 메모리에 존재합니다");
    }

    Ok(())
}

/// 검색 명령어 (query)
///
/// 코사인 + BM25 하이브리드 검색
async fn cmd_query(query: &str, limit: usize, json: bool) -> Result<()> {
    let service = open_service().await?;

    let response = service.hybrid_search(query, limit).await.context("검색 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let hits = match response {
        SearchResponse::NoContentIndexed => {
            println!("[!] 색인된 노트가 없습니다. 먼저 `palank-notes ingest`로 노트를 추가하세요.");
            return Ok(());
        }
        SearchResponse::Hits(hits) => hits,
    };

    if hits.is_empty() {
        println!("[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("[OK] 검색 결과 ({} 건):\n", hits.len());

    for (i, hit) in hits.iter().enumerate() {
        let method = match (hit.similarity, hit.bm25) {
            (Some(_), Some(_)) => "HYB",
            (Some(_), None) => "VEC",
            (None, _) => "BM25",
        };

        println!(
            "{}. [{}] [점수: {:.4}] {} ({}/{})",
            i + 1,
            method,
            hit.score,
            hit.metadata.title,
            hit.metadata.chunk_index + 1,
            hit.metadata.total_chunks
        );
        println!("   ID: {}", hit.chunk_id);
        println!("   내용: {}", truncate_text(&hit.text, 200));
        println!();
    }

    Ok(())
}

/// 목록 명령어 (list)
async fn cmd_list(limit: usize) -> Result<()> {
    let service = open_service().await?;
    let documents = service.documents().await;

    if documents.is_empty() {
        println!("[!] 저장된 노트가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 노트 ({} 건):\n", documents.len());

    for doc in documents.iter().take(limit) {
        println!("  {} [{}] {}", doc.id, doc.embedding_scheme, truncate_text(&doc.title, 40));
        println!(
            "        {} | {} chunks | {} chars",
            doc.updated_at.format("%Y-%m-%d %H:%M"),
            doc.chunk_count,
            doc.content.chars().count()
        );
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(id: &str) -> Result<()> {
    let service = open_service().await?;

    if service.delete_document(id).await {
        println!("[OK] 노트 {} 삭제됨", id);
    } else {
        println!("[!] 삭제할 노트를 찾을 수 없습니다: {}", id);
    }

    if service.get_stats().await.degraded {
        println!("[!] 저장소 갱신 실패: 다음 실행 시 노트가 다시 나타날 수 있습니다");
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(json: bool) -> Result<()> {
    let service = open_service().await?;
    let stats = service.get_stats().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("palank-notes v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!(
        "[*] 데이터 디렉토리: {}",
        service.config().data_dir.display()
    );

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정 (폴백 임베딩 사용)");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    println!(
        "[OK] 임베딩: {} (차원 {})",
        service.embedder().scheme(),
        stats.dimension
    );
    println!("[OK] 노트: {} 건", stats.document_count);
    for (scheme, count) in &stats.documents_by_scheme {
        println!("     {}: {}", scheme, count);
    }
    println!("[OK] 청크: {} 건", stats.chunk_count);
    for (scheme, count) in &stats.chunks_by_scheme {
        println!("     {}: {}", scheme, count);
    }
    println!(
        "[OK] 메모리 사용량(추정): {}",
        format_bytes(stats.approximate_memory_bytes)
    );

    if stats.degraded {
        println!("[!] 저장소 쓰기 실패: 메모리 전용 모드");
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("line one\r\nline two", 20), "line one line two");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_text("노트 검색 엔진", 5), "노트 검색...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 / 2), "1.50 MB");
    }

    #[test]
    fn test_parse_ingest_targets() {
        let cli = Cli::try_parse_from([
            "palank-notes",
            "ingest",
            "--text",
            "body",
            "--title",
            "Note",
            "--replace-by-title",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Ingest {
                replace_by_title: true,
                id: None,
                ..
            }
        ));

        // --id 와 --replace-by-title 은 함께 쓸 수 없음
        assert!(Cli::try_parse_from([
            "palank-notes",
            "ingest",
            "--text",
            "body",
            "--id",
            "n1",
            "--replace-by-title",
        ])
        .is_err());
    }

    #[test]
    fn test_parse_query_defaults() {
        let cli = Cli::try_parse_from(["palank-notes", "query", "what is rag"]).unwrap();
        match cli.command {
            Commands::Query { query, limit, json } => {
                assert_eq!(query, "what is rag");
                assert_eq!(limit, 5);
                assert!(!json);
            }
            _ => panic!("expected query command"),
        }
    }
}
