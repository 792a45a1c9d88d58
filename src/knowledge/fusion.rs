//! RRF (Reciprocal Rank Fusion)
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf
//!
//! 0-based 순위 r의 항목은 `1 / (k + r + 1)`을 기여하고,
//! 같은 ID의 기여는 두 목록에 걸쳐 합산됩니다.
//! 동점은 시맨틱 순위 → 렉시컬 순위 → ID 순으로 결정합니다.

use std::cmp::Ordering;
use std::collections::HashMap;

/// RRF 기본 k (높은 순위에 더 많은 가중치)
pub const RRF_K: usize = 60;

// ============================================================================
// Types
// ============================================================================

/// 융합 결과 항목
#[derive(Debug, Clone, PartialEq)]
pub struct Fused<P> {
    pub id: String,
    pub payload: P,
    /// 시맨틱 목록에서의 0-based 순위
    pub semantic_rank: Option<usize>,
    /// 렉시컬 목록에서의 0-based 순위
    pub lexical_rank: Option<usize>,
    /// 시맨틱 RRF 기여
    pub semantic_score: f64,
    /// 렉시컬 RRF 기여
    pub lexical_score: f64,
    /// 합산 스코어
    pub score: f64,
}

/// 순위 → RRF 기여
#[inline]
pub fn rrf_contribution(rank: usize, k: usize) -> f64 {
    1.0 / (k as f64 + rank as f64 + 1.0)
}

// ============================================================================
// Fusion
// ============================================================================

/// 두 순위 목록을 RRF로 병합
///
/// 같은 ID가 한 목록에 여러 번 나오면 첫 번째(가장 높은 순위)만 사용합니다.
/// 페이로드는 시맨틱 목록 쪽을 우선합니다.
///
/// # Arguments
/// * `semantic` - 시맨틱 검색 순위 목록 (ID, 페이로드)
/// * `lexical` - 렉시컬 검색 순위 목록 (ID, 페이로드)
/// * `k` - RRF 상수
pub fn fuse<P: Clone>(
    semantic: &[(String, P)],
    lexical: &[(String, P)],
    k: usize,
) -> Vec<Fused<P>> {
    let mut merged: HashMap<&str, Fused<P>> = HashMap::new();

    for (rank, (id, payload)) in semantic.iter().enumerate() {
        merged.entry(id.as_str()).or_insert_with(|| {
            let score = rrf_contribution(rank, k);
            Fused {
                id: id.clone(),
                payload: payload.clone(),
                semantic_rank: Some(rank),
                lexical_rank: None,
                semantic_score: score,
                lexical_score: 0.0,
                score,
            }
        });
    }

    for (rank, (id, payload)) in lexical.iter().enumerate() {
        let entry = merged.entry(id.as_str()).or_insert_with(|| Fused {
            id: id.clone(),
            payload: payload.clone(),
            semantic_rank: None,
            lexical_rank: None,
            semantic_score: 0.0,
            lexical_score: 0.0,
            score: 0.0,
        });

        if entry.lexical_rank.is_none() {
            let score = rrf_contribution(rank, k);
            entry.lexical_rank = Some(rank);
            entry.lexical_score = score;
            entry.score = entry.semantic_score + score;
        }
    }

    let mut results: Vec<Fused<P>> = merged.into_values().collect();
    results.sort_by(compare);
    results
}

/// 스코어 내림차순, 동점이면 시맨틱 순위 → 렉시컬 순위 → ID
fn compare<P>(a: &Fused<P>, b: &Fused<P>) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| rank_key(a.semantic_rank).cmp(&rank_key(b.semantic_rank)))
        .then_with(|| rank_key(a.lexical_rank).cmp(&rank_key(b.lexical_rank)))
        .then_with(|| a.id.cmp(&b.id))
}

/// 목록에 없으면 가장 낮은 순위로 취급
#[inline]
fn rank_key(rank: Option<usize>) -> usize {
    rank.unwrap_or(usize::MAX)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[&str]) -> Vec<(String, ())> {
        ids.iter().map(|id| (id.to_string(), ())).collect()
    }

    fn ids<P>(fused: &[Fused<P>]) -> Vec<&str> {
        fused.iter().map(|f| f.id.as_str()).collect()
    }

    #[test]
    fn test_rrf_contribution() {
        // 1위: 1 / (60 + 0 + 1) = 1/61
        assert!((rrf_contribution(0, RRF_K) - 1.0 / 61.0).abs() < 1e-12);
        // 5위: 1 / 65
        assert!((rrf_contribution(4, RRF_K) - 1.0 / 65.0).abs() < 1e-12);
        assert!(rrf_contribution(0, RRF_K) > rrf_contribution(4, RRF_K));
    }

    #[test]
    fn test_items_in_both_lists_rank_first() {
        let semantic = list(&["a", "b", "c"]);
        let lexical = list(&["c", "a", "d"]);

        let fused = fuse(&semantic, &lexical, RRF_K);
        assert_eq!(fused.len(), 4);

        // a: 1/61 + 1/62, c: 1/63 + 1/61
        assert_eq!(ids(&fused[..2]), vec!["a", "c"]);
        let a = &fused[0];
        assert!((a.score - (1.0 / 61.0 + 1.0 / 62.0)).abs() < 1e-12);
        assert_eq!(a.semantic_rank, Some(0));
        assert_eq!(a.lexical_rank, Some(1));
        assert!((a.score - (a.semantic_score + a.lexical_score)).abs() < 1e-15);
    }

    #[test]
    fn test_single_list_preserves_order() {
        let semantic = list(&["x", "y", "z"]);
        let fused = fuse(&semantic, &[], RRF_K);
        assert_eq!(ids(&fused), vec!["x", "y", "z"]);
        assert!(fused.iter().all(|f| f.lexical_score == 0.0));

        let fused = fuse::<()>(&[], &semantic, RRF_K);
        assert_eq!(ids(&fused), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_both_empty() {
        assert!(fuse::<()>(&[], &[], RRF_K).is_empty());
    }

    #[test]
    fn test_ties_broken_by_semantic_rank() {
        // b: semantic 0, a: lexical 0 → 동점, 시맨틱 쪽이 먼저
        let fused = fuse(&list(&["b"]), &list(&["a"]), RRF_K);
        assert_eq!(ids(&fused), vec!["b", "a"]);
        assert_eq!(fused[0].score, fused[1].score);
    }

    #[test]
    fn test_symmetric_ties_broken_by_semantic_then_lexical() {
        // p: (0, 1), q: (1, 0) → 동점, p가 시맨틱 순위로 앞섬
        let fused = fuse(&list(&["p", "q"]), &list(&["q", "p"]), RRF_K);
        assert_eq!(ids(&fused), vec!["p", "q"]);
    }

    #[test]
    fn test_deterministic_and_idempotent() {
        let semantic = list(&["a", "b", "c", "d", "e"]);
        let lexical = list(&["e", "d", "c", "b", "a"]);

        let first = fuse(&semantic, &lexical, 10);
        let second = fuse(&semantic, &lexical, 10);
        assert_eq!(first, second);
    }

    #[test]
    fn test_score_bounds() {
        let k = RRF_K;
        let semantic = list(&["a", "b", "c", "d"]);
        let lexical = list(&["a", "c", "e"]);
        let upper = 2.0 / (k as f64 + 1.0);

        for f in fuse(&semantic, &lexical, k) {
            assert!(f.score > 0.0);
            assert!(f.score <= upper + 1e-15);
        }

        let top = &fuse(&semantic, &lexical, k)[0];
        assert_eq!(top.id, "a");
        assert!((top.score - upper).abs() < 1e-15);
    }

    #[test]
    fn test_duplicate_ids_use_best_rank() {
        let fused = fuse(&list(&["a", "a", "b"]), &[], RRF_K);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].semantic_rank, Some(0));
    }

    #[test]
    fn test_semantic_payload_preferred() {
        let semantic = vec![("a".to_string(), "from-semantic")];
        let lexical = vec![("a".to_string(), "from-lexical")];
        let fused = fuse(&semantic, &lexical, RRF_K);
        assert_eq!(fused[0].payload, "from-semantic");
    }
}
