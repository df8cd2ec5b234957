//! Concurrent multi-source retrieval with weighted score fusion.

use super::models::{Candidate, SearchQuery, SourceTag};
use crate::case_store::CaseStore;
use crate::metrics;
use crate::sources::{RetrievalSource, SourceHit};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FusionSettings {
    /// Sources that have not answered by then are treated as failed.
    pub source_timeout: Duration,
    /// Cap for the plain-text fallback scan.
    pub fallback_limit: usize,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            source_timeout: Duration::from_millis(3000),
            fallback_limit: 50,
        }
    }
}

/// Queries every enabled source concurrently and merges their hits by case id.
pub struct FusionEngine {
    sources: Vec<Arc<dyn RetrievalSource>>,
    store: Arc<dyn CaseStore>,
    settings: FusionSettings,
}

impl FusionEngine {
    pub fn new(
        mut sources: Vec<Arc<dyn RetrievalSource>>,
        store: Arc<dyn CaseStore>,
        settings: FusionSettings,
    ) -> Self {
        // Stable sort: adapters sharing a tag keep registration order.
        sources.sort_by_key(|s| s.tag());
        Self {
            sources,
            store,
            settings,
        }
    }

    /// Fuse hits from all sources into a deduplicated list ordered by
    /// descending combined score.
    ///
    /// Never fails: a failing source contributes nothing, and an empty merge
    /// falls back to a substring scan of the case store.
    pub async fn fuse(&self, query: &SearchQuery) -> Vec<Candidate> {
        let lists = self.collect(query).await;
        let candidates = merge(lists);

        if !candidates.is_empty() {
            debug!(count = candidates.len(), "Fused candidates");
            return candidates;
        }

        let fallback = self.fallback_scan(query);
        metrics::record_fallback(!fallback.is_empty());
        info!(
            tenant_id = %query.tenant_id,
            count = fallback.len(),
            "No source returned candidates, used fallback scan"
        );
        fallback
    }

    /// Query enabled sources concurrently. Output order follows source
    /// priority regardless of completion order.
    async fn collect(&self, query: &SearchQuery) -> Vec<(SourceTag, Vec<SourceHit>)> {
        let timeout = self.settings.source_timeout;
        let calls = self
            .sources
            .iter()
            .filter(|source| source.is_enabled())
            .map(|source| async move {
                let tag = source.tag();
                let hits = match tokio::time::timeout(timeout, source.search(query)).await {
                    Ok(Ok(hits)) => hits,
                    Ok(Err(e)) => {
                        warn!(source = %tag, error = %e, "Retrieval source failed");
                        metrics::record_source_failure(tag.as_str(), "error");
                        Vec::new()
                    }
                    Err(_) => {
                        warn!(
                            source = %tag,
                            timeout_ms = timeout.as_millis() as u64,
                            "Retrieval source timed out"
                        );
                        metrics::record_source_failure(tag.as_str(), "timeout");
                        Vec::new()
                    }
                };
                (tag, hits)
            });

        join_all(calls).await
    }

    fn fallback_scan(&self, query: &SearchQuery) -> Vec<Candidate> {
        let records = match self.store.scan_text(
            &query.tenant_id,
            query.text.trim(),
            &query.filters,
            self.settings.fallback_limit,
        ) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Fallback scan failed");
                return Vec::new();
            }
        };

        records
            .into_iter()
            .map(|r| Candidate::new(r.id, r.title, r.content, SourceTag::Fallback, 0.0))
            .collect()
    }
}

/// Merge per-source hit lists, keyed by case id.
///
/// The first list to report a case supplies its title and content. The result
/// is sorted by descending combined score; ties keep first-seen order.
pub fn merge(lists: Vec<(SourceTag, Vec<SourceHit>)>) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for (tag, hits) in lists {
        for hit in hits {
            match by_id.get(&hit.case_id) {
                Some(&i) => candidates[i].record(tag, hit.score),
                None => {
                    by_id.insert(hit.case_id.clone(), candidates.len());
                    candidates.push(Candidate::new(
                        hit.case_id,
                        hit.title,
                        hit.content,
                        tag,
                        hit.score,
                    ));
                }
            }
        }
    }

    candidates.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case_store::{CaseRecord, SqliteCaseStore};
    use crate::test_support::{FailingSource, SlowSource, StaticSource};

    fn empty_store() -> Arc<dyn CaseStore> {
        Arc::new(SqliteCaseStore::in_memory().unwrap())
    }

    fn dyn_source<S: RetrievalSource + 'static>(source: S) -> Arc<dyn RetrievalSource> {
        Arc::new(source)
    }

    fn engine(sources: Vec<Arc<dyn RetrievalSource>>, store: Arc<dyn CaseStore>) -> FusionEngine {
        FusionEngine::new(
            sources,
            store,
            FusionSettings {
                source_timeout: Duration::from_millis(200),
                fallback_limit: 50,
            },
        )
    }

    #[test]
    fn test_merge_weights_and_order() {
        let fused = merge(vec![
            (
                SourceTag::FullText,
                vec![SourceHit::new("A", "Reset password", "es body", 0.9)],
            ),
            (
                SourceTag::Vector,
                vec![
                    SourceHit::new("A", "other title", "vec body", 0.85),
                    SourceHit::new("B", "Change email", "", 0.6),
                ],
            ),
        ]);

        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].case_id, "A");
        assert!((fused[0].combined_score - 0.70).abs() < 1e-9);
        assert_eq!(fused[0].title, "Reset password");
        assert_eq!(fused[0].content, "es body");
        assert_eq!(fused[1].case_id, "B");
        assert!((fused[1].combined_score - 0.24).abs() < 1e-9);
    }

    #[test]
    fn test_merge_ties_keep_source_priority() {
        let fused = merge(vec![
            (SourceTag::FullText, vec![SourceHit::new("es", "", "", 0.5)]),
            (SourceTag::Vector, vec![SourceHit::new("vec", "", "", 0.5)]),
        ]);
        let ids: Vec<_> = fused.iter().map(|c| c.case_id.as_str()).collect();
        assert_eq!(ids, vec!["es", "vec"]);
    }

    #[test]
    fn test_merge_unique_case_ids() {
        let fused = merge(vec![
            (
                SourceTag::FullText,
                vec![SourceHit::new("a", "", "", 1.0), SourceHit::new("b", "", "", 0.2)],
            ),
            (
                SourceTag::Vector,
                vec![SourceHit::new("b", "", "", 0.3), SourceHit::new("a", "", "", 0.1)],
            ),
            (SourceTag::Graph, vec![SourceHit::new("a", "", "", 1.0)]),
        ]);
        assert_eq!(fused.len(), 2);
        let a = fused.iter().find(|c| c.case_id == "a").unwrap();
        assert!((a.combined_score - (0.4 * 1.0 + 0.4 * 0.1 + 0.2 * 1.0)).abs() < 1e-9);
        assert_eq!(
            a.provenance,
            vec![SourceTag::FullText, SourceTag::Vector, SourceTag::Graph]
        );
    }

    #[tokio::test]
    async fn test_fuse_queries_sources_concurrently() {
        let es = dyn_source(StaticSource::new(
            SourceTag::FullText,
            vec![SourceHit::new("A", "Reset password", "", 0.9)],
        ));
        let vec = dyn_source(StaticSource::new(
            SourceTag::Vector,
            vec![
                SourceHit::new("A", "Reset password", "", 0.85),
                SourceHit::new("B", "Other", "", 0.6),
            ],
        ));

        // Registered out of priority order on purpose
        let fusion = engine(vec![vec, es], empty_store());
        let fused = fusion.fuse(&SearchQuery::new("reset password", "t1")).await;

        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].case_id, "A");
        assert_eq!(fused[0].provenance, vec![SourceTag::FullText, SourceTag::Vector]);
        assert!((fused[0].combined_score - 0.70).abs() < 1e-9);
        assert!((fused[1].combined_score - 0.24).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failing_source_equals_missing_source() {
        let hits_a = vec![SourceHit::new("x", "X", "", 0.7), SourceHit::new("y", "Y", "", 0.4)];
        let hits_b = vec![SourceHit::new("y", "Y", "", 0.9)];

        let with_failure = engine(
            vec![
                dyn_source(StaticSource::new(SourceTag::FullText, hits_a.clone())),
                dyn_source(StaticSource::new(SourceTag::Vector, hits_b.clone())),
                dyn_source(FailingSource::new(SourceTag::Graph)),
            ],
            empty_store(),
        );
        let with_timeout = engine(
            vec![
                dyn_source(StaticSource::new(SourceTag::FullText, hits_a.clone())),
                dyn_source(StaticSource::new(SourceTag::Vector, hits_b.clone())),
                dyn_source(SlowSource::new(SourceTag::Graph, Duration::from_secs(5))),
            ],
            empty_store(),
        );
        let without = engine(
            vec![
                dyn_source(StaticSource::new(SourceTag::FullText, hits_a)),
                dyn_source(StaticSource::new(SourceTag::Vector, hits_b)),
            ],
            empty_store(),
        );

        let query = SearchQuery::new("q", "t1");
        let expected = without.fuse(&query).await;
        assert_eq!(with_failure.fuse(&query).await, expected);
        assert_eq!(with_timeout.fuse(&query).await, expected);
    }

    #[tokio::test]
    async fn test_disabled_source_not_queried() {
        let disabled = Arc::new(
            StaticSource::new(SourceTag::FullText, vec![SourceHit::new("a", "", "", 1.0)])
                .disabled(),
        );
        let fusion = engine(vec![disabled.clone() as Arc<dyn RetrievalSource>], empty_store());
        let fused = fusion.fuse(&SearchQuery::new("nothing", "t1")).await;

        assert!(fused.is_empty());
        assert_eq!(disabled.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_sources_fail_uses_fallback_scan() {
        let store = SqliteCaseStore::in_memory().unwrap();
        store
            .insert_case(&CaseRecord::published("c1", "t1", "Password reset guide", "steps"))
            .unwrap();
        store
            .insert_case(&CaseRecord::published("c2", "t1", "Billing", "reset PASSWORD here"))
            .unwrap();
        store
            .insert_case(&CaseRecord::published("c3", "t2", "Password reset", "other tenant"))
            .unwrap();
        store
            .insert_case(&CaseRecord::published("c4", "t1", "Unrelated", "nothing"))
            .unwrap();

        let fusion = engine(
            vec![
                dyn_source(FailingSource::new(SourceTag::FullText)),
                dyn_source(FailingSource::new(SourceTag::Vector)),
                dyn_source(FailingSource::new(SourceTag::Graph)),
            ],
            Arc::new(store),
        );

        let fused = fusion.fuse(&SearchQuery::new("password", "t1")).await;
        let mut ids: Vec<_> = fused.iter().map(|c| c.case_id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["c1", "c2"]);
        for candidate in &fused {
            assert_eq!(candidate.provenance, vec![SourceTag::Fallback]);
            assert_eq!(candidate.combined_score, 0.0);
        }
    }

    #[tokio::test]
    async fn test_fallback_scan_ignores_non_ascii_case() {
        let store = SqliteCaseStore::in_memory().unwrap();
        store
            .insert_case(&CaseRecord::published("ru", "t1", "Ошибка оплаты", "подробности"))
            .unwrap();
        store
            .insert_case(&CaseRecord::published("fr", "t1", "Échec de paiement", "détails"))
            .unwrap();
        let fusion = engine(vec![], Arc::new(store));

        let ru = fusion.fuse(&SearchQuery::new("ОШИБКА", "t1")).await;
        let fr = fusion.fuse(&SearchQuery::new("échec", "t1")).await;

        assert_eq!(ru.len(), 1);
        assert_eq!(ru[0].case_id, "ru");
        assert_eq!(ru[0].provenance, vec![SourceTag::Fallback]);
        assert_eq!(fr.len(), 1);
        assert_eq!(fr[0].case_id, "fr");
    }

    #[tokio::test]
    async fn test_fallback_scan_is_capped() {
        let store = SqliteCaseStore::in_memory().unwrap();
        for i in 0..10 {
            store
                .insert_case(&CaseRecord::published(
                    format!("c{i}"),
                    "t1",
                    "vpn issue",
                    "",
                ))
                .unwrap();
        }
        let fusion = FusionEngine::new(
            vec![],
            Arc::new(store),
            FusionSettings {
                source_timeout: Duration::from_millis(100),
                fallback_limit: 3,
            },
        );
        let fused = fusion.fuse(&SearchQuery::new("VPN", "t1")).await;
        assert_eq!(fused.len(), 3);
    }
}
