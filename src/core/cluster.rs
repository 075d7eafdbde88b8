use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::core::photo::ThumbnailEntry;
use crate::core::policy::MethodPolicy;
use crate::engine::GroupingError;
use crate::services::cache::ComparisonCache;
use crate::services::oracle::{CompareMethod, SimilarityOracle};

/// Counters shared across the comparison tasks of one run.
#[derive(Debug, Default)]
pub struct RunStats {
    pub oracle_calls: AtomicUsize,
    pub cache_hits: AtomicUsize,
    pub failed_comparisons: AtomicUsize,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Single-link greedy clustering over a working set of thumbnails.
///
/// One pivot is popped off the end of the worklist per step and compared
/// concurrently against every remaining entry. Comparison tasks only report
/// `(index, score)` pairs; the worklist is mutated in one synchronous step
/// after the whole fan-out has settled, so tasks never race on it. The
/// threshold is inclusive, and pivot order stays observable in the result.
///
/// Clusters of size 1 are dropped, never emitted.
pub async fn cluster_entries(
    oracle: &dyn SimilarityOracle,
    mut worklist: Vec<ThumbnailEntry>,
    threshold: f64,
    method_policy: MethodPolicy,
    cache: Option<&ComparisonCache>,
    stats: &RunStats,
    cancelled: &AtomicBool,
) -> Result<Vec<Vec<ThumbnailEntry>>, GroupingError> {
    let mut clusters = Vec::new();

    while let Some(pivot) = worklist.pop() {
        if cancelled.load(Ordering::Relaxed) {
            return Err(GroupingError::Cancelled);
        }

        let comparisons = worklist.iter().enumerate().map(|(index, entry)| {
            let method = method_policy.select_method(index);
            let pivot = &pivot;
            async move { (index, score_pair(oracle, pivot, entry, method, cache, stats).await) }
        });
        let results = join_all(comparisons).await;

        let mut matched: Vec<usize> = results
            .into_iter()
            .filter(|(_, score)| *score >= threshold)
            .map(|(index, _)| index)
            .collect();
        matched.sort_unstable();

        // Pull matches out back-to-front so the remaining indexes stay
        // valid, then restore worklist order inside the cluster.
        let mut members = Vec::with_capacity(matched.len());
        for &index in matched.iter().rev() {
            members.push(worklist.remove(index));
        }
        members.reverse();

        let mut cluster = vec![pivot];
        cluster.extend(members);

        if cluster.len() > 1 {
            log::debug!(
                "formed cluster of {} around {}",
                cluster.len(),
                cluster[0].id
            );
            clusters.push(cluster);
        }
    }

    Ok(clusters)
}

/// Score one pair through the cache when one is supplied. Oracle failures
/// are absorbed as "not similar" and counted; only successful scores are
/// cached.
pub async fn score_pair(
    oracle: &dyn SimilarityOracle,
    a: &ThumbnailEntry,
    b: &ThumbnailEntry,
    method: CompareMethod,
    cache: Option<&ComparisonCache>,
    stats: &RunStats,
) -> f64 {
    if let Some(cache) = cache {
        if let Some(score) = cache.get(&a.id, &b.id) {
            stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return score;
        }
    }

    stats.oracle_calls.fetch_add(1, Ordering::Relaxed);
    match oracle.compare(a, b, method).await {
        Ok(score) => {
            if let Some(cache) = cache {
                cache.put(&a.id, &b.id, score);
            }
            score
        }
        Err(err) => {
            stats.failed_comparisons.fetch_add(1, Ordering::Relaxed);
            log::warn!("comparison {} vs {} failed, scoring 0: {}", a.id, b.id, err);
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::photo::PhotoId;
    use crate::services::oracle::OracleError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn entry(id: &str) -> ThumbnailEntry {
        ThumbnailEntry {
            id: PhotoId::new(id),
            original_uri: format!("/photos/{id}.jpg"),
            compressed_path: PathBuf::new(),
            payload: id.as_bytes().to_vec(),
        }
    }

    /// Oracle stub with scripted pair scores; unknown pairs score 0.
    struct ScriptedOracle {
        scores: HashMap<(String, String), f64>,
        calls: AtomicUsize,
        always_fail: bool,
    }

    impl ScriptedOracle {
        fn new(pairs: &[(&str, &str, f64)]) -> Self {
            let mut scores = HashMap::new();
            for &(a, b, score) in pairs {
                scores.insert(key(a, b), score);
            }
            Self {
                scores,
                calls: AtomicUsize::new(0),
                always_fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                scores: HashMap::new(),
                calls: AtomicUsize::new(0),
                always_fail: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    #[async_trait]
    impl SimilarityOracle for ScriptedOracle {
        async fn compare(
            &self,
            a: &ThumbnailEntry,
            b: &ThumbnailEntry,
            _method: CompareMethod,
        ) -> Result<f64, OracleError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.always_fail {
                return Err(OracleError::Unavailable("stubbed outage".to_string()));
            }
            Ok(self
                .scores
                .get(&key(a.id.as_str(), b.id.as_str()))
                .copied()
                .unwrap_or(0.0))
        }
    }

    fn ids(cluster: &[ThumbnailEntry]) -> Vec<&str> {
        let mut ids: Vec<&str> = cluster.iter().map(|e| e.id.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    #[tokio::test]
    async fn worked_example_partition() {
        // p1~p2=90, p1~p3=20, p2~p3=15, p4~p5=100, everything else 0.
        let oracle = ScriptedOracle::new(&[
            ("p1", "p2", 90.0),
            ("p1", "p3", 20.0),
            ("p2", "p3", 15.0),
            ("p4", "p5", 100.0),
        ]);
        let worklist = vec![entry("p1"), entry("p2"), entry("p3"), entry("p4"), entry("p5")];
        let stats = RunStats::new();

        let clusters = cluster_entries(
            &oracle,
            worklist,
            80.0,
            MethodPolicy::Fixed(CompareMethod::Pixel),
            None,
            &stats,
            &AtomicBool::new(false),
        )
        .await
        .unwrap();

        let mut grouped: Vec<Vec<&str>> = clusters.iter().map(|c| ids(c)).collect();
        grouped.sort();
        assert_eq!(grouped, vec![vec!["p1", "p2"], vec!["p4", "p5"]]);
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let oracle = ScriptedOracle::new(&[("a", "b", 80.0)]);
        let stats = RunStats::new();

        let clusters = cluster_entries(
            &oracle,
            vec![entry("a"), entry("b")],
            80.0,
            MethodPolicy::Fixed(CompareMethod::Pixel),
            None,
            &stats,
            &AtomicBool::new(false),
        )
        .await
        .unwrap();

        assert_eq!(clusters.len(), 1);
        assert_eq!(ids(&clusters[0]), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn no_singleton_clusters_emitted() {
        let oracle = ScriptedOracle::new(&[]);
        let stats = RunStats::new();

        let clusters = cluster_entries(
            &oracle,
            vec![entry("a"), entry("b"), entry("c")],
            50.0,
            MethodPolicy::Fixed(CompareMethod::Pixel),
            None,
            &stats,
            &AtomicBool::new(false),
        )
        .await
        .unwrap();

        assert!(clusters.is_empty());
    }

    #[tokio::test]
    async fn oracle_failure_scores_zero_and_is_counted() {
        let oracle = ScriptedOracle::failing();
        let stats = RunStats::new();

        let clusters = cluster_entries(
            &oracle,
            vec![entry("a"), entry("b")],
            10.0,
            MethodPolicy::Fixed(CompareMethod::Pixel),
            None,
            &stats,
            &AtomicBool::new(false),
        )
        .await
        .unwrap();

        assert!(clusters.is_empty());
        assert_eq!(stats.failed_comparisons.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn cached_scores_skip_the_oracle() {
        let oracle = ScriptedOracle::new(&[("a", "b", 95.0)]);
        let cache = ComparisonCache::new();
        let stats = RunStats::new();

        let clusters = cluster_entries(
            &oracle,
            vec![entry("a"), entry("b")],
            90.0,
            MethodPolicy::Fixed(CompareMethod::Pixel),
            Some(&cache),
            &stats,
            &AtomicBool::new(false),
        )
        .await
        .unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(oracle.calls(), 1);
        assert_eq!(cache.get(&PhotoId::new("a"), &PhotoId::new("b")), Some(95.0));

        // Same pair again: served from cache, no oracle traffic.
        let stats = RunStats::new();
        let clusters = cluster_entries(
            &oracle,
            vec![entry("a"), entry("b")],
            90.0,
            MethodPolicy::Fixed(CompareMethod::Pixel),
            Some(&cache),
            &stats,
            &AtomicBool::new(false),
        )
        .await
        .unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(oracle.calls(), 1);
        assert_eq!(stats.cache_hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let oracle = ScriptedOracle::failing();
        let cache = ComparisonCache::new();
        let stats = RunStats::new();

        let _ = cluster_entries(
            &oracle,
            vec![entry("a"), entry("b")],
            10.0,
            MethodPolicy::Fixed(CompareMethod::Pixel),
            Some(&cache),
            &stats,
            &AtomicBool::new(false),
        )
        .await
        .unwrap();

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn cancellation_aborts_between_pivots() {
        let oracle = ScriptedOracle::new(&[]);
        let stats = RunStats::new();
        let cancelled = AtomicBool::new(true);

        let result = cluster_entries(
            &oracle,
            vec![entry("a"), entry("b")],
            50.0,
            MethodPolicy::Fixed(CompareMethod::Pixel),
            None,
            &stats,
            &cancelled,
        )
        .await;

        assert!(matches!(result, Err(GroupingError::Cancelled)));
        assert_eq!(oracle.calls(), 0);
    }
}
