use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

use crate::core::cluster::{cluster_entries, RunStats};
use crate::core::photo::{
    FinalPartition, Photo, PhotoGroup, PhotoRef, RunReport, SkippedPhoto, ThumbnailEntry,
};
use crate::core::policy::{
    GroupingStrategy, MethodPolicy, RefinementPolicy, Resolution, QUICK_PASS_RESOLUTION,
    STANDARD_PASS_RESOLUTION,
};
use crate::core::refine::RefinementController;
use crate::core::thumbnail::{PreprocessError, ThumbnailService};
use crate::services::cache::ComparisonCache;
use crate::services::oracle::{CompareMethod, SimilarityOracle};

#[derive(Debug, Error)]
pub enum GroupingError {
    #[error("grouping run cancelled")]
    Cancelled,

    #[error("preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
}

/// Entry point of the grouping engine.
///
/// Owns the comparison cache across runs; `cache_reuse` on
/// [`GroupingService::group_photos`] decides whether a run starts from the
/// previous run's scores or from an empty cache. Individual oracle failures
/// never abort a run; the partition is always returned together with a
/// diagnostics report.
pub struct GroupingService {
    oracle: Arc<dyn SimilarityOracle>,
    thumbnails: ThumbnailService,
    cache: ComparisonCache,
    policy: RefinementPolicy,
    cancelled: Arc<AtomicBool>,
}

impl GroupingService {
    pub fn new(oracle: Arc<dyn SimilarityOracle>) -> Self {
        Self::with_policy(oracle, RefinementPolicy::default())
    }

    pub fn with_policy(oracle: Arc<dyn SimilarityOracle>, policy: RefinementPolicy) -> Self {
        Self {
            oracle,
            thumbnails: ThumbnailService::new(),
            cache: ComparisonCache::new(),
            policy,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token for abandoning an in-flight run from another task. The whole
    /// pending fan-out is cancelled at the next join boundary; individual
    /// comparisons are never cancelled mid-flight.
    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn cached_comparisons(&self) -> usize {
        self.cache.len()
    }

    /// Partition `photos` into groups of visually similar images.
    ///
    /// Every returned group has at least two members. Photos whose source
    /// image cannot be preprocessed are excluded and listed in
    /// `report.skipped`.
    pub async fn group_photos(
        &self,
        photos: &[Photo],
        threshold: f64,
        strategy: GroupingStrategy,
        cache_reuse: bool,
    ) -> Result<FinalPartition, GroupingError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let threshold = threshold.clamp(0.0, 100.0);
        let stats = RunStats::new();

        log::info!(
            "run {run_id}: grouping {} photo(s), strategy {strategy}, threshold {threshold}",
            photos.len()
        );

        let (clusters, skipped) = match strategy {
            GroupingStrategy::QuickPixel => {
                self.flat_pass(
                    photos,
                    threshold,
                    CompareMethod::Pixel,
                    QUICK_PASS_RESOLUTION,
                    false,
                    &stats,
                )
                .await?
            }
            GroupingStrategy::QuickColorHistogram => {
                self.flat_pass(
                    photos,
                    threshold,
                    CompareMethod::ColorHistogram,
                    QUICK_PASS_RESOLUTION,
                    false,
                    &stats,
                )
                .await?
            }
            GroupingStrategy::Pixel | GroupingStrategy::ColorHistogram => {
                if !cache_reuse {
                    self.cache.clear();
                }
                let method = if strategy == GroupingStrategy::Pixel {
                    CompareMethod::Pixel
                } else {
                    CompareMethod::ColorHistogram
                };
                self.flat_pass(photos, threshold, method, STANDARD_PASS_RESOLUTION, true, &stats)
                    .await?
            }
            GroupingStrategy::Recursive => {
                let controller = RefinementController::new(
                    &*self.oracle,
                    &self.thumbnails,
                    self.policy,
                    &stats,
                    &self.cancelled,
                );
                let outcome = controller.run(photos, threshold).await?;
                (outcome.clusters, outcome.skipped)
            }
        };

        let groups: Vec<PhotoGroup> = clusters
            .iter()
            .map(|cluster| cluster.iter().map(PhotoRef::from).collect())
            .collect();

        let report = RunReport {
            run_id,
            strategy,
            threshold,
            oracle_calls: stats.oracle_calls.load(Ordering::Relaxed),
            cache_hits: stats.cache_hits.load(Ordering::Relaxed),
            failed_comparisons: stats.failed_comparisons.load(Ordering::Relaxed),
            skipped,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        if report.failed_comparisons > 0 {
            log::warn!(
                "run {run_id}: {} comparison(s) failed and were scored as not similar",
                report.failed_comparisons
            );
        }
        log::info!(
            "run {run_id}: {} group(s), {} oracle call(s), {} cache hit(s) in {}ms",
            groups.len(),
            report.oracle_calls,
            report.cache_hits,
            report.elapsed_ms
        );

        Ok(FinalPartition { groups, report })
    }

    async fn flat_pass(
        &self,
        photos: &[Photo],
        threshold: f64,
        method: CompareMethod,
        resolution: Resolution,
        cached: bool,
        stats: &RunStats,
    ) -> Result<(Vec<Vec<ThumbnailEntry>>, Vec<SkippedPhoto>), GroupingError> {
        let mut batch = self.thumbnails.preprocess_batch(photos, resolution).await?;
        let skipped = std::mem::take(&mut batch.skipped);
        let mut entries = std::mem::take(&mut batch.entries);

        // The cached pass is the one place the original pipeline sorted by
        // id, making its pivot order reproducible across runs.
        let cache = if cached {
            entries.sort_by(|a, b| a.id.cmp(&b.id));
            Some(&self.cache)
        } else {
            None
        };

        let clusters = cluster_entries(
            &*self.oracle,
            entries,
            threshold,
            MethodPolicy::Fixed(method),
            cache,
            stats,
            &self.cancelled,
        )
        .await?;
        drop(batch);

        Ok((clusters, skipped))
    }
}
