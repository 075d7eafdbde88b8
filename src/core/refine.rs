use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::cluster::{cluster_entries, score_pair, RunStats};
use crate::core::photo::{Photo, PhotoId, SkippedPhoto, ThumbnailEntry};
use crate::core::policy::{MethodPolicy, RefinementPolicy, Resolution};
use crate::core::thumbnail::ThumbnailService;
use crate::engine::GroupingError;
use crate::services::oracle::{CompareMethod, SimilarityOracle};

/// Method for the coarse pass and for representative-merge comparisons.
const BASE_METHOD: CompareMethod = CompareMethod::ColorHistogram;

pub struct RefinementOutcome {
    pub clusters: Vec<Vec<ThumbnailEntry>>,
    pub skipped: Vec<SkippedPhoto>,
}

/// Re-clusters oversized clusters at escalating resolution.
///
/// A flat pass at one resolution under- or over-merges; this controller
/// starts coarse, then regenerates thumbnails at ever finer resolution for
/// any cluster above the size cap until every cluster fits or the
/// resolution ceiling is reached. Clusters still oversized at the ceiling
/// are flushed to the final set unchanged.
pub struct RefinementController<'a> {
    oracle: &'a dyn SimilarityOracle,
    thumbnails: &'a ThumbnailService,
    policy: RefinementPolicy,
    stats: &'a RunStats,
    cancelled: &'a AtomicBool,
}

impl<'a> RefinementController<'a> {
    pub fn new(
        oracle: &'a dyn SimilarityOracle,
        thumbnails: &'a ThumbnailService,
        policy: RefinementPolicy,
        stats: &'a RunStats,
        cancelled: &'a AtomicBool,
    ) -> Self {
        Self {
            oracle,
            thumbnails,
            policy,
            stats,
            cancelled,
        }
    }

    pub async fn run(
        &self,
        photos: &[Photo],
        threshold: f64,
    ) -> Result<RefinementOutcome, GroupingError> {
        let mut resolution = self.policy.initial_resolution;
        let mut step = self.policy.resolution_step;

        // Initial coarse pass.
        let mut batch = self
            .thumbnails
            .preprocess_batch(photos, Resolution::square(resolution))
            .await?;
        let mut skipped = std::mem::take(&mut batch.skipped);
        let entries = std::mem::take(&mut batch.entries);
        let coarse = cluster_entries(
            self.oracle,
            entries,
            threshold,
            MethodPolicy::Fixed(BASE_METHOD),
            None,
            self.stats,
            self.cancelled,
        )
        .await?;
        drop(batch);

        let mut finals: Vec<Vec<ThumbnailEntry>> = Vec::new();
        let mut queue: Vec<Vec<ThumbnailEntry>> = Vec::new();
        for cluster in coarse {
            if cluster.len() > self.policy.size_cap {
                queue.push(cluster);
            } else {
                finals.push(cluster);
            }
        }
        log::info!(
            "coarse pass at {}: {} cluster(s) finalized, {} queued",
            Resolution::square(resolution),
            finals.len(),
            queue.len()
        );

        while !queue.is_empty() && resolution < self.policy.resolution_ceiling {
            if self.cancelled.load(Ordering::Relaxed) {
                return Err(GroupingError::Cancelled);
            }

            resolution += step;
            let round_resolution = Resolution::square(resolution);

            // One representative per already-finalized cluster, regenerated
            // once at the round resolution. A representative that fails
            // preprocessing only disables its cluster as a merge target for
            // this round.
            let rep_photos: Vec<Photo> = finals
                .iter()
                .map(|cluster| photo_of(&cluster[0]))
                .collect();
            let mut rep_batch = self
                .thumbnails
                .preprocess_batch(&rep_photos, round_resolution)
                .await?;
            let representatives: HashMap<PhotoId, ThumbnailEntry> = rep_batch
                .entries
                .drain(..)
                .map(|entry| (entry.id.clone(), entry))
                .collect();

            let mut finalized_this_round = 0usize;
            let mut next_queue: Vec<Vec<ThumbnailEntry>> = Vec::new();
            let mut round_batches = vec![rep_batch];

            for cluster in queue.drain(..) {
                let member_photos: Vec<Photo> = cluster.iter().map(photo_of).collect();
                let mut member_batch = self
                    .thumbnails
                    .preprocess_batch(&member_photos, round_resolution)
                    .await?;
                skipped.append(&mut member_batch.skipped);
                let members = std::mem::take(&mut member_batch.entries);
                round_batches.push(member_batch);

                // High-confidence match against a finalized cluster wins
                // over re-clustering.
                let mut unmatched = Vec::new();
                'members: for member in members {
                    for final_cluster in finals.iter_mut() {
                        let Some(rep) = representatives.get(&final_cluster[0].id) else {
                            continue;
                        };
                        let score = score_pair(
                            self.oracle,
                            &member,
                            rep,
                            BASE_METHOD,
                            None,
                            self.stats,
                        )
                        .await;
                        if score >= self.policy.merge_threshold {
                            log::debug!(
                                "merged {} into finalized cluster around {}",
                                member.id,
                                rep.id
                            );
                            final_cluster.push(member);
                            continue 'members;
                        }
                    }
                    unmatched.push(member);
                }

                let sub_clusters = cluster_entries(
                    self.oracle,
                    unmatched,
                    threshold,
                    MethodPolicy::Alternating,
                    None,
                    self.stats,
                    self.cancelled,
                )
                .await?;
                for sub in sub_clusters {
                    if sub.len() > self.policy.size_cap {
                        next_queue.push(sub);
                    } else {
                        finals.push(sub);
                        finalized_this_round += 1;
                    }
                }
            }

            queue = next_queue;
            log::debug!(
                "round at {}: {} finalized, {} requeued",
                round_resolution,
                finalized_this_round,
                queue.len()
            );

            // A stalled round must not repeat itself verbatim; a bigger
            // step guarantees the ceiling is reached.
            if finalized_this_round == 0 && !queue.is_empty() {
                step *= 2;
            }
        }

        if !queue.is_empty() {
            log::info!(
                "resolution ceiling reached, flushing {} oversized cluster(s)",
                queue.len()
            );
            finals.append(&mut queue);
        }

        Ok(RefinementOutcome {
            clusters: finals,
            skipped,
        })
    }
}

fn photo_of(entry: &ThumbnailEntry) -> Photo {
    Photo {
        id: entry.id.clone(),
        uri: entry.original_uri.clone(),
    }
}
