use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::photo::PhotoId;

/// Canonical unordered key for a photo pair: `PairKey::new(a, b)` and
/// `PairKey::new(b, a)` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey(PhotoId, PhotoId);

impl PairKey {
    pub fn new(a: &PhotoId, b: &PhotoId) -> Self {
        if a <= b {
            Self(a.clone(), b.clone())
        } else {
            Self(b.clone(), a.clone())
        }
    }
}

/// Memoized oracle scores keyed by unordered photo-id pair.
///
/// The cache is owned by the grouping service and persists across runs when
/// the caller opts in via `cache_reuse`. Keys are deliberately not qualified
/// by method or resolution: reusing the cache across a method or resolution
/// change serves the prior scores verbatim, a caller-controlled trade-off
/// between speed and correctness.
///
/// Reads may happen concurrently from comparison tasks; writes are
/// serialized by the lock, last-writer-wins.
#[derive(Debug, Default)]
pub struct ComparisonCache {
    scores: Mutex<HashMap<PairKey, f64>>,
}

impl ComparisonCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, a: &PhotoId, b: &PhotoId) -> Option<f64> {
        let scores = self.scores.lock().unwrap_or_else(|e| e.into_inner());
        scores.get(&PairKey::new(a, b)).copied()
    }

    pub fn put(&self, a: &PhotoId, b: &PhotoId, score: f64) {
        let mut scores = self.scores.lock().unwrap_or_else(|e| e.into_inner());
        scores.insert(PairKey::new(a, b), score);
    }

    pub fn clear(&self) {
        let mut scores = self.scores.lock().unwrap_or_else(|e| e.into_inner());
        scores.clear();
    }

    pub fn len(&self) -> usize {
        let scores = self.scores.lock().unwrap_or_else(|e| e.into_inner());
        scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PhotoId {
        PhotoId::new(s)
    }

    #[test]
    fn pair_key_is_symmetric() {
        assert_eq!(PairKey::new(&id("a"), &id("b")), PairKey::new(&id("b"), &id("a")));
        assert_ne!(PairKey::new(&id("a"), &id("b")), PairKey::new(&id("a"), &id("c")));
    }

    #[test]
    fn get_is_symmetric_in_arguments() {
        let cache = ComparisonCache::new();
        cache.put(&id("p1"), &id("p2"), 87.5);

        assert_eq!(cache.get(&id("p1"), &id("p2")), Some(87.5));
        assert_eq!(cache.get(&id("p2"), &id("p1")), Some(87.5));
        assert_eq!(cache.get(&id("p1"), &id("p3")), None);
    }

    #[test]
    fn put_overwrites_per_key() {
        let cache = ComparisonCache::new();
        cache.put(&id("p1"), &id("p2"), 10.0);
        cache.put(&id("p2"), &id("p1"), 20.0);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&id("p1"), &id("p2")), Some(20.0));
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = ComparisonCache::new();
        cache.put(&id("p1"), &id("p2"), 50.0);
        assert!(!cache.is_empty());

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&id("p1"), &id("p2")), None);
    }
}
