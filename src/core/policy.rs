use serde::{Deserialize, Serialize};
use std::fmt;

use crate::services::oracle::CompareMethod;

/// Target thumbnail dimensions for one clustering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Coarse resolution for the quick single-pass strategies.
pub const QUICK_PASS_RESOLUTION: Resolution = Resolution::square(30);

/// Resolution for the cache-backed single-pass strategies.
pub const STANDARD_PASS_RESOLUTION: Resolution = Resolution::new(384, 512);

/// How the caller wants photos grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GroupingStrategy {
    /// Single flat pass, coarse thumbnails, pixel method, no cache.
    QuickPixel,
    /// Single flat pass, coarse thumbnails, histogram method, no cache.
    QuickColorHistogram,
    /// Single flat pass, standard thumbnails, pixel method, cache-backed.
    Pixel,
    /// Single flat pass, standard thumbnails, histogram method, cache-backed.
    ColorHistogram,
    /// Adaptive resolution escalation splitting oversized clusters.
    Recursive,
}

impl fmt::Display for GroupingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::QuickPixel => "quick_pixel",
            Self::QuickColorHistogram => "quick_color_histogram",
            Self::Pixel => "pixel",
            Self::ColorHistogram => "color_histogram",
            Self::Recursive => "recursive",
        };
        f.write_str(name)
    }
}

/// Which oracle method a clustering pass uses for each comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodPolicy {
    Fixed(CompareMethod),
    /// Alternate between the histogram method and the faster pixel method
    /// per comparison index, balancing cost and accuracy during refinement.
    Alternating,
}

impl MethodPolicy {
    pub fn select_method(&self, index: usize) -> CompareMethod {
        match self {
            Self::Fixed(method) => *method,
            Self::Alternating => {
                if index % 2 == 0 {
                    CompareMethod::ColorHistogram
                } else {
                    CompareMethod::Pixel
                }
            }
        }
    }
}

/// Tunables of the adaptive refinement controller. The defaults carry the
/// production constants; tests shrink the ceiling to keep rounds cheap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinementPolicy {
    /// Side length of the square thumbnails for the initial coarse pass.
    pub initial_resolution: u32,
    /// How much the resolution grows per refinement round. Doubled after a
    /// round that finalizes nothing, so escalation always reaches the
    /// ceiling.
    pub resolution_step: u32,
    /// Resolution at which refinement stops and the queue is flushed.
    pub resolution_ceiling: u32,
    /// Clusters larger than this are queued for another escalation round.
    pub size_cap: usize,
    /// Score at or above which a refined member is merged directly into an
    /// already-finalized cluster, regardless of the caller's threshold.
    pub merge_threshold: f64,
}

impl Default for RefinementPolicy {
    fn default() -> Self {
        Self {
            initial_resolution: 10,
            resolution_step: 5,
            resolution_ceiling: 70,
            size_cap: 7,
            merge_threshold: 70.0,
        }
    }
}
