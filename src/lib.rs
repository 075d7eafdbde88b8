pub mod core;
pub mod engine;
pub mod services;

pub use crate::core::photo::{
    FinalPartition, Photo, PhotoGroup, PhotoId, PhotoRef, RunReport, SkippedPhoto,
};
pub use crate::core::policy::{GroupingStrategy, MethodPolicy, RefinementPolicy, Resolution};
pub use crate::core::thumbnail::{PreprocessError, ThumbnailService};
pub use crate::engine::{GroupingError, GroupingService};
pub use crate::services::cache::ComparisonCache;
pub use crate::services::local::LocalOracle;
pub use crate::services::oracle::{
    CompareMethod, HttpOracle, OracleConfig, OracleError, SimilarityOracle,
};
