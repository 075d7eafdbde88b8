pub mod cluster;
pub mod photo;
pub mod policy;
pub mod refine;
pub mod thumbnail;

pub use photo::{FinalPartition, Photo, PhotoGroup, PhotoId, PhotoRef, RunReport, SkippedPhoto};
pub use policy::{GroupingStrategy, MethodPolicy, RefinementPolicy, Resolution};
pub use thumbnail::{PreprocessError, ThumbnailService};
