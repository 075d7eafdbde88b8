pub mod cache;
pub mod local;
pub mod oracle;

pub use cache::ComparisonCache;
pub use local::LocalOracle;
pub use oracle::{CompareMethod, HttpOracle, OracleConfig, OracleError, SimilarityOracle};
