//! Ingestion: statically typed commit rows validated once at the pipeline boundary.

/// Commit record schema and row parsing.
pub mod record;
/// Commit table with identifier uniqueness.
pub mod table;

pub use record::{parse_timestamp, CommitRecord};
pub use table::CommitTable;
