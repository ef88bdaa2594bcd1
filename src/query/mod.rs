//! Term-list query compilation: case-insensitive dedup, OR-query assembly, and length-bounded partitioning.

mod compiler;
mod terms;

use std::path::PathBuf;

pub use compiler::{DEFAULT_QUERY_LIMIT, Query, QueryCompiler, assert_unique, normalize};
pub use terms::{load_terms, split_term_file, subset_path};

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query exceeds max character length of {limit} with {length} characters")]
    QueryTooLong { length: usize, limit: usize },

    #[error("found {} duplicated term(s): {}", .0.len(), .0.join(", "))]
    DuplicateTerms(Vec<String>),

    #[error("failed to read term file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write subset file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
