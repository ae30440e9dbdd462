//! Store-boundary error type.
//!
//! SDK errors are flattened to their display form at the boundary;
//! callers only ever log them and abandon the current cycle, so the
//! original error chain buys nothing here.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("blob upload failed: {0}")]
    Blob(String),

    #[error("metadata write failed: {0}")]
    Metadata(String),

    #[error("metadata query failed: {0}")]
    Query(String),
}
