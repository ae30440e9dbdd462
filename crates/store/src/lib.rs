//! `sorter-store` -- blob and metadata persistence behind provider
//! traits.
//!
//! The pipeline and job controller only see [`BlobStore`] and
//! [`MetadataStore`]; production wires the S3/DynamoDB
//! implementations, tests and local runs use the in-memory ones.

pub mod aws;
pub mod blob;
pub mod error;
pub mod keys;
pub mod memory;
pub mod metadata;

pub use blob::{BlobStore, S3BlobStore};
pub use error::StoreError;
pub use memory::{InMemoryBlobStore, InMemoryMetadataStore};
pub use metadata::{DynamoMetadataStore, MetadataStore, MetadataTables};
