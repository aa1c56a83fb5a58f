//! blobseal-storage: blob stores and the sealing facade
//!
//! A [`BlobStore`] persists an opaque body plus a flat string header map.
//! [`SealedStore`] layers envelope encryption on top: bodies are base64
//! ciphertext, headers are the `blobseal-*` crypto metadata.

pub mod memory;
pub mod opendal_store;
pub mod operator;
pub mod sealed;
pub mod store;

pub use memory::MemoryBlobStore;
pub use opendal_store::OpendalBlobStore;
pub use operator::{build_operator, build_s3_operator, S3Credentials};
pub use sealed::SealedStore;
pub use store::{BlobNotFound, BlobStore, StoredBlob};
