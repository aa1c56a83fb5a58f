pub mod config;
pub mod error;

pub use config::BlobsealConfig;
pub use error::{BlobsealError, BlobsealResult};
