//! Threat intelligence sources that produce MMDB files.

pub mod psychic;

use crate::error::Error;
use async_trait::async_trait;
use std::path::Path;

/// A source that writes a complete MMDB database to disk.
#[async_trait]
pub trait IntelligenceSource: Send + Sync {
    /// Write the current database to `destination`, returning the number of
    /// bytes written.
    ///
    /// Remote failures are `Error::DataFetch`; local write failures are
    /// `Error::Serialization`.
    async fn fetch(&self, destination: &Path) -> Result<u64, Error>;

    /// Source name for logging.
    fn name(&self) -> &str;
}
