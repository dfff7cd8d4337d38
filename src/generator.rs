//! MMDB generation: fetch from a source, place atomically, read back.

use crate::error::{Error, FetchError, SerializationError};
use crate::mmdb::{self, MmdbSummary};
use crate::sources::IntelligenceSource;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Produces the MMDB file at a fixed output path.
pub struct MmdbGenerator<'a> {
    source: &'a dyn IntelligenceSource,
    output: PathBuf,
}

impl<'a> MmdbGenerator<'a> {
    pub fn new(source: &'a dyn IntelligenceSource, output: impl Into<PathBuf>) -> Self {
        Self {
            source,
            output: output.into(),
        }
    }

    /// Staging file the download is written to before it replaces the output.
    pub fn staging_path(&self) -> PathBuf {
        partial_path(&self.output)
    }

    /// Fetch the database, replace the output file, and summarize it.
    ///
    /// The output is only replaced once the download completed and opened as
    /// a valid MMDB, so a failed run leaves the previous file untouched.
    pub async fn generate(&self) -> Result<MmdbSummary, Error> {
        let staging = self.staging_path();
        info!(source = self.source.name(), output = %self.output.display(), "Generating MMDB file");

        let written = match self.source.fetch(&staging).await {
            Ok(written) => written,
            Err(e) => {
                discard(&staging);
                return Err(e);
            }
        };
        info!(bytes = written, "MMDB file downloaded");

        if let Err(e) = mmdb::open(&staging) {
            discard(&staging);
            return Err(FetchError::InvalidDatabase {
                path: self.output.clone(),
                reason: e.to_string(),
            }
            .into());
        }

        std::fs::rename(&staging, &self.output).map_err(|e| {
            discard(&staging);
            SerializationError::io(&self.output, e)
        })?;

        let summary = mmdb::summarize(&self.output).map_err(|e| SerializationError::Database {
            path: self.output.clone(),
            reason: e.to_string(),
        })?;
        Ok(summary)
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    output.with_file_name(name)
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove staging file");
        }
    }
}
