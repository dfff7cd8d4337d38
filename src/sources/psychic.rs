//! GreyNoise Psychic MMDB source.

use super::IntelligenceSource;
use crate::config::GreyNoiseConfig;
use crate::error::{Error, FetchError, SerializationError};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// User agent sent to both remote services.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

const MMDB_CONTENT_TYPES: [&str; 2] = ["application/octet-stream", "application/x-mmdb"];

/// Downloads the daily Psychic database.
pub struct PsychicSource {
    config: GreyNoiseConfig,
    client: Client,
}

impl PsychicSource {
    /// Create a new Psychic source.
    pub fn new(config: GreyNoiseConfig, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { config, client })
    }

    /// Download URL covering the day before `today` through `today`.
    pub fn download_url(&self, today: NaiveDate) -> String {
        let yesterday = today - ChronoDuration::days(1);
        format!(
            "{}/v1/psychic/generate/{}/{}/{}/mmdb",
            self.config.base_url,
            yesterday.format("%Y-%m-%d"),
            today.format("%Y-%m-%d"),
            self.config.version
        )
    }

    /// Download the database for `today` into `destination`.
    pub async fn fetch_for(&self, today: NaiveDate, destination: &Path) -> Result<u64, Error> {
        let url = self.download_url(today);
        info!(url = %url, destination = %destination.display(), "Downloading MMDB file");

        let mut response = self
            .client
            .get(&url)
            .header("key", self.config.api_key.expose())
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { url, status, body }.into());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_mmdb_content_type(&content_type) {
            warn!(content_type = %content_type, "Unexpected content type");
        }

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| SerializationError::io(destination, e))?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|source| FetchError::Http {
            url: url.clone(),
            source,
        })? {
            file.write_all(&chunk)
                .await
                .map_err(|e| SerializationError::io(destination, e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| SerializationError::io(destination, e))?;
        file.sync_all()
            .await
            .map_err(|e| SerializationError::io(destination, e))?;

        if written == 0 {
            return Err(FetchError::EmptyBody { url }.into());
        }

        debug!(bytes = written, "MMDB download complete");
        Ok(written)
    }
}

#[async_trait]
impl IntelligenceSource for PsychicSource {
    async fn fetch(&self, destination: &Path) -> Result<u64, Error> {
        self.fetch_for(Local::now().date_naive(), destination).await
    }

    fn name(&self) -> &str {
        "greynoise-psychic"
    }
}

fn is_mmdb_content_type(content_type: &str) -> bool {
    MMDB_CONTENT_TYPES
        .iter()
        .any(|expected| content_type.contains(expected))
}
