//! The publication run: configure, generate, upload.

use crate::config::Config;
use crate::cribl::{CriblClient, UploadResult};
use crate::error::Error;
use crate::generator::MmdbGenerator;
use crate::mmdb::{self, MmdbSummary};
use crate::sources::psychic::PsychicSource;
use crate::sources::IntelligenceSource;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

/// Progress of a run. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Configured,
    Generated,
    Uploaded,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Configured => "configured",
            Stage::Generated => "generated",
            Stage::Uploaded => "uploaded",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stage: Stage,
    pub mmdb: MmdbSummary,
    pub lookup: UploadResult,
    pub csv_sample: Option<UploadResult>,
}

/// A single publication run.
pub struct Pipeline {
    config: Config,
    source: Box<dyn IntelligenceSource>,
    cribl: CriblClient,
    stage: Stage,
}

impl Pipeline {
    /// Build a pipeline against the GreyNoise Psychic source.
    pub fn new(config: Config) -> Result<Self, Error> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let source = PsychicSource::new(config.greynoise.clone(), timeout)?;
        Self::with_source(config, Box::new(source))
    }

    /// Build a pipeline against any intelligence source.
    pub fn with_source(config: Config, source: Box<dyn IntelligenceSource>) -> Result<Self, Error> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let cribl = CriblClient::new(config.cribl.clone(), timeout)?;
        Ok(Self {
            config,
            source,
            cribl,
            stage: Stage::Configured,
        })
    }

    /// Current stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn advance(&mut self, stage: Stage) {
        info!(from = %self.stage, to = %stage, "Stage reached");
        self.stage = stage;
    }

    /// Run every stage, logging the failure and moving to `Failed` on error.
    pub async fn execute(&mut self) -> Result<RunReport, Error> {
        match self.run_stages().await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(stage = %self.stage, error = %e, "Run failed");
                self.stage = Stage::Failed;
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<RunReport, Error> {
        let output = self.config.output.mmdb_path.clone();

        let summary = MmdbGenerator::new(&*self.source, &output)
            .generate()
            .await?;
        self.advance(Stage::Generated);

        let token = self.cribl.authenticate().await?;
        info!("Cribl token generated");

        let lookup = self.cribl.publish(&token, &summary.path).await?;
        self.advance(Stage::Uploaded);

        let csv_sample = if self.config.output.create_csv {
            let (csv_path, rows) =
                mmdb::export_csv_sample(&summary.path, self.config.output.csv_max_rows)?;
            info!(rows, csv = %csv_path.display(), "CSV sample written");
            Some(self.cribl.publish(&token, &csv_path).await?)
        } else {
            None
        };

        if self.config.output.cleanup {
            remove_artifact(&summary.path);
            if self.config.output.create_csv {
                remove_artifact(&mmdb::csv_sample_path(&summary.path));
            }
        }

        self.advance(Stage::Done);
        info!(
            lookup = %lookup.lookup_id,
            group = %self.cribl.worker_group(),
            entries = summary.entries,
            "Run completed"
        );

        Ok(RunReport {
            stage: self.stage,
            mmdb: summary,
            lookup,
            csv_sample,
        })
    }
}

/// Load configuration from `vars` and execute a run.
///
/// Configuration is validated before any network or file activity.
pub async fn run<I, K, V>(vars: I) -> Result<RunReport, Error>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    info!(stage = %Stage::Init, "Starting GreyNoise MMDB publication to Cribl.Cloud");

    let config = Config::from_vars(vars).map_err(|e| {
        error!(stage = %Stage::Init, error = %e, "Run failed");
        Error::from(e)
    })?;
    info!(
        output = %config.output.mmdb_path.display(),
        group = %config.cribl.worker_group,
        "Configuration loaded"
    );

    let mut pipeline = Pipeline::new(config).map_err(|e| {
        error!(stage = %Stage::Configured, error = %e, "Run failed");
        e
    })?;
    pipeline.execute().await
}

fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "Removed local file"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove local file"),
    }
}
