//! Configuration loaded from environment variables.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const GREYNOISE_API_KEY: &str = "GREYNOISE_API_KEY";
pub const CRIBL_CLIENT_ID: &str = "CRIBL_CLIENT_ID";
pub const CRIBL_CLIENT_SECRET: &str = "CRIBL_CLIENT_SECRET";
pub const CRIBL_ORGANIZATION_ID: &str = "CRIBL_ORGANIZATION_ID";
pub const CRIBL_WORKER_GROUP: &str = "CRIBL_WORKER_GROUP";

pub const MMDB_OUTPUT_PATH: &str = "MMDB_OUTPUT_PATH";
pub const LOG_FILE: &str = "LOG_FILE";
pub const PSYCHIC_VERSION: &str = "PSYCHIC_VERSION";
pub const GREYNOISE_PSYCHIC_URL: &str = "GREYNOISE_PSYCHIC_URL";
pub const CRIBL_LOGIN_URL: &str = "CRIBL_LOGIN_URL";
pub const CRIBL_API_URL: &str = "CRIBL_API_URL";
pub const CRIBL_WORKSPACE: &str = "CRIBL_WORKSPACE";
pub const CRIBL_AUDIENCE: &str = "CRIBL_AUDIENCE";
pub const HTTP_TIMEOUT_SECONDS: &str = "HTTP_TIMEOUT_SECONDS";
pub const CREATE_CSV: &str = "CREATE_CSV";
pub const CSV_MAX_ROWS: &str = "CSV_MAX_ROWS";
pub const CLEANUP_FILES: &str = "CLEANUP_FILES";

/// Keys that must be present and non-empty.
pub const REQUIRED_KEYS: [&str; 5] = [
    GREYNOISE_API_KEY,
    CRIBL_CLIENT_ID,
    CRIBL_CLIENT_SECRET,
    CRIBL_ORGANIZATION_ID,
    CRIBL_WORKER_GROUP,
];

const DEFAULT_OUTPUT_PATH: &str = "ti_greynoise_indicators-simple.mmdb";
const DEFAULT_LOG_FILE: &str = "greynoise-mmdb-to-cribl-cloud.log";
const DEFAULT_PSYCHIC_VERSION: &str = "3";
const DEFAULT_PSYCHIC_URL: &str = "https://psychic.labs.greynoise.io";
const DEFAULT_LOGIN_URL: &str = "https://login.cribl.cloud";
const DEFAULT_API_URL: &str = "https://app.cribl.cloud";
const DEFAULT_WORKSPACE: &str = "main";
const DEFAULT_AUDIENCE: &str = "https://api.cribl.cloud";
const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
const DEFAULT_CSV_MAX_ROWS: usize = 100;

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },

    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("invalid value in `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}

/// A credential that is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Root configuration of a run.
#[derive(Debug, Clone)]
pub struct Config {
    /// GreyNoise Psychic settings.
    pub greynoise: GreyNoiseConfig,

    /// Cribl.Cloud destination settings.
    pub cribl: CriblConfig,

    /// Local artifacts.
    pub output: OutputConfig,

    /// Append-only run log.
    pub log_file: PathBuf,

    /// Total timeout for each HTTP request.
    pub timeout_seconds: u64,
}

/// GreyNoise Psychic API configuration.
#[derive(Debug, Clone)]
pub struct GreyNoiseConfig {
    /// API key, sent in the `key` header.
    pub api_key: Secret,

    /// Base URL of the Psychic service.
    pub base_url: String,

    /// Psychic database version segment of the download path.
    pub version: String,
}

/// Cribl.Cloud destination configuration.
#[derive(Debug, Clone)]
pub struct CriblConfig {
    pub client_id: String,
    pub client_secret: Secret,
    pub organization_id: String,
    pub worker_group: String,

    /// Workspace segment of the API path.
    pub workspace: String,

    /// OAuth token endpoint host.
    pub login_url: String,

    /// API host.
    pub api_url: String,

    /// OAuth audience claim.
    pub audience: String,
}

/// Local output configuration.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Where the MMDB is written. Its file name is the Cribl lookup id.
    pub mmdb_path: PathBuf,

    /// Also publish a CSV sample of the database.
    pub create_csv: bool,

    /// Row limit for the CSV sample, `None` for unlimited.
    pub csv_max_rows: Option<usize>,

    /// Remove local artifacts after a successful publication.
    pub cleanup: bool,
}

impl OutputConfig {
    /// Lookup id registered in Cribl.
    pub fn lookup_id(&self) -> String {
        lookup_id(&self.mmdb_path)
    }
}

/// File name of a path as a lookup id.
pub fn lookup_id(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from explicit key/value pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let vars = Vars(&vars);

        // Check every required key before parsing anything else
        for key in REQUIRED_KEYS {
            vars.required(key)?;
        }

        let config = Config {
            greynoise: GreyNoiseConfig {
                api_key: Secret::new(vars.required(GREYNOISE_API_KEY)?),
                base_url: vars.url(GREYNOISE_PSYCHIC_URL, DEFAULT_PSYCHIC_URL)?,
                version: vars.or(PSYCHIC_VERSION, DEFAULT_PSYCHIC_VERSION),
            },
            cribl: CriblConfig {
                client_id: vars.required(CRIBL_CLIENT_ID)?,
                client_secret: Secret::new(vars.required(CRIBL_CLIENT_SECRET)?),
                organization_id: vars.required(CRIBL_ORGANIZATION_ID)?,
                worker_group: vars.required(CRIBL_WORKER_GROUP)?,
                workspace: vars.or(CRIBL_WORKSPACE, DEFAULT_WORKSPACE),
                login_url: vars.url(CRIBL_LOGIN_URL, DEFAULT_LOGIN_URL)?,
                api_url: vars.url(CRIBL_API_URL, DEFAULT_API_URL)?,
                audience: vars.or(CRIBL_AUDIENCE, DEFAULT_AUDIENCE),
            },
            output: OutputConfig {
                mmdb_path: PathBuf::from(vars.or(MMDB_OUTPUT_PATH, DEFAULT_OUTPUT_PATH)),
                create_csv: vars.flag(CREATE_CSV),
                csv_max_rows: vars.row_limit(CSV_MAX_ROWS, DEFAULT_CSV_MAX_ROWS)?,
                cleanup: vars.flag(CLEANUP_FILES),
            },
            log_file: PathBuf::from(vars.or(LOG_FILE, DEFAULT_LOG_FILE)),
            timeout_seconds: vars.number(HTTP_TIMEOUT_SECONDS, DEFAULT_TIMEOUT_SECONDS)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.lookup_id().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: MMDB_OUTPUT_PATH,
                reason: format!("`{}` has no file name", self.output.mmdb_path.display()),
            });
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: HTTP_TIMEOUT_SECONDS,
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Generate an example `.env` file.
    pub fn example() -> String {
        r#"# GreyNoise MMDB -> Cribl.Cloud configuration

# Required
GREYNOISE_API_KEY=your-greynoise-api-key
CRIBL_CLIENT_ID=your-cribl-client-id
CRIBL_CLIENT_SECRET=your-cribl-client-secret
CRIBL_ORGANIZATION_ID=your-organization-id
CRIBL_WORKER_GROUP=default

# Local files
MMDB_OUTPUT_PATH=ti_greynoise_indicators-simple.mmdb
LOG_FILE=greynoise-mmdb-to-cribl-cloud.log
CLEANUP_FILES=false            # remove local files after publishing

# Optional CSV sample lookup
CREATE_CSV=false
CSV_MAX_ROWS=100               # 0 = unlimited

# Endpoints (defaults shown)
PSYCHIC_VERSION=3
GREYNOISE_PSYCHIC_URL=https://psychic.labs.greynoise.io
CRIBL_LOGIN_URL=https://login.cribl.cloud
CRIBL_API_URL=https://app.cribl.cloud
CRIBL_WORKSPACE=main
CRIBL_AUDIENCE=https://api.cribl.cloud
HTTP_TIMEOUT_SECONDS=300
"#
        .to_string()
    }
}

/// Log file path, resolved before the full configuration is loaded so that
/// configuration errors reach the log file too.
pub fn log_file_from_env() -> PathBuf {
    std::env::var(LOG_FILE)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE))
}

/// Hydrate the process environment from a `.env` file.
///
/// An explicit path must exist. The default `.env` is optional.
pub fn hydrate_env_file(path: Option<&Path>) -> Result<(), ConfigError> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => match dotenvy::dotenv() {
            Ok(_) => {}
            Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(ConfigError::Dotenv { source: err }),
        },
    }
    Ok(())
}

struct Vars<'a>(&'a HashMap<String, String>);

impl Vars<'_> {
    fn get(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::MissingVar { key })
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key)
            .map(|value| matches!(value.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false)
    }

    fn number(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.get(key) {
            Some(value) => value
                .parse()
                .map_err(|source| ConfigError::InvalidNumber { key, source }),
            None => Ok(default),
        }
    }

    /// Row limit where `0` means unlimited.
    fn row_limit(&self, key: &'static str, default: usize) -> Result<Option<usize>, ConfigError> {
        match self.number(key, default as u64)? {
            0 => Ok(None),
            rows => usize::try_from(rows)
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    key,
                    reason: format!("{} exceeds the largest supported row count", rows),
                }),
        }
    }

    fn url(&self, key: &'static str, default: &str) -> Result<String, ConfigError> {
        let value = self.or(key, default);
        if !(value.starts_with("http://") || value.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key,
                reason: format!("`{}` is not an http(s) URL", value),
            });
        }
        Ok(value.trim_end_matches('/').to_string())
    }
}
