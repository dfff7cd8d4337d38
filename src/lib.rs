//! GreyNoise MMDB publisher for Cribl.Cloud.
//!
//! Downloads the daily GreyNoise Psychic MMDB database and publishes it as a
//! lookup file to a Cribl.Cloud worker group.
//!
//! # Features
//!
//! - **Psychic Download** - Stream the MMDB to disk and replace the previous file atomically
//! - **Validation** - Open the database with `maxminddb` and count its networks
//! - **Cribl Publication** - Upload, create or update the lookup, commit, and deploy
//! - **CSV Sample** - Optionally publish a human-readable CSV excerpt alongside
//! - **Run Log** - Console output plus an append-only log file
//!
//! # Example Configuration
//!
//! ```text
//! GREYNOISE_API_KEY=your-greynoise-api-key
//! CRIBL_CLIENT_ID=your-cribl-client-id
//! CRIBL_CLIENT_SECRET=your-cribl-client-secret
//! CRIBL_ORGANIZATION_ID=your-organization-id
//! CRIBL_WORKER_GROUP=default
//! CREATE_CSV=true
//! ```

pub mod config;
pub mod cribl;
pub mod error;
pub mod generator;
pub mod logging;
pub mod mmdb;
pub mod pipeline;
pub mod sources;

pub use config::Config;
pub use error::Error;
pub use pipeline::{run, Pipeline, RunReport, Stage};
