//! GreyNoise MMDB to Cribl.Cloud CLI.

use anyhow::Result;
use clap::Parser;
use greynoise_mmdb_cribl::config::{self, Config};
use greynoise_mmdb_cribl::logging;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "greynoise-mmdb-cribl")]
#[command(about = "Download the GreyNoise Psychic MMDB and publish it as a Cribl.Cloud lookup")]
#[command(version)]
struct Args {
    /// Load environment variables from this file instead of ./.env
    #[arg(short, long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(ExitCode::SUCCESS);
    }

    config::hydrate_env_file(args.env_file.as_deref())?;

    // Initialize logging
    logging::init(&args.log_level, &config::log_file_from_env());

    // Handle --validate
    if args.validate {
        return Ok(match Config::from_env() {
            Ok(_) => {
                info!("Configuration is valid");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "Configuration is invalid");
                ExitCode::from(greynoise_mmdb_cribl::Error::from(e).exit_code())
            }
        });
    }

    match greynoise_mmdb_cribl::run(std::env::vars()).await {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(e) => Ok(ExitCode::from(e.exit_code())),
    }
}
