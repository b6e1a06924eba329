//! keygen - generate a cryptographic key file
//!
//! The key is only kept if it survives an encrypt/decrypt self-test.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use sealedconf::cli::{self, KeygenExit, Verbosity};
use sealedconf::error::Result;
use sealedconf::key;

#[derive(Parser, Debug)]
#[command(name = "keygen")]
#[command(version)]
#[command(about = "Generate a cryptographic key file for encrypting files and strings.", long_about = None)]
#[command(after_help = "\
Exit codes:
  0  success
  1  bad or missing arguments
  2  generated key failed validation (nothing was written)
  4  unable to write the key file")]
struct KeygenConfig {
    /// Report progress on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Report debugging detail on stderr (implies --verbose)
    #[arg(short, long)]
    debug: bool,

    /// Where to write the key
    #[arg(value_name = "KEY_FILE", default_value = "a.key")]
    key_file: PathBuf,
}

fn main() -> ExitCode {
    let config = match KeygenConfig::try_parse() {
        Ok(config) => config,
        Err(err) => return cli::usage_error(err),
    };
    cli::init_logging(Verbosity::from_flags(config.verbose, config.debug));

    match run(&config) {
        Ok(()) => KeygenExit::Success.into(),
        Err(err) => {
            eprintln!("Error: {}", cli::render_error(&err));
            KeygenExit::for_error(&err).into()
        }
    }
}

fn run(config: &KeygenConfig) -> Result<()> {
    info!(path = %config.key_file.display(), "generating key file");
    key::create_key_file(&config.key_file)?;
    info!(path = %config.key_file.display(), "verified key file");
    Ok(())
}
