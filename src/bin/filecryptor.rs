//! filecryptor - encrypt or decrypt a whole file with a key file
//!
//! Encrypted output is written next to the source as `<SOURCE_FILE>.enc`.
//! Decrypted output goes to stdout so the caller picks the destination.

use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

use sealedconf::cli::{self, CryptorExit, Verbosity};
use sealedconf::error::Result;
use sealedconf::file_ops;

#[derive(Parser, Debug)]
#[command(name = "filecryptor")]
#[command(version)]
#[command(about = "Encrypt or decrypt a file using a cryptographic key file.", long_about = None)]
#[command(after_help = "\
Exit codes:
  0  success
  1  bad or missing arguments
  4  key file not found
  5  unreadable or invalid key file
  6  source file not found
  7  source file unreadable
  8  unable to write output
  9  decryption failed (wrong key, tampered or expired data)")]
struct CryptorConfig {
    /// Report progress on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Report debugging detail on stderr (implies --verbose)
    #[arg(short, long)]
    debug: bool,

    /// Encrypt SOURCE_FILE into SOURCE_FILE.enc; the default is to decrypt to stdout
    #[arg(short, long)]
    encrypt: bool,

    /// When decrypting, reject data encrypted more than this many seconds ago
    #[arg(long, value_name = "SECONDS", conflicts_with = "encrypt")]
    ttl: Option<u64>,

    /// File holding the cryptographic key
    #[arg(value_name = "KEY_FILE")]
    key_file: PathBuf,

    /// File to encrypt or decrypt
    #[arg(value_name = "SOURCE_FILE")]
    source_file: PathBuf,
}

fn main() -> ExitCode {
    let config = match CryptorConfig::try_parse() {
        Ok(config) => config,
        Err(err) => return cli::usage_error(err),
    };
    cli::init_logging(Verbosity::from_flags(config.verbose, config.debug));

    match run(&config) {
        Ok(()) => CryptorExit::Success.into(),
        Err(err) => {
            eprintln!("Error: {}", cli::render_error(&err));
            CryptorExit::for_error(&err).into()
        }
    }
}

fn run(config: &CryptorConfig) -> Result<()> {
    if config.encrypt {
        let destination = file_ops::encrypt_file(&config.source_file, &config.key_file)?;
        info!(destination = %destination.display(), "wrote encrypted file");
    } else {
        let ttl = config.ttl.map(Duration::from_secs);
        let mut stdout = io::stdout().lock();
        file_ops::decrypt_file(&config.source_file, &config.key_file, ttl, &mut stdout)?;
        info!(source = %config.source_file.display(), "decrypted to stdout");
    }
    Ok(())
}
