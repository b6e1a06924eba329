//! Command-line plumbing shared by `filecryptor` and `keygen`
//!
//! Logging setup, exit status mapping and error rendering. Argument
//! definitions live with each binary.

use std::error::Error as StdError;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::error::{CodecError, ErrorKind};

/// Exit status for bad or missing command line arguments, shared by both tools
pub const USAGE_EXIT: u8 = 1;

/// How chatty the tools are on stderr when `RUST_LOG` is not set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Verbose,
    Debug,
}

impl Verbosity {
    /// `--debug` implies `--verbose`.
    pub fn from_flags(verbose: bool, debug: bool) -> Self {
        if debug {
            Verbosity::Debug
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Quiet
        }
    }

    fn directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Debug => "debug",
        }
    }
}

/// Install the stderr log subscriber. `RUST_LOG` takes precedence over the flags.
///
/// Logs never go to stdout, which carries decrypted output. Call once per
/// process; a second call panics.
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Exit statuses of `filecryptor`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CryptorExit {
    Success = 0,
    /// Bad arguments, or a failure with no more specific status
    Usage = USAGE_EXIT,
    KeyNotFound = 4,
    KeyInvalid = 5,
    SourceNotFound = 6,
    SourceUnreadable = 7,
    WriteFailed = 8,
    DecryptFailed = 9,
}

impl CryptorExit {
    pub fn for_error(err: &CodecError) -> Self {
        match err.kind {
            Some(ErrorKind::KeyNotFound) => CryptorExit::KeyNotFound,
            Some(ErrorKind::KeyInvalid) => CryptorExit::KeyInvalid,
            Some(ErrorKind::NotFound) => CryptorExit::SourceNotFound,
            Some(ErrorKind::InputUnreadable) => CryptorExit::SourceUnreadable,
            Some(ErrorKind::OutputUnwritable) => CryptorExit::WriteFailed,
            Some(ErrorKind::AuthenticationFailed) | Some(ErrorKind::TokenExpired) => {
                CryptorExit::DecryptFailed
            }
            _ => CryptorExit::Usage,
        }
    }
}

impl From<CryptorExit> for ExitCode {
    fn from(code: CryptorExit) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Exit statuses of `keygen`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeygenExit {
    Success = 0,
    Usage = USAGE_EXIT,
    /// The generated key failed validation and was removed
    SelfTestFailed = 2,
    WriteFailed = 4,
}

impl KeygenExit {
    pub fn for_error(err: &CodecError) -> Self {
        match err.kind {
            Some(ErrorKind::SelfTestFailed) => KeygenExit::SelfTestFailed,
            _ => KeygenExit::WriteFailed,
        }
    }
}

impl From<KeygenExit> for ExitCode {
    fn from(code: KeygenExit) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Report an argument parsing failure. Help and version requests are not
/// failures and exit with status 0.
pub fn usage_error(err: clap::Error) -> ExitCode {
    let _ = err.print();
    if err.use_stderr() {
        ExitCode::from(USAGE_EXIT)
    } else {
        ExitCode::SUCCESS
    }
}

/// Render an error with its chain of causes, outermost first.
pub fn render_error(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use std::io;

    fn err(kind: ErrorKind) -> CodecError {
        CodecError::with_kind(ErrorCategory::User, kind, "boom")
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Debug);
    }

    #[test]
    fn test_cryptor_exit_codes() {
        let cases = [
            (ErrorKind::KeyNotFound, 4),
            (ErrorKind::KeyInvalid, 5),
            (ErrorKind::NotFound, 6),
            (ErrorKind::InputUnreadable, 7),
            (ErrorKind::OutputUnwritable, 8),
            (ErrorKind::AuthenticationFailed, 9),
            (ErrorKind::TokenExpired, 9),
        ];
        for (kind, code) in cases {
            assert_eq!(CryptorExit::for_error(&err(kind)) as u8, code, "{:?}", kind);
        }
        assert_eq!(CryptorExit::Success as u8, 0);
        let kindless = CodecError::new(ErrorCategory::Internal, "boom");
        assert_eq!(CryptorExit::for_error(&kindless), CryptorExit::Usage);
    }

    #[test]
    fn test_keygen_exit_codes() {
        assert_eq!(KeygenExit::for_error(&err(ErrorKind::SelfTestFailed)) as u8, 2);
        assert_eq!(KeygenExit::for_error(&err(ErrorKind::OutputUnwritable)) as u8, 4);
        assert_eq!(KeygenExit::Usage as u8, 1);
        assert_eq!(KeygenExit::Success as u8, 0);
    }

    #[test]
    fn test_render_error_chain() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err = CodecError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::KeyNotFound,
            "failed to read key file a.key",
            io_err,
        )
        .with_context("failed to decrypt");

        assert_eq!(
            render_error(&err),
            "failed to decrypt: failed to read key file a.key: no such file"
        );
    }
}
