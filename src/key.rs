//! Key material: loading, generating and provisioning key files
//!
//! A key is 32 random bytes. The first half signs tokens (HMAC-SHA256), the
//! second half encrypts them (AES-128). On disk a key is stored as
//! base64url with padding, i.e. 44 ASCII characters.

use base64::{Engine, engine::general_purpose::URL_SAFE};
use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::{CodecError, ErrorCategory, ErrorKind, Result};
use crate::token;

/// Length of a decoded key in bytes
pub const KEY_LEN: usize = 32;

/// Length of the signing half of a key
const SIGNING_KEY_LEN: usize = 16;

/// A symmetric key. Wiped from memory when dropped.
#[derive(Clone)]
pub struct Key {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl Key {
    /// Builds a key from raw bytes, which must be exactly `KEY_LEN` long.
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        if raw.len() != KEY_LEN {
            return Err(CodecError::with_kind(
                ErrorCategory::User,
                ErrorKind::KeyInvalid,
                format!("key must be {} bytes, got {}", KEY_LEN, raw.len()),
            ));
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        bytes.copy_from_slice(raw);
        Ok(Self { bytes })
    }

    /// Decodes the key file representation. Surrounding ASCII whitespace,
    /// such as a trailing newline added by an editor, is ignored.
    pub fn decode(encoded: &[u8]) -> Result<Self> {
        let raw = URL_SAFE.decode(encoded.trim_ascii()).map_err(|e| {
            CodecError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::KeyInvalid,
                "key is not valid base64url",
                e,
            )
        })?;
        let raw = Zeroizing::new(raw);
        Self::from_slice(&raw)
    }

    /// Encodes the key into its key file representation.
    pub fn encode(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE.encode(self.bytes.as_slice()))
    }

    pub(crate) fn signing_key(&self) -> &[u8] {
        &self.bytes[..SIGNING_KEY_LEN]
    }

    pub(crate) fn encryption_key(&self) -> &[u8] {
        &self.bytes[SIGNING_KEY_LEN..]
    }

    fn same_material(&self, other: &Key) -> bool {
        self.bytes[..] == other.bytes[..]
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key").field("bytes", &"[REDACTED]").finish()
    }
}

/// Generates a fresh key from the operating system's CSPRNG.
pub fn generate_key() -> Key {
    let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut bytes[..]);
    Key { bytes }
}

/// Loads a key from a key file.
///
/// Nothing is cached: every call reads the file again and the returned key
/// is wiped when the caller drops it.
pub fn load_key(path: &Path) -> Result<Key> {
    let contents = Zeroizing::new(fs::read(path).map_err(|e| key_read_error(path, e))?);
    Key::decode(&contents).map_err(|e| e.with_context(format!("invalid key file {}", path.display())))
}

/// Generates a key and stores it at `path`, keeping it only if it passes
/// the self-test.
///
/// The key is written to a temporary file next to `path`, read back from
/// disk and round-tripped through the cipher. Only then is the temporary
/// file renamed onto `path`. On any failure the temporary file is removed
/// and `path` is left untouched.
pub fn create_key_file(path: &Path) -> Result<()> {
    provision_key_file(path, &generate_key(), token::self_test)
}

fn provision_key_file(
    path: &Path,
    key: &Key,
    check: impl FnOnce(&Key) -> Result<()>,
) -> Result<()> {
    if path.exists() {
        warn!(path = %path.display(), "key file exists and will be overwritten");
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp_file = tempfile::Builder::new()
        .prefix(".keygen-")
        .tempfile_in(dir)
        .map_err(|e| write_error("failed to create temporary key file", e))?;

    debug!(path = %temp_file.path().display(), "writing key to temporary file");
    temp_file
        .write_all(key.encode().as_bytes())
        .map_err(|e| write_error("failed to write temporary key file", e))?;
    temp_file
        .flush()
        .map_err(|e| write_error("failed to flush temporary key file", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| write_error("failed to sync temporary key file", e))?;

    // Validate what actually landed on disk, not the copy in memory.
    let stored = load_key(temp_file.path()).map_err(|e| {
        CodecError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::SelfTestFailed,
            "stored key could not be read back",
            e,
        )
    })?;
    if !stored.same_material(key) {
        return Err(CodecError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::SelfTestFailed,
            "stored key differs from the generated key",
        ));
    }
    check(&stored)?;
    debug!("key passed self-test");

    temp_file.persist(path).map_err(|e| {
        write_error(
            format!("failed to move key file into place at {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

fn key_read_error(path: &Path, err: io::Error) -> CodecError {
    let kind = if err.kind() == io::ErrorKind::NotFound {
        ErrorKind::KeyNotFound
    } else {
        ErrorKind::KeyInvalid
    };
    CodecError::with_kind_and_source(
        ErrorCategory::User,
        kind,
        format!("failed to read key file {}", path.display()),
        err,
    )
}

fn write_error(
    msg: impl Into<String>,
    err: impl std::error::Error + Send + Sync + 'static,
) -> CodecError {
    CodecError::with_kind_and_source(
        ErrorCategory::Internal,
        ErrorKind::OutputUnwritable,
        msg,
        err,
    )
}
