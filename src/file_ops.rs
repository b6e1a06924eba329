//! File encryption/decryption operations
//!
//! This module holds the storage path shared by the table and JSON codecs
//! (plaintext in, optional encryption, bytes out) and the whole-file
//! operations behind `filecryptor`.

use crate::error::{CodecError, ErrorCategory, ErrorKind, Result};
use crate::key::load_key;
use crate::token;
use std::borrow::Cow;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Suffix appended to the source path by `encrypt_file`
pub const ENCRYPTED_EXTENSION: &str = "enc";

/// Encrypt a file with a key file
///
/// Reads plaintext from `source`, encrypts it with the key stored at
/// `key_path`, and writes the token to `<source>.enc`, which is returned.
///
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
pub fn encrypt_file(source: &Path, key_path: &Path) -> Result<PathBuf> {
    let plaintext = read_input(source)?;
    let key = load_key(key_path)?;
    let token =
        token::encrypt(&key, &plaintext).map_err(|e| e.with_context("encryption failed"))?;

    let destination = encrypted_path(source);
    write_file_secure(&destination, token.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", destination.display())))?;
    debug!(
        source = %source.display(),
        destination = %destination.display(),
        "encrypted file"
    );
    Ok(destination)
}

/// Decrypt a file with a key file
///
/// Reads a token from `source`, decrypts it with the key stored at
/// `key_path`, and writes the plaintext to `out`. With a `ttl`, tokens older
/// than that are rejected.
pub fn decrypt_file<W: Write + ?Sized>(
    source: &Path,
    key_path: &Path,
    ttl: Option<Duration>,
    out: &mut W,
) -> Result<()> {
    let token = read_input(source)?;
    let key = load_key(key_path)?;
    let plaintext = match ttl {
        Some(ttl) => token::decrypt_with_ttl(&key, &token, ttl),
        None => token::decrypt(&key, &token),
    }
    .map_err(|e| e.with_context(format!("failed to decrypt {}", source.display())))?;

    out.write_all(&plaintext)
        .and_then(|()| out.flush())
        .map_err(|e| {
            CodecError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::OutputUnwritable,
                "failed to write decrypted output",
                e,
            )
        })?;
    Ok(())
}

/// The path `encrypt_file` writes to for a given source
pub fn encrypted_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(".");
    name.push(ENCRYPTED_EXTENSION);
    PathBuf::from(name)
}

/// Store serialized document bytes at `path`, encrypting them first when a
/// key file is given
///
/// The key is loaded before `path` is touched, so a missing or invalid key
/// never creates or truncates the destination.
pub(crate) fn store(path: &Path, plaintext: &[u8], key_path: Option<&Path>) -> Result<()> {
    let contents: Cow<'_, [u8]> = match key_path {
        Some(key_path) => {
            let key = load_key(key_path)?;
            let token = token::encrypt(&key, plaintext)
                .map_err(|e| e.with_context("encryption failed"))?;
            Cow::Owned(token.into_bytes())
        }
        None => Cow::Borrowed(plaintext),
    };

    if path.exists() {
        warn!(path = %path.display(), "file exists and will be overwritten");
    }
    write_file_secure(path, &contents)?;

    if !path.is_file() {
        return Err(CodecError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::OutputUnwritable,
            format!("unable to create {}", path.display()),
        ));
    }
    debug!(path = %path.display(), encrypted = key_path.is_some(), "stored document");
    Ok(())
}

/// Load the document bytes stored at `path`, decrypting them when a key
/// file is given
pub(crate) fn load(path: &Path, key_path: Option<&Path>) -> Result<Vec<u8>> {
    let contents = read_input(path)?;
    match key_path {
        Some(key_path) => {
            let key = load_key(key_path)?;
            token::decrypt(&key, &contents)
                .map_err(|e| e.with_context(format!("failed to decrypt {}", path.display())))
        }
        None => Ok(contents),
    }
}

/// Write file with secure permissions (0o600 on Unix)
fn write_file_secure(path: &Path, contents: &[u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| {
                CodecError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::OutputUnwritable,
                    format!("failed to open {}", path.display()),
                    e,
                )
            })?;

        file.write_all(contents).map_err(|e| {
            CodecError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::OutputUnwritable,
                format!("failed to write {}", path.display()),
                e,
            )
        })?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents).map_err(|e| {
            CodecError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::OutputUnwritable,
                format!("failed to write {}", path.display()),
                e,
            )
        })?;
        Ok(())
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| read_error(path, e))
}

fn read_error(path: &Path, err: io::Error) -> CodecError {
    let (category, kind) = if err.kind() == io::ErrorKind::NotFound {
        (ErrorCategory::User, ErrorKind::NotFound)
    } else {
        (ErrorCategory::Internal, ErrorKind::InputUnreadable)
    };
    CodecError::with_kind_and_source(
        category,
        kind,
        format!("failed to read from {}", path.display()),
        err,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::create_key_file;
    use std::fs;
    use tempfile::TempDir;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    fn setup() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let key_path = temp_dir.path().join("a.key");
        create_key_file(&key_path).unwrap();
        (temp_dir, key_path)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let (temp_dir, key_path) = setup();
        let plain_path = temp_dir.path().join("plain.bin");
        let plaintext: Vec<u8> = (0..10 * 1024).map(|i| (i % 251) as u8).collect();
        fs::write(&plain_path, &plaintext).unwrap();

        let crypt_path = encrypt_file(&plain_path, &key_path).unwrap();
        assert_eq!(crypt_path, temp_dir.path().join("plain.bin.enc"));
        assert_ne!(fs::read(&crypt_path).unwrap(), plaintext);

        let mut out = Vec::new();
        decrypt_file(&crypt_path, &key_path, None, &mut out).unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn test_empty_file() {
        let (temp_dir, key_path) = setup();
        let plain_path = temp_dir.path().join("empty.txt");
        fs::write(&plain_path, b"").unwrap();

        let crypt_path = encrypt_file(&plain_path, &key_path).unwrap();
        let mut out = Vec::new();
        decrypt_file(&crypt_path, &key_path, None, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_decrypt_with_ttl() {
        let (temp_dir, key_path) = setup();
        let plain_path = temp_dir.path().join("plain.txt");
        fs::write(&plain_path, b"recent").unwrap();
        let crypt_path = encrypt_file(&plain_path, &key_path).unwrap();

        let mut out = Vec::new();
        decrypt_file(&crypt_path, &key_path, Some(Duration::from_secs(300)), &mut out).unwrap();
        assert_eq!(out, b"recent");
    }

    #[test]
    #[cfg(unix)]
    fn test_file_permissions() {
        let (temp_dir, key_path) = setup();
        let plain_path = temp_dir.path().join("plain.txt");
        fs::write(&plain_path, b"test").unwrap();

        let crypt_path = encrypt_file(&plain_path, &key_path).unwrap();
        let mode = fs::metadata(&crypt_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_missing_source() {
        let (temp_dir, key_path) = setup();
        let err = encrypt_file(&temp_dir.path().join("nope.txt"), &key_path).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::NotFound));
        assert!(!temp_dir.path().join("nope.txt.enc").exists());
    }

    #[test]
    fn test_unreadable_source() {
        let (temp_dir, key_path) = setup();
        let err = encrypt_file(temp_dir.path(), &key_path).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::InputUnreadable));
    }

    #[test]
    fn test_missing_key() {
        let (temp_dir, _) = setup();
        let plain_path = temp_dir.path().join("plain.txt");
        fs::write(&plain_path, b"test").unwrap();

        let err = encrypt_file(&plain_path, &temp_dir.path().join("other.key")).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::KeyNotFound));
        assert!(!temp_dir.path().join("plain.txt.enc").exists());
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let (temp_dir, key_path) = setup();
        let other_key = temp_dir.path().join("b.key");
        create_key_file(&other_key).unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        fs::write(&plain_path, b"secret").unwrap();
        let crypt_path = encrypt_file(&plain_path, &key_path).unwrap();

        let mut out = Vec::new();
        let err = decrypt_file(&crypt_path, &other_key, None, &mut out).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
        assert!(out.is_empty());
    }

    #[test]
    fn test_decrypt_plaintext_source() {
        let (temp_dir, key_path) = setup();
        let plain_path = temp_dir.path().join("plain.txt");
        fs::write(&plain_path, b"never encrypted").unwrap();

        let mut out = Vec::new();
        let err = decrypt_file(&plain_path, &key_path, None, &mut out).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn test_unwritable_output_stream() {
        struct BrokenPipe;

        impl Write for BrokenPipe {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let (temp_dir, key_path) = setup();
        let plain_path = temp_dir.path().join("plain.txt");
        fs::write(&plain_path, b"data").unwrap();
        let crypt_path = encrypt_file(&plain_path, &key_path).unwrap();

        let err = decrypt_file(&crypt_path, &key_path, None, &mut BrokenPipe).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::OutputUnwritable));
    }

    #[test]
    fn test_store_and_load() {
        let (temp_dir, key_path) = setup();
        let path = temp_dir.path().join("doc");

        store(&path, b"payload", Some(&key_path)).unwrap();
        assert_ne!(fs::read(&path).unwrap(), b"payload");
        assert_eq!(load(&path, Some(&key_path)).unwrap(), b"payload");

        store(&path, b"plain payload", None).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"plain payload");
        assert_eq!(load(&path, None).unwrap(), b"plain payload");
    }

    #[test]
    fn test_store_with_missing_key_leaves_target_alone() {
        let (temp_dir, _) = setup();
        let missing_key = temp_dir.path().join("missing.key");
        let fresh = temp_dir.path().join("fresh");
        let existing = temp_dir.path().join("existing");
        fs::write(&existing, b"keep me").unwrap();

        let err = store(&fresh, b"payload", Some(&missing_key)).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::KeyNotFound));
        assert!(!fresh.exists());

        store(&existing, b"payload", Some(&missing_key)).unwrap_err();
        assert_eq!(fs::read(&existing).unwrap(), b"keep me");
    }

    #[test]
    fn test_encrypted_path_appends_suffix() {
        assert_eq!(
            encrypted_path(Path::new("dir/secrets.txt")),
            PathBuf::from("dir/secrets.txt.enc")
        );
    }
}
