//! Authenticated encryption in the Fernet token format
//!
//! This module implements encryption using:
//! - AES-128 in CBC mode with PKCS#7 padding for confidentiality
//! - HMAC-SHA256 over the version, timestamp, iv and ciphertext for integrity
//!
//! The binary format, before base64url armoring (with padding), is:
//! - version: 1 byte (0x80)
//! - timestamp: 8 bytes (big-endian u64, seconds since the UNIX epoch)
//! - iv: 16 bytes
//! - ciphertext: variable length, a multiple of 16 bytes
//! - hmac: 32 bytes

use aes::Aes128;
use base64::{Engine, engine::general_purpose::URL_SAFE};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{CodecError, ErrorCategory, ErrorKind, Result};
use crate::key::Key;

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Version marker of the only token format we produce and accept
const VERSION: u8 = 0x80;

/// Length of the timestamp in bytes
const TIMESTAMP_LEN: usize = 8;

/// Length of the initialization vector in bytes
pub const IV_LEN: usize = 16;

/// AES block length in bytes
const BLOCK_LEN: usize = 16;

/// Length of the HMAC-SHA256 tag in bytes
const HMAC_LEN: usize = 32;

/// version + timestamp + iv
const HEADER_LEN: usize = 1 + TIMESTAMP_LEN + IV_LEN;

/// Tokens stamped further than this into the future fail a TTL check
const MAX_CLOCK_SKEW_SECS: u64 = 60;

const INVALID_TOKEN: &str = "invalid token: corrupt input, tampered-with data, or wrong key";

/// Known text for the key self-test. Several blocks long and not
/// block-aligned so padding is exercised.
const SELF_TEST_TEXT: &str = "\
The quick brown fox jumps over the lazy dog.
Pack my box with five dozen liquor jugs.
Sphinx of black quartz, judge my vow.
Zwölf Boxkämpfer jagen Viktor quer über den großen Sylter Deich.
";

/// Encrypt plaintext with a key using a random iv and the current time
///
/// Returns the armored token. Encrypting the same plaintext twice yields
/// different tokens.
pub fn encrypt(key: &Key, plaintext: &[u8]) -> Result<String> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    encrypt_deterministic(key, plaintext, &iv, unix_now())
}

/// Encrypt plaintext with a key using the provided iv and timestamp
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `encrypt()` which generates a random iv.
pub fn encrypt_deterministic(
    key: &Key,
    plaintext: &[u8],
    iv: &[u8; IV_LEN],
    timestamp: u64,
) -> Result<String> {
    let cipher = Aes128CbcEnc::new_from_slices(key.encryption_key(), iv)
        .map_err(|_| CodecError::new(ErrorCategory::Internal, "failed to initialize cipher"))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut token = Vec::with_capacity(HEADER_LEN + ciphertext.len() + HMAC_LEN);
    token.push(VERSION);
    token.extend_from_slice(&timestamp.to_be_bytes());
    token.extend_from_slice(iv);
    token.extend_from_slice(&ciphertext);

    let mut mac = new_mac(key)?;
    mac.update(&token);
    token.extend_from_slice(&mac.finalize().into_bytes());

    Ok(URL_SAFE.encode(token))
}

/// Decrypt a token with a key, regardless of its age
pub fn decrypt(key: &Key, token: &[u8]) -> Result<Vec<u8>> {
    open(key, token, None)
}

/// Decrypt a token with a key, rejecting it if it is older than `ttl`
///
/// The age check only happens after the token has authenticated, so an
/// expired token is never confused with a forged one.
pub fn decrypt_with_ttl(key: &Key, token: &[u8], ttl: Duration) -> Result<Vec<u8>> {
    open(key, token, Some((ttl, unix_now())))
}

/// Encrypt a fixed text with `key`, decrypt it again and compare
///
/// Used when provisioning key files so that a key which cannot round trip
/// is never handed out.
pub fn self_test(key: &Key) -> Result<()> {
    let token = encrypt(key, SELF_TEST_TEXT.as_bytes()).map_err(self_test_failure)?;
    let recovered = decrypt(key, token.as_bytes()).map_err(self_test_failure)?;

    if recovered != SELF_TEST_TEXT.as_bytes() {
        return Err(CodecError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::SelfTestFailed,
            "key self-test failed: recovered text differs from the original",
        ));
    }
    Ok(())
}

fn open(key: &Key, token: &[u8], freshness: Option<(Duration, u64)>) -> Result<Vec<u8>> {
    // Token files written by other tools often end in a newline.
    let data = URL_SAFE
        .decode(token.trim_ascii())
        .map_err(|_| invalid_token())?;

    if data.len() < HEADER_LEN + BLOCK_LEN + HMAC_LEN || data[0] != VERSION {
        return Err(invalid_token());
    }

    // Verify the tag before looking at anything it covers.
    let (signed, tag) = data.split_at(data.len() - HMAC_LEN);
    let mut mac = new_mac(key)?;
    mac.update(signed);
    mac.verify_slice(tag).map_err(|_| invalid_token())?;

    let mut timestamp_bytes = [0u8; TIMESTAMP_LEN];
    timestamp_bytes.copy_from_slice(&signed[1..1 + TIMESTAMP_LEN]);
    let timestamp = u64::from_be_bytes(timestamp_bytes);
    if let Some((ttl, now)) = freshness {
        check_freshness(timestamp, ttl, now)?;
    }

    let iv = &signed[1 + TIMESTAMP_LEN..HEADER_LEN];
    let ciphertext = &signed[HEADER_LEN..];
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(invalid_token());
    }

    let cipher = Aes128CbcDec::new_from_slices(key.encryption_key(), iv)
        .map_err(|_| CodecError::new(ErrorCategory::Internal, "failed to initialize cipher"))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| invalid_token())
}

fn check_freshness(timestamp: u64, ttl: Duration, now: u64) -> Result<()> {
    if timestamp.saturating_add(ttl.as_secs()) < now {
        return Err(CodecError::with_kind(
            ErrorCategory::User,
            ErrorKind::TokenExpired,
            "token has expired",
        ));
    }
    if now.saturating_add(MAX_CLOCK_SKEW_SECS) < timestamp {
        return Err(CodecError::with_kind(
            ErrorCategory::User,
            ErrorKind::TokenExpired,
            "token timestamp lies in the future",
        ));
    }
    Ok(())
}

fn new_mac(key: &Key) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key.signing_key())
        .map_err(|_| CodecError::new(ErrorCategory::Internal, "failed to initialize HMAC"))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn invalid_token() -> CodecError {
    CodecError::with_kind(
        ErrorCategory::User,
        ErrorKind::AuthenticationFailed,
        INVALID_TOKEN,
    )
}

fn self_test_failure(err: CodecError) -> CodecError {
    CodecError::with_kind_and_source(
        ErrorCategory::Internal,
        ErrorKind::SelfTestFailed,
        "key self-test failed",
        err,
    )
}
