//! sealedconf - config tables and JSON documents, optionally sealed in
//! Fernet tokens (AES-128-CBC + HMAC-SHA256)

#![forbid(unsafe_code)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod error;
pub mod file_ops;
pub mod json;
pub mod key;
pub mod table;
pub mod token;
