//! Single-level JSON object documents
//!
//! Values keep their native JSON types through a round trip. The document
//! root must be an object.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::error;

use crate::error::{CodecError, ErrorCategory, ErrorKind, Result};
use crate::file_ops;

/// The in-memory form of a JSON document
pub type JsonMap = serde_json::Map<String, Value>;

/// Serialize `value` and write it to `path`, encrypting it with `key_path`
/// if given
///
/// `value` must serialize to a JSON object; anything else is rejected with
/// `InvalidFormat` before the file is touched.
pub fn write_json<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    key_path: Option<&Path>,
) -> Result<()> {
    encode_object(value)
        .and_then(|bytes| file_ops::store(path, &bytes, key_path))
        .inspect_err(|e| error!(path = %path.display(), error = %e, "failed to write JSON"))
}

/// Read a JSON object from `path`, decrypting it with `key_path` if given
pub fn read_json(path: &Path, key_path: Option<&Path>) -> Result<JsonMap> {
    file_ops::load(path, key_path)
        .and_then(|bytes| parse_object(&bytes))
        .inspect_err(|e| error!(path = %path.display(), error = %e, "failed to read JSON"))
}

fn encode_object<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value).map_err(|e| {
        CodecError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::InvalidFormat,
            "value cannot be represented as JSON",
            e,
        )
    })?;
    match value {
        Value::Object(map) => serde_json::to_vec(&map).map_err(|e| {
            CodecError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::InvalidFormat,
                "failed to encode JSON",
                e,
            )
        }),
        other => Err(not_an_object(&other)),
    }
}

fn parse_object(bytes: &[u8]) -> Result<JsonMap> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| {
        CodecError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::InvalidFormat,
            "malformed JSON document",
            e,
        )
    })?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(not_an_object(&other)),
    }
}

fn not_an_object(value: &Value) -> CodecError {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    };
    CodecError::with_kind(
        ErrorCategory::User,
        ErrorKind::InvalidFormat,
        format!("expected a JSON object, found {}", found),
    )
}
