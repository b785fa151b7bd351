//! Checks applied before a key, value or file name reaches an engine.
//!
//! File names end up as paths inside the environment root, so anything
//! that could leave that directory or collide with its housekeeping files
//! is refused here rather than in each backend.

use chaindb_core::{Error, Result};

pub const MAX_KEY_SIZE: usize = 16 * 1024 * 1024;
pub const MAX_VALUE_SIZE: usize = 1024 * 1024 * 1024;
pub const MAX_FILE_NAME: usize = 255;

fn over_limit(what: &str, len: usize, max: usize) -> Error {
    Error::InvalidInput(format!("{} is {} bytes, limit is {}", what, len, max))
}

/// Keys must be non-empty and at most [`MAX_KEY_SIZE`] bytes
pub fn validate_key(key: &[u8]) -> Result<()> {
    match key.len() {
        0 => Err(Error::InvalidInput("empty key".into())),
        len if len > MAX_KEY_SIZE => Err(over_limit("key", len, MAX_KEY_SIZE)),
        _ => Ok(()),
    }
}

/// Values may be empty
pub fn validate_value(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(over_limit("value", value.len(), MAX_VALUE_SIZE));
    }
    Ok(())
}

/// A file name must be a single, visible path component.
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.len() > MAX_FILE_NAME {
        return Err(over_limit("file name", name.len(), MAX_FILE_NAME));
    }
    let refused = name.is_empty()
        || name.starts_with('.')
        || name.contains("..")
        || name.chars().any(|c| matches!(c, '/' | '\\' | '\0'));
    if refused {
        return Err(Error::InvalidInput(format!(
            "{:?} is not a usable file name",
            name
        )));
    }
    Ok(())
}
