use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::EngineError;

/// Read and deserialize a JSON file, attaching the path to any failure.
pub fn load_typed_json<T: DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    let text = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_typed_json(path, &text)
}

/// Deserialize JSON text that came from `path` (used for error reporting only).
pub fn parse_typed_json<T: DeserializeOwned>(path: &Path, text: &str) -> Result<T, EngineError> {
    serde_json::from_str(text).map_err(|source| EngineError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Like [`load_typed_json`], but a missing file yields `T::default()`.
pub fn load_typed_json_or_default<T: DeserializeOwned + Default>(
    path: &Path,
) -> Result<T, EngineError> {
    if !path.exists() {
        return Ok(T::default());
    }
    load_typed_json(path)
}

/// Build an `InvalidConfig` error for `path`.
pub fn invalid_config(path: impl Into<PathBuf>, msg: impl Into<String>) -> EngineError {
    EngineError::InvalidConfig {
        path: path.into(),
        msg: msg.into(),
    }
}
