//! Small JSON documents kept in the output directory between pipeline runs,
//! one file per cache key.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};

pub const FEATURE_PIPELINE_METADATA: &str = "feature_pipeline_metadata.json";

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("cached JSON {0} does not exist")]
    NotFound(PathBuf),
    #[error("cache I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid JSON in {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

/// Write `data` to `dir/file_name`, replacing any previous document.
pub fn save_json<T: Serialize + ?Sized>(data: &T, file_name: &str, dir: &Path) -> Result<(), CacheError> {
    let path = dir.join(file_name);
    let body = serde_json::to_vec(data).map_err(|source| CacheError::Parse {
        path: path.clone(),
        source,
    })?;

    fs::write(&path, body).map_err(|source| CacheError::Io {
        path: path.clone(),
        source,
    })?;

    tracing::debug!(path = %path.display(), "cached JSON written");
    Ok(())
}

/// Read `dir/file_name`. A missing file is reported as `NotFound`, never as
/// a parse failure.
pub fn load_json<T: DeserializeOwned>(file_name: &str, dir: &Path) -> Result<T, CacheError> {
    let path = dir.join(file_name);
    if !path.exists() {
        return Err(CacheError::NotFound(path));
    }

    let body = fs::read(&path).map_err(|source| CacheError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_slice(&body).map_err(|source| CacheError::Parse { path, source })
}
