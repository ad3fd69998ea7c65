//! Model version tags.
//!
//! Scores are cached per image under the version of the model that produced
//! them. The version is the model file's modification time in whole seconds,
//! so publishing a re-trained model invalidates every earlier score.

use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::error::{Result, ScoringError};

/// Tag used when the task has no model file, or the file does not exist.
pub const UNTAGGED_MODEL_VERSION: i64 = 1;

/// Version tag of the model at `path`.
pub fn model_version(path: Option<&Path>) -> Result<i64> {
    let Some(path) = path else {
        return Ok(UNTAGGED_MODEL_VERSION);
    };
    if !path.exists() {
        return Ok(UNTAGGED_MODEL_VERSION);
    }

    let modified = path
        .metadata()
        .and_then(|m| m.modified())
        .map_err(|source| ScoringError::ModelFile {
            path: path.to_path_buf(),
            source,
        })?;

    // Pre-epoch mtimes come back as an Err carrying the distance to the epoch.
    let secs = match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    };
    Ok(secs)
}
