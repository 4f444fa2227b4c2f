//! Reading the scorer's JSON result
//!
//! The pooled statistics live under `pooled_metrics.vmaf`. All four values
//! must be present.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for score file handling
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("Failed to read score file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse score file: {reason}")]
    Parse { reason: String },
}

/// Pooled quality statistics for one preset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub harmonic_mean: f64,
}

#[derive(Deserialize)]
struct ScoreDocument {
    pooled_metrics: PooledMetrics,
}

#[derive(Deserialize)]
struct PooledMetrics {
    vmaf: QualityScore,
}

/// Extract the pooled statistics from a result document
pub fn parse_score(json: &str) -> Result<QualityScore, ScoreError> {
    let document: ScoreDocument = serde_json::from_str(json).map_err(|e| ScoreError::Parse {
        reason: e.to_string(),
    })?;
    Ok(document.pooled_metrics.vmaf)
}

/// Read and parse the scorer's result file
pub fn read_score(path: &Path) -> Result<QualityScore, ScoreError> {
    let json = fs::read_to_string(path).map_err(|source| ScoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_score(&json)
}
