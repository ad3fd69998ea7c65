//! Error type shared by the reducers, the per-image routine and the orchestrator.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error returned by host-provided collaborators (inference task,
/// datastore, ground-truth source).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, ScoringError>;

#[derive(Debug, Error)]
pub enum ScoringError {
    /// Fewer stochastic passes produced a prediction than a variance needs.
    #[error("insufficient ensemble for {image_id}: {collected} of {required} predictions succeeded")]
    InsufficientEnsemble {
        image_id: String,
        collected: usize,
        required: usize,
    },

    /// A ground-truth source is configured but holds no label for the image.
    #[error("no ground truth label available for {image_id}")]
    MissingGroundTruth { image_id: String },

    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("unsupported {dimension} ensemble of rank {rank} (shape {shape:?})")]
    UnsupportedRank {
        dimension: crate::volume::Dimension,
        rank: usize,
        shape: Vec<usize>,
    },

    #[error("uncertainty map holds no finite values")]
    EmptyUncertaintyMap,

    #[error("inference failed for {image_id}")]
    Inference {
        image_id: String,
        #[source]
        source: BoxError,
    },

    #[error("datastore {operation} failed{}", image_suffix(.image_id))]
    Datastore {
        operation: &'static str,
        image_id: Option<String>,
        #[source]
        source: BoxError,
    },

    #[error("failed to read model file {}", .path.display())]
    ModelFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scoring request: {0}")]
    InvalidRequest(#[from] serde_json::Error),

    #[error("worker panicked while scoring {image_id}: {message}")]
    WorkerPanicked { image_id: String, message: String },
}

fn image_suffix(image_id: &Option<String>) -> String {
    match image_id {
        Some(id) => format!(" for {id}"),
        None => String::new(),
    }
}

impl ScoringError {
    pub(crate) fn datastore(
        operation: &'static str,
        image_id: Option<&str>,
        source: BoxError,
    ) -> Self {
        Self::Datastore {
            operation,
            image_id: image_id.map(str::to_string),
            source,
        }
    }

    /// Image the error is attributed to, when it concerns a single image.
    pub fn image_id(&self) -> Option<&str> {
        match self {
            Self::InsufficientEnsemble { image_id, .. }
            | Self::MissingGroundTruth { image_id }
            | Self::Inference { image_id, .. }
            | Self::WorkerPanicked { image_id, .. } => Some(image_id),
            Self::Datastore { image_id, .. } => image_id.as_deref(),
            _ => None,
        }
    }
}
